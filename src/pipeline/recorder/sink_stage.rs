//! Frame sink stage: hands frames to an application channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::mpsc;

use crate::error::{MediaError, Result};
use crate::pipeline::params::{Param, ParamKind};
use crate::pipeline::stage::{
    CreateParam, ElementCore, FrameConsumer, FrameInput, PipelineElement, StageKind,
};
use crate::pipeline::types::MediaFrame;

#[derive(Default)]
struct SinkInput {
    tx: Mutex<Option<mpsc::UnboundedSender<MediaFrame>>>,
    active: AtomicBool,
    frames: AtomicU64,
}

impl FrameConsumer for SinkInput {
    fn push_frame(&self, frame: MediaFrame) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(MediaError::invalid_state("push frame", "sink not running"));
        }
        self.frames.fetch_add(1, Ordering::Relaxed);

        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| MediaError::backend("sink receiver dropped")),
            // no channel attached: frames are counted and discarded
            None => Ok(()),
        }
    }
}

/// Terminal stage forwarding every frame to a `tokio::sync::mpsc` channel.
pub struct FrameSink {
    core: ElementCore,
    input: Arc<SinkInput>,
}

impl FrameSink {
    /// Sink without a channel, frames are only counted.
    pub fn new(param: CreateParam) -> Self {
        Self {
            core: ElementCore::new(param, StageKind::Sink),
            input: Arc::new(SinkInput::default()),
        }
    }

    pub fn with_channel(param: CreateParam) -> (Self, mpsc::UnboundedReceiver<MediaFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(param);
        *sink.input.tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        (sink, rx)
    }

    /// Frames accepted since the last reset.
    pub fn frames(&self) -> u64 {
        self.input.frames.load(Ordering::Relaxed)
    }
}

impl PipelineElement for FrameSink {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn required_params(&self) -> &'static [ParamKind] {
        &[]
    }

    fn accepts(&self, _kind: ParamKind) -> bool {
        false
    }

    fn on_configure(&mut self, _param: &Param) -> Result<()> {
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        self.input.active.store(true, Ordering::Release);
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        self.input.active.store(false, Ordering::Release);
        debug!("{}: {} frames delivered", self.name(), self.frames());
        Ok(())
    }

    fn on_reset(&mut self) {
        self.input.active.store(false, Ordering::Release);
        self.input.frames.store(0, Ordering::Relaxed);
    }

    fn on_get_parameter(&self, kind: ParamKind) -> Result<Param> {
        Err(MediaError::invalid_parameter(format!(
            "{} has no {:?}",
            self.name(),
            kind
        )))
    }

    fn frame_input(&self) -> Option<FrameInput> {
        let input: FrameInput = self.input.clone();
        Some(input)
    }
}
