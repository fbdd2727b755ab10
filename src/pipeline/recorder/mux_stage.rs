//! Muxer stage
//!
//! Frames pushed through [`FrameInput`] are written by a dedicated writer
//! thread. Only bare elementary stream output is produced in-process; other
//! container formats belong to the external backend.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::assets::MUX_QUEUE_CAPACITY;
use crate::error::{MediaError, Result};
use crate::pipeline::params::{ContainerFormat, Param, ParamKind};
use crate::pipeline::stage::{
    CreateParam, ElementCore, ElementMessage, FrameConsumer, FrameInput, Notifier,
    PipelineElement, StageKind,
};
use crate::pipeline::state::ElementState;
use crate::pipeline::types::{MediaFrame, Timestamp, contains_idr};

const REQUIRED: &[ParamKind] = &[ParamKind::OutputFormat];
const OUTPUTS: &[ParamKind] = &[ParamKind::OutputPath];
const ACCEPTED: &[ParamKind] = &[
    ParamKind::OutputFormat,
    ParamKind::OutputPath,
    ParamKind::MaxDuration,
    ParamKind::MaxFileSize,
];

enum WriterMsg {
    Header(Bytes),
    Frame(MediaFrame),
    Eos,
}

/// Output limits, zero meaning unlimited. Changed while running.
#[derive(Default)]
struct Limits {
    max_duration_us: AtomicU64,
    max_file_size: AtomicU64,
}

/// What the writer has put on disk.
#[derive(Default)]
pub struct MuxStats {
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    frames_skipped: AtomicU64,
}

impl MuxStats {
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Frames dropped before the first keyframe or past a limit.
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct MuxerInput {
    tx: Mutex<Option<mpsc::Sender<WriterMsg>>>,
}

impl MuxerInput {
    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<WriterMsg>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, msg: WriterMsg) -> Result<()> {
        // clone out so the lock is not held while the queue is full
        let tx = self
            .sender()
            .clone()
            .ok_or_else(|| MediaError::invalid_state("push frame", "muxer not running"))?;
        tx.blocking_send(msg)
            .map_err(|_| MediaError::backend("muxer writer is gone"))
    }
}

impl FrameConsumer for MuxerInput {
    fn push_frame(&self, frame: MediaFrame) -> Result<()> {
        self.send(WriterMsg::Frame(frame))
    }

    fn push_header(&self, header: Bytes) -> Result<()> {
        self.send(WriterMsg::Header(header))
    }
}

pub struct MuxerStage {
    core: ElementCore,
    format: Option<ContainerFormat>,
    output: Option<PathBuf>,
    file: Option<File>,
    limits: Arc<Limits>,
    stats: Arc<MuxStats>,
    input: Arc<MuxerInput>,
    writer: Option<JoinHandle<()>>,
}

impl MuxerStage {
    pub fn new(param: CreateParam) -> Self {
        Self {
            core: ElementCore::new(param, StageKind::Muxer),
            format: None,
            output: None,
            file: None,
            limits: Arc::new(Limits::default()),
            stats: Arc::new(MuxStats::default()),
            input: Arc::new(MuxerInput::default()),
            writer: None,
        }
    }

    pub fn stats(&self) -> Arc<MuxStats> {
        Arc::clone(&self.stats)
    }

    fn store_limit(&self, param: &Param) {
        match param {
            Param::MaxDuration(d) => self
                .limits
                .max_duration_us
                .store(d.as_micros() as u64, Ordering::Relaxed),
            Param::MaxFileSize(size) => self.limits.max_file_size.store(*size, Ordering::Relaxed),
            _ => {}
        }
    }

    /// Close the queue and wait for the writer to flush what is left.
    fn join_writer(&mut self) -> Result<()> {
        self.input.sender().take();
        match self.writer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MediaError::backend(format!("{}: writer thread panicked", self.name()))),
            None => Ok(()),
        }
    }
}

struct Writer {
    handle: i32,
    name: String,
    out: BufWriter<File>,
    limits: Arc<Limits>,
    stats: Arc<MuxStats>,
    notifier: Option<Notifier>,
}

impl Writer {
    fn notify(&self, message: ElementMessage) {
        if let Some(notifier) = &self.notifier {
            notifier(self.handle, message);
        }
    }

    fn fail(&self, what: &str, e: std::io::Error) {
        error!("{}: {}: {}", self.name, what, e);
        self.notify(ElementMessage::Error(MediaError::backend(format!(
            "{}: {}: {}",
            self.name, what, e
        ))));
    }

    fn run(mut self, mut rx: mpsc::Receiver<WriterMsg>) {
        let mut waiting_keyframe = true;
        let mut first_pts: Option<Timestamp> = None;
        let mut closed = false;

        while let Some(msg) = rx.blocking_recv() {
            match msg {
                WriterMsg::Header(header) => {
                    if let Err(e) = self.out.write_all(&header) {
                        self.fail("header write failed", e);
                        return;
                    }
                    self.stats
                        .bytes_written
                        .fetch_add(header.len() as u64, Ordering::Relaxed);
                }
                WriterMsg::Frame(frame) => {
                    if closed || !self.admit(&frame, &mut waiting_keyframe, &mut first_pts) {
                        self.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    if let Err(e) = self.out.write_all(&frame.data) {
                        self.fail("frame write failed", e);
                        return;
                    }
                    self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_written
                        .fetch_add(frame.size() as u64, Ordering::Relaxed);
                }
                WriterMsg::Eos => {
                    if let Err(e) = self.out.flush() {
                        self.fail("flush failed", e);
                        return;
                    }
                    closed = true;
                    debug!("{}: drained", self.name);
                    self.notify(ElementMessage::DrainComplete);
                }
            }
        }

        if let Err(e) = self.out.flush() {
            warn!("{}: final flush failed: {}", self.name, e);
        }
        info!(
            "{}: writer done, {} frames / {} bytes",
            self.name,
            self.stats.frames_written(),
            self.stats.bytes_written()
        );
    }

    /// Start at a keyframe and honour the output limits.
    fn admit(
        &self,
        frame: &MediaFrame,
        waiting_keyframe: &mut bool,
        first_pts: &mut Option<Timestamp>,
    ) -> bool {
        if *waiting_keyframe {
            if !(frame.is_keyframe || contains_idr(&frame.data)) {
                return false;
            }
            *waiting_keyframe = false;
        }

        let first = *first_pts.get_or_insert(frame.pts);
        let max_duration = self.limits.max_duration_us.load(Ordering::Relaxed);
        if max_duration > 0 && (frame.pts.micros - first.micros).max(0) as u64 >= max_duration {
            debug!("{}: max duration reached", self.name);
            return false;
        }

        let max_size = self.limits.max_file_size.load(Ordering::Relaxed);
        if max_size > 0 && self.stats.bytes_written() + frame.size() as u64 > max_size {
            debug!("{}: max file size reached", self.name);
            return false;
        }
        true
    }
}

impl PipelineElement for MuxerStage {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn required_params(&self) -> &'static [ParamKind] {
        REQUIRED
    }

    fn required_any_of(&self) -> &'static [ParamKind] {
        OUTPUTS
    }

    fn accepts(&self, kind: ParamKind) -> bool {
        ACCEPTED.contains(&kind)
    }

    fn accepts_dynamic(&self, kind: ParamKind) -> bool {
        matches!(kind, ParamKind::MaxDuration | ParamKind::MaxFileSize)
    }

    fn on_configure(&mut self, param: &Param) -> Result<()> {
        match param {
            Param::OutputFormat(format) => self.format = Some(*format),
            Param::OutputPath(path) => self.output = Some(path.clone()),
            other => self.store_limit(other),
        }
        Ok(())
    }

    fn on_prepare(&mut self) -> Result<()> {
        match self.format {
            Some(ContainerFormat::Raw) => {}
            other => {
                return Err(MediaError::unavailable(format!(
                    "{}: no in-process muxer for {:?}",
                    self.name(),
                    other
                )));
            }
        }

        let path = self
            .output
            .clone()
            .ok_or_else(|| MediaError::invalid_state("prepare", "no output"))?;
        let file = File::create(&path).map_err(|e| {
            MediaError::backend(format!("{}: cannot create {}: {}", self.name(), path.display(), e))
        })?;
        self.file = Some(file);
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| MediaError::unavailable(format!("{}: output not open", self.name())))?;
        let (tx, rx) = mpsc::channel(MUX_QUEUE_CAPACITY);

        let writer = Writer {
            handle: self.handle(),
            name: self.name().to_string(),
            out: BufWriter::new(file),
            limits: Arc::clone(&self.limits),
            stats: Arc::clone(&self.stats),
            notifier: self.core.notifier(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("mux-{}", self.name()))
            .spawn(move || writer.run(rx))
            .map_err(|e| MediaError::unavailable(format!("cannot spawn writer: {}", e)))?;

        *self.input.sender() = Some(tx);
        self.writer = Some(handle);
        info!("{}: writing to {:?}", self.name(), self.output);
        Ok(())
    }

    /// Queue an end-of-stream marker; completion arrives as `DrainComplete`.
    fn drain_all(&mut self) -> Result<bool> {
        match self.state() {
            ElementState::Running | ElementState::Paused => {}
            state => return Err(MediaError::invalid_state("drain", state)),
        }
        self.input.send(WriterMsg::Eos)?;
        Ok(true)
    }

    fn on_stop(&mut self) -> Result<()> {
        self.file = None;
        self.join_writer()
    }

    fn on_reset(&mut self) {
        if let Err(e) = self.join_writer() {
            warn!("{}: {}", self.name(), e);
        }
        self.file = None;
        self.format = None;
        self.output = None;
        self.limits.max_duration_us.store(0, Ordering::Relaxed);
        self.limits.max_file_size.store(0, Ordering::Relaxed);
        self.stats.reset();
    }

    fn on_set_parameter(&mut self, param: &Param) -> Result<()> {
        self.store_limit(param);
        info!("{}: limit updated {:?}", self.name(), param);
        Ok(())
    }

    fn on_get_parameter(&self, kind: ParamKind) -> Result<Param> {
        let value = match kind {
            ParamKind::MaxDuration => Some(Param::MaxDuration(Duration::from_micros(
                self.limits.max_duration_us.load(Ordering::Relaxed),
            ))),
            ParamKind::MaxFileSize => Some(Param::MaxFileSize(
                self.limits.max_file_size.load(Ordering::Relaxed),
            )),
            ParamKind::OutputFormat => self.format.map(Param::OutputFormat),
            ParamKind::OutputPath => self.output.clone().map(Param::OutputPath),
            _ => None,
        };
        value.ok_or_else(|| {
            MediaError::invalid_parameter(format!("{} has no {:?}", self.name(), kind))
        })
    }

    fn frame_input(&self) -> Option<FrameInput> {
        let input: FrameInput = self.input.clone();
        Some(input)
    }
}
