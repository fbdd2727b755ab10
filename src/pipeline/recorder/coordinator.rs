//! Recorder pipeline coordinator
//!
//! Drives source → encoder(s) → muxer/sink stages through the element
//! lifecycle and moves frames from the source to every frame input on a
//! dedicated pump thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::RecorderConfig;
use crate::error::{MediaError, Result};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::params::{Param, ParamKind};
use crate::pipeline::recorder::FramePuller;
use crate::pipeline::stage::{ElementMessage, FrameInput, PipelineElement};
use crate::pipeline::state::ElementState;
use crate::utils::{SyncBridge, SyncState};

/// Recorder pipeline state
///
/// ```text
/// Idle → Prepared → Recording ⇄ Paused → Stopped
/// ```
///
/// `Error` is absorbing until [`RecorderPipeline::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Prepared,
    Recording,
    Paused,
    Stopped,
    Error,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    StateChanged(RecorderState),
    /// The source ran dry while recording.
    EndOfStream,
    /// Reported once per entry into `Error`.
    Error {
        handle: Option<i32>,
        error: MediaError,
    },
}

#[derive(Default)]
struct DrainWait {
    expected: HashSet<i32>,
    completed: HashSet<i32>,
    armed: bool,
    bridge: Option<Arc<SyncBridge>>,
}

impl DrainWait {
    fn try_release(&self) {
        if !self.armed {
            return;
        }
        if let Some(bridge) = &self.bridge {
            if self.expected.is_subset(&self.completed) {
                bridge.signal_ready();
            }
        }
    }
}

/// State reachable from stage notifiers and the pump thread.
pub(super) struct Shared {
    state: Mutex<RecorderState>,
    drain: Mutex<DrainWait>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    stopping: AtomicBool,
}

impl Shared {
    pub(super) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Self {
            state: Mutex::new(RecorderState::Idle),
            drain: Mutex::new(DrainWait::default()),
            events,
            stopping: AtomicBool::new(false),
        });
        (shared, rx)
    }

    fn drain(&self) -> MutexGuard<'_, DrainWait> {
        self.drain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> RecorderState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, target: RecorderState) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == target {
                return;
            }
            debug!("recorder: {} -> {}", *state, target);
            *state = target;
        }
        let _ = self.events.send(RecorderEvent::StateChanged(target));
    }

    fn fail(&self, handle: Option<i32>, error: MediaError) {
        let first = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let first = *state != RecorderState::Error;
            *state = RecorderState::Error;
            first
        };

        if first {
            error!("recorder failed (stage {:?}): {}", handle, error);
            let _ = self.events.send(RecorderEvent::StateChanged(RecorderState::Error));
            let _ = self.events.send(RecorderEvent::Error {
                handle,
                error: error.clone(),
            });
        }

        if let Some(bridge) = &self.drain().bridge {
            bridge.signal_failed(error.to_string());
        }
    }

    /// Entry point of every stage notifier.
    pub(super) fn on_message(&self, handle: i32, message: ElementMessage) {
        match message {
            ElementMessage::DrainComplete => {
                debug!("stage {} drained", handle);
                let mut drain = self.drain();
                drain.completed.insert(handle);
                drain.try_release();
            }
            ElementMessage::Error(e) => self.fail(Some(handle), e),
        }
    }
}

/// Record-side controller built by `RecorderPipelineBuilder`.
pub struct RecorderPipeline {
    stages: Vec<Box<dyn PipelineElement>>,
    queued: Vec<Vec<Param>>,
    source: usize,
    config: RecorderConfig,
    shared: Arc<Shared>,
    health: Arc<PipelineHealth>,
    pump: Option<JoinHandle<()>>,
    events: Option<mpsc::UnboundedReceiver<RecorderEvent>>,
}

impl RecorderPipeline {
    pub(super) fn assemble(
        stages: Vec<Box<dyn PipelineElement>>,
        queued: Vec<Vec<Param>>,
        source: usize,
        config: RecorderConfig,
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<RecorderEvent>,
    ) -> Self {
        Self {
            stages,
            queued,
            source,
            config,
            shared,
            health: Arc::new(PipelineHealth::new()),
            pump: None,
            events: Some(events),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state()
    }

    /// Event stream of this pipeline; can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RecorderEvent>> {
        self.events.take()
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    /// Recording, but no frame reached an output within the stall threshold.
    pub fn is_stalled(&self) -> bool {
        self.state() == RecorderState::Recording
            && self.health.is_stalled(self.config.stall_threshold)
    }

    /// Stage handles in assembly order.
    pub fn handles(&self) -> Vec<i32> {
        self.stages.iter().map(|s| s.handle()).collect()
    }

    pub fn stage(&self, handle: i32) -> Option<&dyn PipelineElement> {
        self.stages
            .iter()
            .find(|s| s.handle() == handle)
            .map(|s| s.as_ref())
    }

    fn index_of(&self, handle: i32) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.handle() == handle)
            .ok_or_else(|| MediaError::invalid_parameter(format!("no stage with handle {}", handle)))
    }

    fn require(&self, op: &'static str, allowed: &[RecorderState]) -> Result<RecorderState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(MediaError::invalid_state(op, state))
        }
    }

    fn fail_stage(&self, index: usize, error: MediaError) -> MediaError {
        self.shared.fail(Some(self.stages[index].handle()), error.clone());
        error
    }

    fn prepare_stage(&mut self, index: usize) -> Result<()> {
        let stage = &mut self.stages[index];
        stage.init()?;
        for param in &self.queued[index] {
            stage.configure(param.clone())?;
        }
        stage.check_config_ready()?;
        stage.prepare()
    }

    /// Init, configure and prepare every stage in assembly order.
    pub fn prepare(&mut self) -> Result<()> {
        self.require("prepare", &[RecorderState::Idle])?;
        for index in 0..self.stages.len() {
            if let Err(e) = self.prepare_stage(index) {
                return Err(self.fail_stage(index, e));
            }
        }
        self.shared.set_state(RecorderState::Prepared);
        Ok(())
    }

    /// Start every stage, consumers first, then the frame pump.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", &[RecorderState::Prepared])?;
        for index in (0..self.stages.len()).rev() {
            if let Err(e) = self.stages[index].start() {
                return Err(self.fail_stage(index, e));
            }
        }

        if let Err(e) = self.spawn_pump() {
            self.shared.fail(None, e.clone());
            return Err(e);
        }
        self.shared.set_state(RecorderState::Recording);
        info!("recorder: recording with {} stages", self.stages.len());
        Ok(())
    }

    fn spawn_pump(&mut self) -> Result<()> {
        let puller = self.stages[self.source]
            .frame_puller()
            .ok_or_else(|| MediaError::unavailable("source stage has no frame puller"))?;
        let inputs: Vec<(i32, FrameInput)> = self
            .stages
            .iter()
            .filter_map(|s| s.frame_input().map(|input| (s.handle(), input)))
            .collect();
        if inputs.is_empty() {
            warn!("recorder: no stage consumes frames, every frame will be dropped");
        }

        self.shared.stopping.store(false, Ordering::Release);
        let health = Arc::clone(&self.health);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("recorder-pump".to_string())
            .spawn(move || pump(puller, inputs, health, shared))
            .map_err(|e| MediaError::unavailable(format!("cannot spawn pump: {}", e)))?;
        self.pump = Some(handle);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require("pause", &[RecorderState::Recording])?;
        for index in 0..self.stages.len() {
            if let Err(e) = self.stages[index].pause() {
                return Err(self.fail_stage(index, e));
            }
        }
        self.shared.set_state(RecorderState::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require("resume", &[RecorderState::Paused])?;
        for index in (0..self.stages.len()).rev() {
            if let Err(e) = self.stages[index].resume() {
                return Err(self.fail_stage(index, e));
            }
        }
        self.shared.set_state(RecorderState::Recording);
        Ok(())
    }

    /// Stop recording. With `drain`, buffered output is flushed first.
    ///
    /// Stages are stopped even when draining fails; the drain error is
    /// returned and leaves the pipeline in `Error`.
    pub fn stop(&mut self, drain: bool) -> Result<()> {
        let state = self.require(
            "stop",
            &[RecorderState::Prepared, RecorderState::Recording, RecorderState::Paused],
        )?;

        let mut result = Ok(());
        if drain && state != RecorderState::Prepared {
            result = self.drain();
        }

        let halted = self.halt_stages();
        if result.is_ok() {
            result = halted;
        }

        match &result {
            Ok(()) => self.shared.set_state(RecorderState::Stopped),
            Err(e) => self.shared.fail(None, e.clone()),
        }
        info!("recorder stopped: {}", self.health.summary());
        result
    }

    fn drain(&mut self) -> Result<()> {
        let bridge = Arc::new(SyncBridge::new());
        *self.shared.drain() = DrainWait {
            bridge: Some(Arc::clone(&bridge)),
            ..DrainWait::default()
        };

        for index in 0..self.stages.len() {
            let mut attempt = 0;
            loop {
                match self.stages[index].drain_all() {
                    Ok(true) => {
                        let handle = self.stages[index].handle();
                        self.shared.drain().expected.insert(handle);
                        break;
                    }
                    Ok(false) => break,
                    Err(e) if e.is_transient() && attempt < self.config.drain_retries => {
                        attempt += 1;
                        warn!(
                            "{}: drain failed ({}), retry {}",
                            self.stages[index].name(),
                            e,
                            attempt
                        );
                    }
                    Err(e) => {
                        *self.shared.drain() = DrainWait::default();
                        return Err(self.fail_stage(index, e));
                    }
                }
            }
        }

        {
            let mut wait = self.shared.drain();
            wait.armed = true;
            wait.try_release();
        }
        let outcome = bridge.wait_timeout(self.config.drain_timeout, "drain");
        *self.shared.drain() = DrainWait::default();

        match outcome {
            Ok(SyncState::Ready) => Ok(()),
            Ok(_) => Err(MediaError::backend(
                bridge
                    .failure_reason()
                    .unwrap_or_else(|| "drain failed".to_string()),
            )),
            Err(e) => {
                warn!("recorder: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the source so a blocked fetch returns, join the pump, then stop
    /// the remaining stages. Returns the first stage error.
    fn halt_stages(&mut self) -> Result<()> {
        self.shared.stopping.store(true, Ordering::Release);
        let mut first_err: Option<MediaError> = None;

        let source = self.source;
        if let Err(e) = self.stop_stage(source) {
            first_err.get_or_insert(e);
        }

        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                error!("recorder: pump thread panicked");
            }
        }

        for index in 0..self.stages.len() {
            if index == source {
                continue;
            }
            if let Err(e) = self.stop_stage(index) {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stop_stage(&mut self, index: usize) -> Result<()> {
        match self.stages[index].state() {
            ElementState::Ready | ElementState::Running | ElementState::Paused => {}
            _ => return Ok(()),
        }
        self.stages[index]
            .stop()
            .map_err(|e| self.fail_stage(index, e))
    }

    /// Tear everything down and return to `Idle`. Queued static parameters
    /// are kept, so the pipeline can be prepared again.
    pub fn reset(&mut self) -> Result<()> {
        if let Err(e) = self.halt_stages() {
            warn!("recorder: stop during reset failed: {}", e);
        }
        for stage in &mut self.stages {
            if stage.state() != ElementState::Created {
                if let Err(e) = stage.reset() {
                    warn!("{}: reset failed: {}", stage.name(), e);
                }
            }
        }
        *self.shared.drain() = DrainWait::default();
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner) = RecorderState::Idle;
        let _ = self
            .shared
            .events
            .send(RecorderEvent::StateChanged(RecorderState::Idle));
        Ok(())
    }

    /// Forward a dynamic parameter to the stage owning `handle`.
    pub fn set_parameter(&mut self, handle: i32, param: Param) -> Result<()> {
        self.require("set parameter", &[RecorderState::Recording, RecorderState::Paused])?;
        let index = self.index_of(handle)?;
        match self.stages[index].set_parameter(param) {
            Err(e) if e.is_transient() => Err(self.fail_stage(index, e)),
            other => other,
        }
    }

    pub fn get_parameter(&self, handle: i32, kind: ParamKind) -> Result<Param> {
        self.require("get parameter", &[RecorderState::Recording, RecorderState::Paused])?;
        let index = self.index_of(handle)?;
        self.stages[index].get_parameter(kind)
    }
}

impl Drop for RecorderPipeline {
    fn drop(&mut self) {
        if self.pump.is_some() || self.stages.iter().any(|s| s.state().is_active()) {
            if let Err(e) = self.halt_stages() {
                warn!("recorder: teardown failed: {}", e);
            }
        }
    }
}

fn pump(
    puller: FramePuller,
    inputs: Vec<(i32, FrameInput)>,
    health: Arc<PipelineHealth>,
    shared: Arc<Shared>,
) {
    if let Some(header) = puller.codec_data() {
        for (handle, input) in &inputs {
            if let Err(e) = input.push_header(header.clone()) {
                warn!("stage {} refused codec header: {}", handle, e);
            }
        }
    }

    while let Some(frame) = puller.fetch_frame() {
        let (size, is_keyframe) = (frame.size(), frame.is_keyframe);
        let mut delivered = false;
        for (handle, input) in &inputs {
            match input.push_frame(frame.clone()) {
                Ok(()) => delivered = true,
                Err(e) => debug!("stage {} refused frame: {}", handle, e),
            }
        }
        if delivered {
            health.record_frame(size, is_keyframe);
        } else {
            health.record_frame_drop();
        }
    }

    if !shared.stopping.load(Ordering::Acquire) {
        info!("recorder: source reached end of stream");
        let _ = shared.events.send(RecorderEvent::EndOfStream);
    }
    debug!("recorder: pump exiting");
}
