//! Pipeline element contract
//!
//! Every stage of the record pipeline (source, encoder, muxer, sink) owns an
//! [`ElementCore`] and implements the `on_*` hooks of [`PipelineElement`].
//! The provided lifecycle methods validate the state graph, apply the
//! parameter tracker and call the hooks, so a concrete stage only deals with
//! its own resources.
//!
//! A single stage is driven by one caller at a time; the element does not
//! serialize lifecycle calls internally.

use std::sync::Arc;

use log::debug;

use super::params::{Param, ParamKind, ParameterTracker};
use super::recorder::FramePuller;
use super::state::ElementState;
use super::types::MediaFrame;
use crate::error::{MediaError, Result};

/// Kind of pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Source,
    Encoder,
    Muxer,
    Sink,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Source => write!(f, "Source"),
            StageKind::Encoder => write!(f, "Encoder"),
            StageKind::Muxer => write!(f, "Muxer"),
            StageKind::Sink => write!(f, "Sink"),
        }
    }
}

/// Arguments handed to a registry constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParam {
    pub handle: i32,
    pub name: String,
}

impl CreateParam {
    pub fn new(handle: i32, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }
}

/// Identity and configuration record of one stage.
///
/// Handle and name are fixed at construction.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    handle: i32,
    name: String,
    kind: StageKind,
    tracker: ParameterTracker,
}

impl StageDescriptor {
    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn tracker(&self) -> &ParameterTracker {
        &self.tracker
    }
}

/// Asynchronous report from a stage to its owning pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementMessage {
    /// All buffered output has been flushed after `drain_all`.
    DrainComplete,
    /// The stage failed outside of a lifecycle call.
    Error(MediaError),
}

/// Callback receiving `(handle, message)`.
pub type Notifier = Arc<dyn Fn(i32, ElementMessage) + Send + Sync>;

/// Push side of a stage that consumes frames (muxer, sink).
pub trait FrameConsumer: Send + Sync {
    fn push_frame(&self, frame: MediaFrame) -> Result<()>;

    /// Out-of-band codec header, delivered once before the first frame.
    fn push_header(&self, _header: bytes::Bytes) -> Result<()> {
        Ok(())
    }
}

pub type FrameInput = Arc<dyn FrameConsumer>;

/// State shared by every element implementation.
pub struct ElementCore {
    descriptor: StageDescriptor,
    state: ElementState,
    notifier: Option<Notifier>,
}

impl ElementCore {
    pub fn new(param: CreateParam, kind: StageKind) -> Self {
        Self {
            descriptor: StageDescriptor {
                handle: param.handle,
                name: param.name,
                kind,
                tracker: ParameterTracker::new(),
            },
            state: ElementState::Created,
            notifier: None,
        }
    }

    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ElementState {
        self.state
    }

    /// Clone of the installed notifier, for stage worker threads.
    pub fn notifier(&self) -> Option<Notifier> {
        self.notifier.clone()
    }

    pub fn notify(&self, message: ElementMessage) {
        if let Some(notifier) = &self.notifier {
            notifier(self.descriptor.handle, message);
        }
    }

    /// Assembly-time only; see `RecorderPipelineBuilder`.
    pub(crate) fn set_notifier(&mut self, notifier: Notifier) {
        self.notifier = Some(notifier);
    }

    /// Move along the element state graph; an edge not in the graph fails
    /// and leaves the state untouched.
    fn transition(&mut self, op: &'static str, target: ElementState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            return Err(MediaError::invalid_state(op, self.state));
        }
        debug!("{}: {} -> {}", self.descriptor.name, self.state, target);
        self.state = target;
        Ok(())
    }

    fn require(&self, op: &'static str, allowed: &[ElementState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MediaError::invalid_state(op, self.state))
        }
    }
}

/// Lifecycle contract of a pipeline stage.
pub trait PipelineElement: Send {
    fn core(&self) -> &ElementCore;

    fn core_mut(&mut self) -> &mut ElementCore;

    /// Parameter kinds that must all be configured before `prepare`.
    fn required_params(&self) -> &'static [ParamKind];

    /// Group of kinds of which at least one must be configured.
    fn required_any_of(&self) -> &'static [ParamKind] {
        &[]
    }

    /// Whether `configure` accepts this kind.
    fn accepts(&self, kind: ParamKind) -> bool;

    /// Whether `set_parameter` accepts this kind while running.
    fn accepts_dynamic(&self, _kind: ParamKind) -> bool {
        false
    }

    fn on_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Store one static parameter. Kind and range are already checked.
    fn on_configure(&mut self, param: &Param) -> Result<()>;

    fn on_prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired since `init`.
    fn on_reset(&mut self) {}

    fn on_set_parameter(&mut self, param: &Param) -> Result<()> {
        Err(MediaError::invalid_parameter(format!(
            "{:?} is not a dynamic parameter of {}",
            param.kind(),
            self.name()
        )))
    }

    fn on_get_parameter(&self, kind: ParamKind) -> Result<Param>;

    fn handle(&self) -> i32 {
        self.core().descriptor().handle()
    }

    fn name(&self) -> &str {
        self.core().descriptor().name()
    }

    fn kind(&self) -> StageKind {
        self.core().descriptor().kind()
    }

    fn state(&self) -> ElementState {
        self.core().state()
    }

    /// Allocate resources. Calling it again is a no-op.
    fn init(&mut self) -> Result<()> {
        if self.state() != ElementState::Created {
            return Ok(());
        }
        self.on_init()?;
        self.core_mut().transition("init", ElementState::Initialized)
    }

    /// Merge one static parameter into the descriptor.
    fn configure(&mut self, param: Param) -> Result<()> {
        self.core()
            .require("configure", &[ElementState::Initialized, ElementState::Configured])?;
        let kind = param.kind();
        if !self.accepts(kind) {
            return Err(MediaError::invalid_parameter(format!(
                "{} does not accept {:?}",
                self.name(),
                kind
            )));
        }
        param.validate().map_err(MediaError::InvalidParameter)?;
        self.on_configure(&param)?;

        let core = self.core_mut();
        core.descriptor.tracker.mark(kind);
        if core.state != ElementState::Configured {
            core.transition("configure", ElementState::Configured)?;
        }
        Ok(())
    }

    /// Fails with `NotConfigured` listing exactly the kinds still missing.
    fn check_config_ready(&self) -> Result<()> {
        let tracker = self.core().descriptor().tracker();
        let mut missing = tracker.missing(self.required_params());

        let any_of = self.required_any_of();
        if !any_of.is_empty() && !tracker.any_configured(any_of) {
            missing.extend_from_slice(any_of);
            missing.sort();
            missing.dedup();
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MediaError::NotConfigured {
                stage: self.name().to_string(),
                missing,
            })
        }
    }

    fn prepare(&mut self) -> Result<()> {
        self.core()
            .require("prepare", &[ElementState::Initialized, ElementState::Configured])?;
        self.check_config_ready()?;
        self.on_prepare()?;
        self.core_mut().transition("prepare", ElementState::Ready)
    }

    fn start(&mut self) -> Result<()> {
        self.core().require("start", &[ElementState::Ready])?;
        self.on_start()?;
        self.core_mut().transition("start", ElementState::Running)
    }

    fn pause(&mut self) -> Result<()> {
        self.core().require("pause", &[ElementState::Running])?;
        self.on_pause()?;
        self.core_mut().transition("pause", ElementState::Paused)
    }

    fn resume(&mut self) -> Result<()> {
        self.core().require("resume", &[ElementState::Paused])?;
        self.on_resume()?;
        self.core_mut().transition("resume", ElementState::Running)
    }

    /// Flush buffered output ahead of `stop`.
    ///
    /// Returns `true` when the caller must wait for
    /// [`ElementMessage::DrainComplete`] before stopping.
    fn drain_all(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// The stage ends up `Stopped` even when its stop hook fails; the error is
    /// still returned.
    fn stop(&mut self) -> Result<()> {
        self.core().require(
            "stop",
            &[ElementState::Ready, ElementState::Running, ElementState::Paused],
        )?;
        self.core_mut().transition("stop", ElementState::Stopping)?;
        let res = self.on_stop();
        self.core_mut().transition("stop", ElementState::Stopped)?;
        res
    }

    /// Back to `Initialized`, forgetting every configured parameter.
    fn reset(&mut self) -> Result<()> {
        if self.state() == ElementState::Created {
            return Err(MediaError::invalid_state("reset", ElementState::Created));
        }
        self.on_reset();
        let core = self.core_mut();
        core.descriptor.tracker.clear();
        core.transition("reset", ElementState::Initialized)
    }

    fn set_parameter(&mut self, param: Param) -> Result<()> {
        self.core()
            .require("set parameter", &[ElementState::Running, ElementState::Paused])?;
        if !self.accepts_dynamic(param.kind()) {
            return Err(MediaError::invalid_parameter(format!(
                "{:?} is not a dynamic parameter of {}",
                param.kind(),
                self.name()
            )));
        }
        param.validate().map_err(MediaError::InvalidParameter)?;
        self.on_set_parameter(&param)
    }

    fn get_parameter(&self, kind: ParamKind) -> Result<Param> {
        self.core()
            .require("get parameter", &[ElementState::Running, ElementState::Paused])?;
        self.on_get_parameter(kind)
    }

    /// Pull handle for source stages.
    fn frame_puller(&self) -> Option<FramePuller> {
        None
    }

    /// Push handle for stages that consume frames.
    fn frame_input(&self) -> Option<FrameInput> {
        None
    }
}
