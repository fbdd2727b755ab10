//! Record-side pipeline layer
//!
//! Separates the concerns of the record path:
//! - Lifecycle: the [`PipelineElement`] contract and its [`ElementState`] graph
//! - Readiness: [`ParameterTracker`] gating `prepare` on configured parameters
//! - Assembly: the process-wide [`ElementRegistry`] and the recorder builder
//! - Transport: [`MediaFrame`]s pulled from the source and pushed to consumers
//!
//! # Architecture
//!
//! Stages are created by key from the registry, configured through typed
//! [`Param`]s and driven in order by `recorder::RecorderPipeline`. The source
//! is pulled by a pump thread; every consuming stage exposes a
//! [`FrameInput`]. Health counters track throughput and drops.

pub mod health;
pub mod params;
pub mod recorder;
pub mod registry;
pub mod stage;
pub mod state;
pub mod types;

pub use health::PipelineHealth;
pub use params::{
    AudioCodec, ContainerFormat, Param, ParamKind, ParameterTracker, StreamType, VideoCodec,
};
pub use registry::ElementRegistry;
pub use stage::{
    CreateParam, ElementCore, ElementMessage, FrameConsumer, FrameInput, Notifier,
    PipelineElement, StageDescriptor, StageKind,
};
pub use state::ElementState;
pub use types::{MediaFrame, MediaKind, Timestamp};
