//! Record-side stages and the pipeline driving them
//!
//! ```text
//! capture_source ──pump──▶ muxer / frame_sink
//!        video_encoder / audio_encoder (settings only)
//! ```

mod builder;
mod capture_stage;
mod coordinator;
mod encode_stage;
mod mux_stage;
mod sink_stage;

use log::warn;

use crate::error::Result;
use crate::pipeline::registry::ElementRegistry;
use crate::pipeline::stage::{CreateParam, PipelineElement};

pub use builder::RecorderPipelineBuilder;
pub use capture_stage::{CaptureSource, FramePuller};
pub use coordinator::{RecorderEvent, RecorderPipeline, RecorderState};
pub use encode_stage::EncoderStage;
pub use mux_stage::{MuxStats, MuxerStage};
pub use sink_stage::FrameSink;

pub const CAPTURE_SOURCE: &str = "capture_source";
pub const VIDEO_ENCODER: &str = "video_encoder";
pub const AUDIO_ENCODER: &str = "audio_encoder";
pub const MUXER: &str = "muxer";
pub const FRAME_SINK: &str = "frame_sink";

fn create_capture_source(param: CreateParam) -> Result<Box<dyn PipelineElement>> {
    Ok(Box::new(CaptureSource::new(param)))
}

fn create_video_encoder(param: CreateParam) -> Result<Box<dyn PipelineElement>> {
    Ok(Box::new(EncoderStage::video(param)))
}

fn create_audio_encoder(param: CreateParam) -> Result<Box<dyn PipelineElement>> {
    Ok(Box::new(EncoderStage::audio(param)))
}

fn create_muxer(param: CreateParam) -> Result<Box<dyn PipelineElement>> {
    Ok(Box::new(MuxerStage::new(param)))
}

fn create_frame_sink(param: CreateParam) -> Result<Box<dyn PipelineElement>> {
    Ok(Box::new(FrameSink::new(param)))
}

/// Register the built-in stages under their stable keys.
pub(crate) fn register_builtin(registry: &ElementRegistry) {
    type Ctor = fn(CreateParam) -> Result<Box<dyn PipelineElement>>;
    let builtin: [(&str, Ctor); 5] = [
        (CAPTURE_SOURCE, create_capture_source),
        (VIDEO_ENCODER, create_video_encoder),
        (AUDIO_ENCODER, create_audio_encoder),
        (MUXER, create_muxer),
        (FRAME_SINK, create_frame_sink),
    ];
    for (key, ctor) in builtin {
        if let Err(e) = registry.register_element(key, ctor) {
            warn!("built-in element '{}' not registered: {}", key, e);
        }
    }
}
