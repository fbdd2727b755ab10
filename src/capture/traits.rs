//! Contract of an external frame provider

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::pipeline::params::StreamType;
use crate::pipeline::types::Timestamp;

/// One buffer handed out by a provider.
///
/// The payload is moved into the pipeline frame as is.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub pts: Timestamp,
    pub duration: Duration,
    pub is_keyframe: bool,
}

/// Producer of captured (or pre-encoded) video buffers.
///
/// Every method takes `&self`: `get_frame_buffer` blocks on a consumer thread
/// while the control thread calls `stop`, which must wake it.
pub trait CaptureProvider: Send + Sync {
    fn prepare(&self) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    fn set_surface_width(&self, width: u32);

    fn set_surface_height(&self, height: u32);

    /// Block until the next buffer is available. `None` once stopped or exhausted.
    fn get_frame_buffer(&self) -> Option<CapturedFrame>;

    /// Out-of-band codec header (parameter sets), if the stream has one.
    fn get_codec_buffer(&self) -> Option<Bytes>;
}

/// Builds the provider for a configured stream type.
pub type ProviderFactory =
    Arc<dyn Fn(StreamType) -> Result<Arc<dyn CaptureProvider>> + Send + Sync>;
