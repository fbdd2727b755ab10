pub const FRAME_RATE: u32 = 30;
pub const FRAME_WIDTH: u32 = 1280;
pub const FRAME_HEIGHT: u32 = 720;

pub const VIDEO_BIT_RATE: u32 = 4_000_000;

// synthetic capture
pub const GOP_LENGTH: u64 = 30;

// playback
pub const DEFAULT_MEDIA_DURATION_MS: u64 = 60_000;
pub const SYNC_POINT_INTERVAL_MS: u64 = 500;

// muxer writer queue, in frames
pub const MUX_QUEUE_CAPACITY: usize = 16;
