//! Contract of the external media backend driven by [`PlayerEngine`](super::PlayerEngine).

use std::sync::Arc;

use crate::error::{MediaError, Result};

bitflags::bitflags! {
    /// Backend seek flags, combinable with `|`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeekFlags: u32 {
        /// Discard queued data before seeking.
        const FLUSH = 1 << 0;
        /// Land on a sync point.
        const KEY_UNIT = 1 << 1;
        const SNAP_BEFORE = 1 << 2;
        const SNAP_AFTER = 1 << 3;
        const SNAP_NEAREST = 1 << 4;
        /// Land exactly on the requested position.
        const ACCURATE = 1 << 5;
    }
}

/// Where a seek lands relative to the requested position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    PreviousSyncPoint,
    NextSyncPoint,
    ClosestSyncPoint,
    ClosestFrame,
}

impl SeekMode {
    /// Backend flags for this mode. Every seek flushes.
    pub fn flags(&self) -> SeekFlags {
        match self {
            SeekMode::PreviousSyncPoint => {
                SeekFlags::FLUSH | SeekFlags::KEY_UNIT | SeekFlags::SNAP_BEFORE
            }
            SeekMode::NextSyncPoint => SeekFlags::FLUSH | SeekFlags::KEY_UNIT | SeekFlags::SNAP_AFTER,
            SeekMode::ClosestSyncPoint => {
                SeekFlags::FLUSH | SeekFlags::KEY_UNIT | SeekFlags::SNAP_NEAREST
            }
            SeekMode::ClosestFrame => SeekFlags::FLUSH | SeekFlags::ACCURATE,
        }
    }
}

/// Opaque render target handed through to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// What the backend needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSetup {
    pub uri: String,
    pub surface: Option<Surface>,
}

/// Asynchronous reports from the backend.
///
/// Backends must not hold their own locks while calling these.
pub trait BackendListener: Send + Sync {
    /// Preroll finished after [`MediaBackend::prepare`].
    fn on_prepared(&self);

    fn on_eos(&self);

    fn on_error(&self, error: MediaError);
}

/// External media engine.
///
/// Positions are in milliseconds. `deinit` on a backend that was never
/// initialized is a no-op; calls other than `init` and `deinit` on such a
/// backend fail.
pub trait MediaBackend: Send + Sync {
    fn set_listener(&self, listener: Arc<dyn BackendListener>);

    fn init(&self, setup: &BackendSetup) -> Result<()>;

    fn deinit(&self);

    /// Start prerolling. Completion is reported through the listener.
    fn prepare(&self) -> Result<()>;

    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn set_rate(&self, rate: f64) -> Result<()>;

    fn get_rate(&self) -> Result<f64>;

    fn set_volume(&self, left: f32, right: f32) -> Result<()>;

    fn seek(&self, position_ms: u64, flags: SeekFlags) -> Result<()>;

    fn query_position(&self) -> Result<u64>;

    fn query_duration(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_flags() {
        let flags = SeekMode::ClosestSyncPoint.flags();
        assert!(flags.contains(SeekFlags::FLUSH));
        assert!(flags.contains(SeekFlags::KEY_UNIT | SeekFlags::SNAP_NEAREST));
        assert!(!flags.contains(SeekFlags::ACCURATE));

        let flags = SeekMode::ClosestFrame.flags();
        assert_eq!(flags, SeekFlags::FLUSH | SeekFlags::ACCURATE);
        assert!(!flags.intersects(SeekFlags::KEY_UNIT | SeekFlags::SNAP_NEAREST));
        assert_eq!(flags.bits(), 0b10_0001);
    }

    #[test]
    fn test_modes_map_to_distinct_flags() {
        let modes = [
            SeekMode::PreviousSyncPoint,
            SeekMode::NextSyncPoint,
            SeekMode::ClosestSyncPoint,
            SeekMode::ClosestFrame,
        ];
        for (i, a) in modes.iter().enumerate() {
            for b in &modes[i + 1..] {
                assert_ne!(a.flags(), b.flags());
            }
        }
    }
}
