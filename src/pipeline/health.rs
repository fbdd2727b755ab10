//! Health metrics for the record pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Health metrics for a pipeline
///
/// Tracks counters for the frames flowing from the source to the outputs.
/// All counters use atomic operations for thread-safe access.
pub struct PipelineHealth {
    /// Number of frames dropped because no output accepted them
    pub frame_drops: AtomicU64,

    /// Number of frames successfully written
    pub frames_processed: AtomicU64,

    /// Total bytes of data written
    pub bytes_processed: AtomicU64,

    /// Number of keyframes written
    pub keyframes_processed: AtomicU64,

    last_frame: Mutex<Option<Instant>>,
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            frame_drops: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            keyframes_processed: AtomicU64::new(0),
            last_frame: Mutex::new(None),
        }
    }

    /// Record a dropped frame
    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully processed frame
    pub fn record_frame(&self, size: usize, is_keyframe: bool) {
        *self
            .last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed
            .fetch_add(size as u64, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes_processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    pub fn keyframes_processed(&self) -> u64 {
        self.keyframes_processed.load(Ordering::Relaxed)
    }

    /// Calculate the frame drop rate as a percentage
    pub fn frame_drop_rate(&self) -> f64 {
        let drops = self.frame_drops();
        let processed = self.frames_processed();
        if processed == 0 {
            return 0.0;
        }
        (drops as f64 / processed as f64) * 100.0
    }

    /// Check if the pipeline has stalled (no frames for given duration).
    /// A pipeline that never produced a frame is not considered stalled.
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        match *self.last_frame.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(last) => last.elapsed() > threshold,
            None => false,
        }
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_processed: self.frames_processed(),
            frame_drops: self.frame_drops(),
            bytes_processed: self.bytes_processed(),
            keyframes_processed: self.keyframes_processed(),
            frame_drop_rate: self.frame_drop_rate(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub frames_processed: u64,
    pub frame_drops: u64,
    pub bytes_processed: u64,
    pub keyframes_processed: u64,
    pub frame_drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames ({} drops, {:.2}%), {} bytes, {} keyframes",
            self.frames_processed,
            self.frame_drops,
            self.frame_drop_rate,
            self.bytes_processed,
            self.keyframes_processed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_frame(1000, false);
        health.record_frame(2000, true);
        health.record_frame(1500, false);

        assert_eq!(health.frames_processed(), 3);
        assert_eq!(health.bytes_processed(), 4500);
        assert_eq!(health.keyframes_processed(), 1);
        assert_eq!(health.frame_drops(), 0);

        health.record_frame_drop();
        health.record_frame_drop();

        assert_eq!(health.frame_drops(), 2);
        assert!(health.frame_drop_rate() > 0.0);
        assert!(health.summary().to_string().contains("3 frames"));
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();
        assert!(!health.is_stalled(Duration::from_millis(1)));

        health.record_frame(1000, false);
        std::thread::sleep(Duration::from_millis(150));
        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
