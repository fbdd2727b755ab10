//! Core types for the pipeline system

use bytes::Bytes;
use std::time::Duration;

/// Timestamp representation for media frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Microseconds since pipeline start
    pub micros: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { micros: 0 };

    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from duration since pipeline start
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as i64,
        }
    }

    /// Add a duration to this timestamp
    pub fn add(&self, duration: Duration) -> Self {
        Self {
            micros: self.micros + duration.as_micros() as i64,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// A single frame handed from a source to its consumers.
///
/// `data` is reference counted, so moving a frame between stages never copies
/// the payload.
#[derive(Clone)]
pub struct MediaFrame {
    /// Kind of media (video or audio)
    pub kind: MediaKind,

    /// Encoded or raw media data
    pub data: Bytes,

    /// Presentation timestamp
    pub pts: Timestamp,

    /// How long this frame is presented
    pub duration: Duration,

    /// Whether this is a keyframe (for video) or important sync point
    pub is_keyframe: bool,

    /// Frame width (for video only)
    pub width: Option<u32>,

    /// Frame height (for video only)
    pub height: Option<u32>,
}

impl MediaFrame {
    /// Create a new video frame
    pub fn video(
        data: Bytes,
        pts: Timestamp,
        duration: Duration,
        is_keyframe: bool,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            kind: MediaKind::Video,
            data,
            pts,
            duration,
            is_keyframe,
            width: Some(width),
            height: Some(height),
        }
    }

    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for MediaFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("MediaFrame");
        debug
            .field("kind", &self.kind)
            .field("pts", &self.pts)
            .field("duration", &self.duration)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.size());

        if let Some(width) = self.width {
            debug.field("width", &width);
        }
        if let Some(height) = self.height {
            debug.field("height", &height);
        }

        debug.finish()
    }
}

/// Check if H.264 Annex B data contains an IDR NAL unit (type 5)
pub fn contains_idr(data: &[u8]) -> bool {
    let start_code: &[u8] = &[0, 0, 0, 1];
    let mut i = 0;
    while i + 4 < data.len() {
        if &data[i..i + 4] == start_code {
            if (data[i + 4] & 0x1F) == 5 {
                return true;
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_add() {
        let ts = Timestamp::from_micros(1_000).add(Duration::from_millis(2));
        assert_eq!(ts.micros, 3_000);
        assert!(Timestamp::ZERO < ts);
    }

    #[test]
    fn test_contains_idr() {
        assert!(contains_idr(&[0, 0, 0, 1, 0x65, 0xAA]));
        assert!(!contains_idr(&[0, 0, 0, 1, 0x41, 0xAA]));
        assert!(contains_idr(&[0, 0, 0, 1, 0x67, 0x01, 0, 0, 0, 1, 0x65, 0x00]));
        assert!(!contains_idr(&[0, 0, 1]));
    }
}
