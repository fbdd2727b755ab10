//! Stage parameters and the per-stage configured-parameter tracker

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Kind of a stage parameter, used as the key for readiness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKind {
    VideoEncoder,
    VideoSize,
    VideoFrameRate,
    VideoBitRate,
    AudioEncoder,
    AudioSampleRate,
    AudioChannels,
    AudioBitRate,
    SourceStreamType,
    OutputFormat,
    OutputPath,
    MaxDuration,
    MaxFileSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Mpeg4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Opus,
}

/// What the capture provider hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Encoded AVC elementary stream; needs out-of-band codec data.
    EsAvc,
    /// Raw NV12 frames.
    Yuv420,
}

impl StreamType {
    pub fn needs_codec_data(&self) -> bool {
        matches!(self, StreamType::EsAvc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Mpegts,
    /// Bare elementary stream, frames written back to back.
    Raw,
}

/// One stage parameter with its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    VideoEncoder(VideoCodec),
    VideoSize { width: u32, height: u32 },
    VideoFrameRate(u32),
    VideoBitRate(u32),
    AudioEncoder(AudioCodec),
    AudioSampleRate(u32),
    AudioChannels(u16),
    AudioBitRate(u32),
    SourceStreamType(StreamType),
    OutputFormat(ContainerFormat),
    OutputPath(PathBuf),
    MaxDuration(Duration),
    MaxFileSize(u64),
}

impl Param {
    pub fn kind(&self) -> ParamKind {
        match self {
            Param::VideoEncoder(_) => ParamKind::VideoEncoder,
            Param::VideoSize { .. } => ParamKind::VideoSize,
            Param::VideoFrameRate(_) => ParamKind::VideoFrameRate,
            Param::VideoBitRate(_) => ParamKind::VideoBitRate,
            Param::AudioEncoder(_) => ParamKind::AudioEncoder,
            Param::AudioSampleRate(_) => ParamKind::AudioSampleRate,
            Param::AudioChannels(_) => ParamKind::AudioChannels,
            Param::AudioBitRate(_) => ParamKind::AudioBitRate,
            Param::SourceStreamType(_) => ParamKind::SourceStreamType,
            Param::OutputFormat(_) => ParamKind::OutputFormat,
            Param::OutputPath(_) => ParamKind::OutputPath,
            Param::MaxDuration(_) => ParamKind::MaxDuration,
            Param::MaxFileSize(_) => ParamKind::MaxFileSize,
        }
    }

    /// Range check shared by every stage. Returns a description of the problem.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Param::VideoSize { width, height } if *width == 0 || *height == 0 => {
                Err(format!("video size {}x{} must be non-zero", width, height))
            }
            Param::VideoFrameRate(0) => Err("frame rate must be non-zero".to_string()),
            Param::VideoBitRate(0) | Param::AudioBitRate(0) => {
                Err("bit rate must be non-zero".to_string())
            }
            Param::AudioSampleRate(0) => Err("sample rate must be non-zero".to_string()),
            Param::AudioChannels(c) if *c == 0 || *c > 8 => {
                Err(format!("channel count {} out of range 1..=8", c))
            }
            Param::OutputPath(p) if p.as_os_str().is_empty() => {
                Err("output path is empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Set of parameter kinds configured on one stage.
///
/// Only grows while a stage is being configured; [`clear`](Self::clear) is
/// reserved for stage reset.
#[derive(Debug, Clone, Default)]
pub struct ParameterTracker {
    configured: BTreeSet<ParamKind>,
}

impl ParameterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, kind: ParamKind) {
        self.configured.insert(kind);
    }

    pub fn check(&self, kind: ParamKind) -> bool {
        self.configured.contains(&kind)
    }

    /// True iff every kind in `expected` is configured.
    pub fn all_configured(&self, expected: &[ParamKind]) -> bool {
        expected.iter().all(|k| self.configured.contains(k))
    }

    /// True iff at least one kind in `expected` is configured.
    pub fn any_configured(&self, expected: &[ParamKind]) -> bool {
        expected.iter().any(|k| self.configured.contains(k))
    }

    /// Kinds from `expected` not configured yet, in `ParamKind` order.
    pub fn missing(&self, expected: &[ParamKind]) -> Vec<ParamKind> {
        let missing: BTreeSet<ParamKind> = expected
            .iter()
            .filter(|k| !self.configured.contains(k))
            .copied()
            .collect();
        missing.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.configured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configured.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.configured.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[ParamKind] = &[
        ParamKind::VideoEncoder,
        ParamKind::VideoSize,
        ParamKind::VideoBitRate,
    ];

    #[test]
    fn test_all_configured_any_order() {
        let orders: [[ParamKind; 3]; 3] = [
            [ParamKind::VideoEncoder, ParamKind::VideoSize, ParamKind::VideoBitRate],
            [ParamKind::VideoBitRate, ParamKind::VideoEncoder, ParamKind::VideoSize],
            [ParamKind::VideoSize, ParamKind::VideoBitRate, ParamKind::VideoEncoder],
        ];

        for order in orders {
            let mut tracker = ParameterTracker::new();
            for (i, kind) in order.iter().enumerate() {
                assert!(!tracker.all_configured(REQUIRED));
                tracker.mark(*kind);
                if i < order.len() - 1 {
                    assert!(!tracker.all_configured(REQUIRED));
                }
            }
            assert!(tracker.all_configured(REQUIRED));

            // duplicate marks keep it true
            tracker.mark(order[0]);
            tracker.mark(order[0]);
            assert!(tracker.all_configured(REQUIRED));
            assert_eq!(tracker.len(), 3);
        }
    }

    #[test]
    fn test_any_configured() {
        let mut tracker = ParameterTracker::new();
        let outputs = [ParamKind::OutputPath, ParamKind::MaxFileSize];
        assert!(!tracker.any_configured(&outputs));
        tracker.mark(ParamKind::VideoSize);
        assert!(!tracker.any_configured(&outputs));
        tracker.mark(ParamKind::MaxFileSize);
        assert!(tracker.any_configured(&outputs));
        assert!(!tracker.any_configured(&[]));
    }

    #[test]
    fn test_missing_is_ordered() {
        let mut tracker = ParameterTracker::new();
        tracker.mark(ParamKind::VideoSize);
        assert_eq!(
            tracker.missing(&[ParamKind::VideoBitRate, ParamKind::VideoSize, ParamKind::VideoEncoder]),
            vec![ParamKind::VideoEncoder, ParamKind::VideoBitRate]
        );
        assert!(tracker.check(ParamKind::VideoSize));
        assert!(!tracker.check(ParamKind::VideoEncoder));
    }

    #[test]
    fn test_param_validation() {
        assert!(Param::VideoSize { width: 0, height: 720 }.validate().is_err());
        assert!(Param::VideoBitRate(0).validate().is_err());
        assert!(Param::AudioChannels(9).validate().is_err());
        assert!(Param::VideoFrameRate(30).validate().is_ok());
        assert_eq!(Param::MaxFileSize(1).kind(), ParamKind::MaxFileSize);
    }
}
