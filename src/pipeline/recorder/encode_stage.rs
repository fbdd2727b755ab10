//! Encoder stages
//!
//! Encoding itself is done by the external backend; these stages hold the
//! encoder settings, gate readiness on them and accept bitrate changes while
//! running.

use std::collections::BTreeMap;

use log::info;

use crate::error::{MediaError, Result};
use crate::pipeline::params::{Param, ParamKind};
use crate::pipeline::stage::{CreateParam, ElementCore, PipelineElement, StageKind};
use crate::pipeline::types::MediaKind;

const VIDEO_REQUIRED: &[ParamKind] = &[
    ParamKind::VideoEncoder,
    ParamKind::VideoSize,
    ParamKind::VideoFrameRate,
    ParamKind::VideoBitRate,
];

const AUDIO_REQUIRED: &[ParamKind] = &[
    ParamKind::AudioEncoder,
    ParamKind::AudioSampleRate,
    ParamKind::AudioChannels,
    ParamKind::AudioBitRate,
];

pub struct EncoderStage {
    core: ElementCore,
    media: MediaKind,
    settings: BTreeMap<ParamKind, Param>,
}

impl EncoderStage {
    pub fn video(param: CreateParam) -> Self {
        Self::new(param, MediaKind::Video)
    }

    pub fn audio(param: CreateParam) -> Self {
        Self::new(param, MediaKind::Audio)
    }

    fn new(param: CreateParam, media: MediaKind) -> Self {
        Self {
            core: ElementCore::new(param, StageKind::Encoder),
            media,
            settings: BTreeMap::new(),
        }
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    fn bitrate_kind(&self) -> ParamKind {
        match self.media {
            MediaKind::Video => ParamKind::VideoBitRate,
            MediaKind::Audio => ParamKind::AudioBitRate,
        }
    }

    fn describe(&self) -> String {
        self.settings
            .values()
            .map(|p| format!("{:?}", p))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PipelineElement for EncoderStage {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn required_params(&self) -> &'static [ParamKind] {
        match self.media {
            MediaKind::Video => VIDEO_REQUIRED,
            MediaKind::Audio => AUDIO_REQUIRED,
        }
    }

    fn accepts(&self, kind: ParamKind) -> bool {
        self.required_params().contains(&kind)
    }

    fn accepts_dynamic(&self, kind: ParamKind) -> bool {
        kind == self.bitrate_kind()
    }

    fn on_configure(&mut self, param: &Param) -> Result<()> {
        self.settings.insert(param.kind(), param.clone());
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        info!("{}: {} encoder started [{}]", self.name(), self.media, self.describe());
        Ok(())
    }

    fn on_reset(&mut self) {
        self.settings.clear();
    }

    fn on_set_parameter(&mut self, param: &Param) -> Result<()> {
        info!("{}: bitrate change {:?}", self.name(), param);
        self.settings.insert(param.kind(), param.clone());
        Ok(())
    }

    fn on_get_parameter(&self, kind: ParamKind) -> Result<Param> {
        self.settings.get(&kind).cloned().ok_or_else(|| {
            MediaError::invalid_parameter(format!("{} has no {:?}", self.name(), kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::params::{AudioCodec, VideoCodec};

    fn video_params() -> Vec<Param> {
        vec![
            Param::VideoEncoder(VideoCodec::H264),
            Param::VideoSize {
                width: 1280,
                height: 720,
            },
            Param::VideoFrameRate(30),
            Param::VideoBitRate(4_000_000),
        ]
    }

    #[test]
    fn test_video_encoder_readiness() {
        let mut encoder = EncoderStage::video(CreateParam::new(2, "venc"));
        encoder.init().unwrap();
        for param in video_params().into_iter().skip(1) {
            encoder.configure(param).unwrap();
        }
        assert_eq!(
            encoder.check_config_ready(),
            Err(MediaError::NotConfigured {
                stage: "venc".to_string(),
                missing: vec![ParamKind::VideoEncoder],
            })
        );

        encoder.configure(Param::VideoEncoder(VideoCodec::H265)).unwrap();
        encoder.prepare().unwrap();
    }

    #[test]
    fn test_bitrate_is_dynamic() {
        let mut encoder = EncoderStage::video(CreateParam::new(2, "venc"));
        encoder.init().unwrap();
        for param in video_params() {
            encoder.configure(param).unwrap();
        }
        encoder.prepare().unwrap();
        encoder.start().unwrap();

        encoder.set_parameter(Param::VideoBitRate(2_500_000)).unwrap();
        assert_eq!(
            encoder.get_parameter(ParamKind::VideoBitRate),
            Ok(Param::VideoBitRate(2_500_000))
        );
        assert!(matches!(
            encoder.set_parameter(Param::VideoFrameRate(60)),
            Err(MediaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_audio_encoder_rejects_video_params() {
        let mut encoder = EncoderStage::audio(CreateParam::new(3, "aenc"));
        encoder.init().unwrap();
        assert!(matches!(
            encoder.configure(Param::VideoBitRate(1)),
            Err(MediaError::InvalidParameter(_))
        ));
        encoder.configure(Param::AudioEncoder(AudioCodec::Opus)).unwrap();
        encoder.configure(Param::AudioSampleRate(48_000)).unwrap();
        encoder.configure(Param::AudioChannels(2)).unwrap();
        encoder.configure(Param::AudioBitRate(128_000)).unwrap();
        encoder.prepare().unwrap();
        assert_eq!(encoder.media(), MediaKind::Audio);
    }
}
