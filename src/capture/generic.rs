use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info};

use crate::assets::{FRAME_RATE, GOP_LENGTH};
use crate::capture::{CaptureProvider, CapturedFrame, ProviderFactory};
use crate::error::{MediaError, Result};
use crate::pipeline::params::StreamType;
use crate::pipeline::types::Timestamp;
use crate::utils::sos::SignalOfStop;

// Baseline profile SPS + PPS, Annex B
const CODEC_HEADER: &[u8] = &[
    0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0x40, 0x16, 0xE8, 0x40, 0, 0, 0, 1, 0x68, 0xCE,
    0x3C, 0x80,
];

#[derive(Debug, Clone)]
pub struct SyntheticOpts {
    pub stream_type: StreamType,
    pub frame_rate: u32,
    /// Distance between IDR frames.
    pub gop: u64,
    /// End of stream after this many frames.
    pub max_frames: Option<u64>,
    /// Hold frames to the wall clock; unpaced providers hand frames out as fast as pulled.
    pub paced: bool,
    /// Report no codec header, for exercising start failures.
    pub fail_codec_data: bool,
}

impl Default for SyntheticOpts {
    fn default() -> Self {
        Self {
            stream_type: StreamType::EsAvc,
            frame_rate: FRAME_RATE,
            gop: GOP_LENGTH,
            max_frames: None,
            paced: true,
            fail_codec_data: false,
        }
    }
}

impl SyntheticOpts {
    pub fn with_stream_type(mut self, stream_type: StreamType) -> Self {
        self.stream_type = stream_type;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    pub fn with_paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn with_fail_codec_data(mut self, fail: bool) -> Self {
        self.fail_codec_data = fail;
        self
    }
}

struct Inner {
    width: u32,
    height: u32,
    prepared: bool,
    running: bool,
    next_index: u64,
    anchor: Instant,
    sos: SignalOfStop,
}

/// Deterministic provider producing Annex B access units or black NV12 frames.
pub struct SyntheticCapture {
    opts: SyntheticOpts,
    inner: Mutex<Inner>,
}

impl SyntheticCapture {
    pub fn new(opts: SyntheticOpts) -> Self {
        Self {
            opts,
            inner: Mutex::new(Inner {
                width: 0,
                height: 0,
                prepared: false,
                running: false,
                next_index: 0,
                anchor: Instant::now(),
                sos: SignalOfStop::new(),
            }),
        }
    }

    /// Factory building one provider per prepare, for the configured stream type.
    pub fn factory(opts: SyntheticOpts) -> ProviderFactory {
        Arc::new(move |stream_type| {
            let provider: Arc<dyn CaptureProvider> = Arc::new(SyntheticCapture::new(
                opts.clone().with_stream_type(stream_type),
            ));
            Ok(provider)
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn frame_interval_us(&self) -> u64 {
        1_000_000 / self.opts.frame_rate.max(1) as u64
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us())
    }

    /// Offset of frame `index` from the start of capture.
    fn frame_offset(&self, index: u64) -> Duration {
        Duration::from_micros(self.frame_interval_us().saturating_mul(index))
    }

    fn black_frame(width: u32, height: u32) -> Bytes {
        let w = (width + (width % 2)) as usize;
        let h = (height + (height % 2)) as usize;
        let mut data = vec![0u8; w * h];
        data.resize(w * h + w * h / 2, 128u8);
        Bytes::from(data)
    }

    fn access_unit(index: u64, keyframe: bool, width: u32, height: u32) -> Bytes {
        let payload = ((width as usize * height as usize) / 256).clamp(64, 4096);
        let payload = if keyframe { payload * 4 } else { payload };

        let mut data = Vec::with_capacity(payload + 5);
        data.extend_from_slice(&[0, 0, 0, 1, if keyframe { 0x65 } else { 0x41 }]);
        // never zero, so the payload cannot emulate a start code
        data.extend((0..payload).map(|i| ((index as usize + i) % 251) as u8 | 0x01));
        Bytes::from(data)
    }
}

impl CaptureProvider for SyntheticCapture {
    fn prepare(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.width == 0 || inner.height == 0 {
            return Err(MediaError::backend(format!(
                "invalid surface {}x{}",
                inner.width, inner.height
            )));
        }
        inner.prepared = true;
        debug!("synthetic capture prepared {}x{}", inner.width, inner.height);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.prepared {
            return Err(MediaError::backend("synthetic capture not prepared"));
        }
        inner.running = true;
        inner.next_index = 0;
        inner.anchor = Instant::now();
        inner.sos = SignalOfStop::new();
        info!(
            "synthetic capture started ({:?}, {} fps)",
            self.opts.stream_type, self.opts.frame_rate
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.running = false;
        inner.sos.cancel();
        debug!("synthetic capture stopped after {} frames", inner.next_index);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.running {
            inner.running = true;
            inner.sos = SignalOfStop::new();
        }
        // keep pacing relative to the next frame, not to the original start
        inner.anchor = Instant::now()
            .checked_sub(self.frame_offset(inner.next_index))
            .unwrap_or_else(Instant::now);
        Ok(())
    }

    fn set_surface_width(&self, width: u32) {
        self.lock().width = width;
    }

    fn set_surface_height(&self, height: u32) {
        self.lock().height = height;
    }

    fn get_frame_buffer(&self) -> Option<CapturedFrame> {
        let interval = self.frame_interval();

        let (due, sos) = {
            let inner = self.lock();
            if !inner.running {
                return None;
            }
            if let Some(max) = self.opts.max_frames {
                if inner.next_index >= max {
                    return None;
                }
            }
            (
                inner.anchor + self.frame_offset(inner.next_index),
                inner.sos.clone(),
            )
        };

        if self.opts.paced {
            let wait = due.saturating_duration_since(Instant::now());
            if !wait.is_zero() && sos.sleep(wait) {
                return None;
            }
        }

        let mut inner = self.lock();
        if !inner.running {
            return None;
        }
        let index = inner.next_index;
        inner.next_index += 1;

        let (data, is_keyframe) = match self.opts.stream_type {
            StreamType::EsAvc => {
                let keyframe = index % self.opts.gop.max(1) == 0;
                let data = Self::access_unit(index, keyframe, inner.width, inner.height);
                (data, keyframe)
            }
            StreamType::Yuv420 => (Self::black_frame(inner.width, inner.height), true),
        };

        Some(CapturedFrame {
            data,
            pts: Timestamp::from_duration(self.frame_offset(index)),
            duration: interval,
            is_keyframe,
        })
    }

    fn get_codec_buffer(&self) -> Option<Bytes> {
        if self.opts.fail_codec_data || !self.opts.stream_type.needs_codec_data() {
            return None;
        }
        Some(Bytes::from_static(CODEC_HEADER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::contains_idr;
    use std::thread;

    fn prepared(opts: SyntheticOpts) -> SyntheticCapture {
        let capture = SyntheticCapture::new(opts);
        capture.set_surface_width(320);
        capture.set_surface_height(240);
        capture.prepare().unwrap();
        capture
    }

    #[test]
    fn test_prepare_needs_surface() {
        let capture = SyntheticCapture::new(SyntheticOpts::default());
        assert!(capture.prepare().is_err());
        assert!(capture.start().is_err());
    }

    #[test]
    fn test_gop_and_timestamps() {
        let opts = SyntheticOpts::default().with_paced(false).with_max_frames(31);
        let capture = prepared(opts);
        capture.start().unwrap();

        let frames: Vec<CapturedFrame> = std::iter::from_fn(|| capture.get_frame_buffer()).collect();
        assert_eq!(frames.len(), 31);
        assert!(frames[0].is_keyframe && contains_idr(&frames[0].data));
        assert!(!frames[1].is_keyframe && !contains_idr(&frames[1].data));
        assert!(frames[30].is_keyframe);
        assert!(frames.windows(2).all(|w| w[0].pts < w[1].pts));
    }

    #[test]
    fn test_frame_offset_past_u32_index() {
        let capture = SyntheticCapture::new(SyntheticOpts::default().with_frame_rate(30));
        let index = u32::MAX as u64 + 10;
        assert_eq!(capture.frame_offset(index), Duration::from_micros(33_333 * index));
        assert_eq!(capture.frame_offset(3), Duration::from_micros(99_999));
        assert_eq!(
            capture.frame_offset(u64::MAX),
            Duration::from_micros(u64::MAX)
        );
    }

    #[test]
    fn test_codec_header() {
        let capture = prepared(SyntheticOpts::default());
        let header = capture.get_codec_buffer().unwrap();
        assert_eq!(&header[..5], &[0, 0, 0, 1, 0x67]);

        let raw = prepared(SyntheticOpts::default().with_stream_type(StreamType::Yuv420));
        assert!(raw.get_codec_buffer().is_none());

        let failing = prepared(SyntheticOpts::default().with_fail_codec_data(true));
        assert!(failing.get_codec_buffer().is_none());
    }

    #[test]
    fn test_nv12_frame_size() {
        let capture = prepared(
            SyntheticOpts::default()
                .with_stream_type(StreamType::Yuv420)
                .with_paced(false),
        );
        capture.start().unwrap();
        let frame = capture.get_frame_buffer().unwrap();
        assert_eq!(frame.data.len(), 320 * 240 * 3 / 2);
        assert!(frame.is_keyframe);
    }

    #[test]
    fn test_stop_wakes_blocked_reader() {
        let capture = Arc::new(prepared(SyntheticOpts::default().with_frame_rate(1)));
        capture.start().unwrap();
        // frame 0 is due immediately, frame 1 one second later
        assert!(capture.get_frame_buffer().is_some());

        let reader = Arc::clone(&capture);
        let handle = thread::spawn(move || reader.get_frame_buffer());
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        capture.stop().unwrap();
        assert!(handle.join().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
