//! Capture source stage
//!
//! Pull-model source: a consumer thread calls [`FramePuller::fetch_frame`]
//! while the control thread drives the lifecycle. Production is gated on the
//! element state; before `start` and after `stop` every fetch reports end of
//! stream.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};

use crate::capture::{CaptureProvider, ProviderFactory, SyntheticCapture, SyntheticOpts};
use crate::error::{MediaError, Result};
use crate::pipeline::params::{Param, ParamKind, StreamType};
use crate::pipeline::stage::{CreateParam, ElementCore, PipelineElement, StageKind};
use crate::pipeline::types::{MediaFrame, Timestamp};

const REQUIRED: &[ParamKind] = &[ParamKind::SourceStreamType, ParamKind::VideoSize];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Idle,
    Running,
    Paused,
    Shutdown,
}

struct Production {
    gate: Gate,
    provider: Option<Arc<dyn CaptureProvider>>,
    codec_data: Option<Bytes>,
    last_pts: Option<Timestamp>,
    width: u32,
    height: u32,
}

struct SourceShared {
    production: Mutex<Production>,
    condvar: Condvar,
}

impl SourceShared {
    fn lock(&self) -> MutexGuard<'_, Production> {
        self.production
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_gate(&self, gate: Gate) {
        self.lock().gate = gate;
        self.condvar.notify_all();
    }
}

/// Clonable pull handle of a [`CaptureSource`].
#[derive(Clone)]
pub struct FramePuller {
    shared: Arc<SourceShared>,
}

impl FramePuller {
    /// Block until the provider yields a frame. `None` is end of stream.
    ///
    /// While the source is paused this waits for resume or shutdown.
    pub fn fetch_frame(&self) -> Option<MediaFrame> {
        loop {
            let provider = {
                let mut production = self.shared.lock();
                loop {
                    match production.gate {
                        Gate::Running => break,
                        Gate::Paused => {
                            production = self
                                .shared
                                .condvar
                                .wait(production)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                        Gate::Idle | Gate::Shutdown => return None,
                    }
                }
                production.provider.clone()?
            };

            // blocking; stop() on the provider wakes it
            let captured = provider.get_frame_buffer()?;

            let mut production = self.shared.lock();
            match production.gate {
                Gate::Running => {}
                Gate::Paused => {
                    debug!("dropping frame captured while paused");
                    continue;
                }
                Gate::Idle | Gate::Shutdown => return None,
            }

            let pts = match production.last_pts {
                Some(last) if captured.pts <= last => {
                    warn!(
                        "provider timestamp {} does not advance past {}",
                        captured.pts, last
                    );
                    last.add(Duration::from_micros(1))
                }
                _ => captured.pts,
            };
            production.last_pts = Some(pts);

            return Some(MediaFrame::video(
                captured.data,
                pts,
                captured.duration,
                captured.is_keyframe,
                production.width,
                production.height,
            ));
        }
    }

    /// Codec header cached at the first start, if the stream has one.
    pub fn codec_data(&self) -> Option<Bytes> {
        self.shared.lock().codec_data.clone()
    }
}

/// Source stage wrapping a [`CaptureProvider`].
pub struct CaptureSource {
    core: ElementCore,
    factory: ProviderFactory,
    stream_type: Option<StreamType>,
    size: Option<(u32, u32)>,
    shared: Arc<SourceShared>,
}

impl CaptureSource {
    /// Source backed by the synthetic provider.
    pub fn new(param: CreateParam) -> Self {
        Self::with_factory(param, SyntheticCapture::factory(SyntheticOpts::default()))
    }

    pub fn with_factory(param: CreateParam, factory: ProviderFactory) -> Self {
        Self {
            core: ElementCore::new(param, StageKind::Source),
            factory,
            stream_type: None,
            size: None,
            shared: Arc::new(SourceShared {
                production: Mutex::new(Production {
                    gate: Gate::Idle,
                    provider: None,
                    codec_data: None,
                    last_pts: None,
                    width: 0,
                    height: 0,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    fn provider(&self) -> Result<Arc<dyn CaptureProvider>> {
        self.shared
            .lock()
            .provider
            .clone()
            .ok_or_else(|| MediaError::unavailable(format!("{}: no capture provider", self.name())))
    }

    /// Close the gate, wake blocked fetches, then stop the provider.
    fn shutdown_provider(&mut self) -> Result<()> {
        let provider = {
            let mut production = self.shared.lock();
            production.gate = Gate::Shutdown;
            production.provider.clone()
        };
        self.shared.condvar.notify_all();

        match provider {
            Some(provider) => provider.stop(),
            None => Ok(()),
        }
    }
}

impl PipelineElement for CaptureSource {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn required_params(&self) -> &'static [ParamKind] {
        REQUIRED
    }

    fn accepts(&self, kind: ParamKind) -> bool {
        REQUIRED.contains(&kind)
    }

    fn on_configure(&mut self, param: &Param) -> Result<()> {
        match param {
            Param::SourceStreamType(stream_type) => self.stream_type = Some(*stream_type),
            Param::VideoSize { width, height } => self.size = Some((*width, *height)),
            _ => {}
        }
        Ok(())
    }

    fn on_prepare(&mut self) -> Result<()> {
        let (Some(stream_type), Some((width, height))) = (self.stream_type, self.size) else {
            return Err(MediaError::invalid_state("prepare", "unconfigured"));
        };

        let provider = (self.factory)(stream_type)?;
        provider.set_surface_width(width);
        provider.set_surface_height(height);
        provider.prepare()?;

        let mut production = self.shared.lock();
        production.provider = Some(provider);
        production.gate = Gate::Idle;
        production.last_pts = None;
        production.width = width;
        production.height = height;
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        let provider = self.provider()?;
        provider.start()?;

        let needs_codec_data = self
            .stream_type
            .map(|t| t.needs_codec_data())
            .unwrap_or(false);
        if needs_codec_data && self.shared.lock().codec_data.is_none() {
            match provider.get_codec_buffer() {
                Some(data) => {
                    debug!("{}: cached {} bytes of codec data", self.name(), data.len());
                    self.shared.lock().codec_data = Some(data);
                }
                None => {
                    if let Err(e) = provider.stop() {
                        warn!("{}: provider stop failed: {}", self.name(), e);
                    }
                    return Err(MediaError::backend(format!(
                        "{}: provider returned no codec data",
                        self.name()
                    )));
                }
            }
        }

        self.shared.set_gate(Gate::Running);
        info!("{}: capture running", self.name());
        Ok(())
    }

    fn on_pause(&mut self) -> Result<()> {
        self.shared.set_gate(Gate::Paused);
        Ok(())
    }

    fn on_resume(&mut self) -> Result<()> {
        self.provider()?.resume()?;
        self.shared.set_gate(Gate::Running);
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        self.shutdown_provider()?;
        info!("{}: capture stopped", self.name());
        Ok(())
    }

    fn on_reset(&mut self) {
        if let Err(e) = self.shutdown_provider() {
            warn!("{}: provider stop failed during reset: {}", self.name(), e);
        }
        let mut production = self.shared.lock();
        production.provider = None;
        production.codec_data = None;
        production.last_pts = None;
        production.gate = Gate::Idle;
        drop(production);

        self.stream_type = None;
        self.size = None;
    }

    fn on_get_parameter(&self, kind: ParamKind) -> Result<Param> {
        match (kind, self.stream_type, self.size) {
            (ParamKind::SourceStreamType, Some(stream_type), _) => {
                Ok(Param::SourceStreamType(stream_type))
            }
            (ParamKind::VideoSize, _, Some((width, height))) => {
                Ok(Param::VideoSize { width, height })
            }
            _ => Err(MediaError::invalid_parameter(format!(
                "{} has no {:?}",
                self.name(),
                kind
            ))),
        }
    }

    fn frame_puller(&self) -> Option<FramePuller> {
        Some(FramePuller {
            shared: Arc::clone(&self.shared),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFrame;
    use crate::pipeline::state::ElementState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn configured(opts: SyntheticOpts, stream_type: StreamType) -> CaptureSource {
        let mut source =
            CaptureSource::with_factory(CreateParam::new(1, "src"), SyntheticCapture::factory(opts));
        source.init().unwrap();
        source.configure(Param::SourceStreamType(stream_type)).unwrap();
        source
            .configure(Param::VideoSize {
                width: 320,
                height: 240,
            })
            .unwrap();
        source
    }

    fn unpaced() -> SyntheticOpts {
        SyntheticOpts::default().with_paced(false)
    }

    #[test]
    fn test_fetch_before_start_is_eos() {
        let mut source = configured(unpaced(), StreamType::EsAvc);
        let puller = source.frame_puller().unwrap();
        assert!(puller.fetch_frame().is_none());

        source.prepare().unwrap();
        assert!(puller.fetch_frame().is_none());

        source.start().unwrap();
        assert!(puller.fetch_frame().is_some());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut source = configured(unpaced(), StreamType::EsAvc);
        source.prepare().unwrap();
        source.start().unwrap();

        let puller = source.frame_puller().unwrap();
        let mut last = None;
        for _ in 0..50 {
            let frame = puller.fetch_frame().unwrap();
            assert_eq!(frame.width, Some(320));
            if let Some(prev) = last {
                assert!(frame.pts > prev);
            }
            last = Some(frame.pts);
        }
    }

    #[test]
    fn test_codec_data_cached_on_start() {
        let mut source = configured(unpaced(), StreamType::EsAvc);
        source.prepare().unwrap();
        let puller = source.frame_puller().unwrap();
        assert!(puller.codec_data().is_none());

        source.start().unwrap();
        assert!(puller.codec_data().is_some());

        let mut raw = configured(unpaced(), StreamType::Yuv420);
        raw.prepare().unwrap();
        raw.start().unwrap();
        assert!(raw.frame_puller().unwrap().codec_data().is_none());
    }

    #[test]
    fn test_missing_codec_data_fails_start() {
        let mut source = configured(unpaced().with_fail_codec_data(true), StreamType::EsAvc);
        source.prepare().unwrap();
        assert!(matches!(source.start(), Err(MediaError::BackendFailure(_))));
        assert_eq!(source.state(), ElementState::Ready);
        assert!(source.frame_puller().unwrap().fetch_frame().is_none());
    }

    #[test]
    fn test_stop_releases_blocked_fetch() {
        // one frame per second: the second fetch blocks inside the provider
        let mut source = configured(SyntheticOpts::default().with_frame_rate(1), StreamType::EsAvc);
        source.prepare().unwrap();
        source.start().unwrap();

        let puller = source.frame_puller().unwrap();
        assert!(puller.fetch_frame().is_some());

        let handle = thread::spawn(move || puller.fetch_frame());
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        source.stop().unwrap();
        assert!(handle.join().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(source.state(), ElementState::Stopped);
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let mut source = configured(unpaced(), StreamType::EsAvc);
        source.prepare().unwrap();
        source.start().unwrap();
        source.pause().unwrap();

        let puller = source.frame_puller().unwrap();
        let handle = thread::spawn(move || puller.fetch_frame());
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        source.resume().unwrap();
        assert!(handle.join().unwrap().is_some());
    }

    struct StuckClock {
        calls: AtomicU32,
    }

    impl CaptureProvider for StuckClock {
        fn prepare(&self) -> Result<()> {
            Ok(())
        }
        fn start(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
        fn resume(&self) -> Result<()> {
            Ok(())
        }
        fn set_surface_width(&self, _width: u32) {}
        fn set_surface_height(&self, _height: u32) {}
        fn get_frame_buffer(&self) -> Option<CapturedFrame> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Some(CapturedFrame {
                data: Bytes::from_static(&[1, 2, 3]),
                pts: Timestamp::from_micros(1_000),
                duration: Duration::from_millis(33),
                is_keyframe: true,
            })
        }
        fn get_codec_buffer(&self) -> Option<Bytes> {
            None
        }
    }

    #[test]
    fn test_non_advancing_pts_is_bumped() {
        let factory: ProviderFactory = Arc::new(|_| {
            let provider: Arc<dyn CaptureProvider> = Arc::new(StuckClock {
                calls: AtomicU32::new(0),
            });
            Ok(provider)
        });
        let mut source = CaptureSource::with_factory(CreateParam::new(1, "stuck"), factory);
        source.init().unwrap();
        source.configure(Param::SourceStreamType(StreamType::Yuv420)).unwrap();
        source
            .configure(Param::VideoSize {
                width: 2,
                height: 2,
            })
            .unwrap();
        source.prepare().unwrap();
        source.start().unwrap();

        let puller = source.frame_puller().unwrap();
        let first = puller.fetch_frame().unwrap();
        let b = puller.fetch_frame().unwrap().pts;
        assert_eq!(first.pts.micros, 1_000);
        assert_eq!(b.micros, 1_001);
        assert_eq!(first.kind, crate::pipeline::types::MediaKind::Video);
        assert_eq!((first.width, first.height), (Some(2), Some(2)));
    }

    #[test]
    fn test_reset_forgets_configuration() {
        let mut source = configured(unpaced(), StreamType::EsAvc);
        source.prepare().unwrap();
        source.start().unwrap();
        source.stop().unwrap();
        source.reset().unwrap();

        assert_eq!(source.state(), ElementState::Initialized);
        assert!(matches!(source.prepare(), Err(MediaError::NotConfigured { .. })));
        assert!(source.frame_puller().unwrap().fetch_frame().is_none());
    }
}
