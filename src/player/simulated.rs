//! Clock-driven stand-in for a media backend.
//!
//! Nothing is decoded: the position is a wall clock scaled by the playback
//! rate, sync points sit every [`SYNC_POINT_INTERVAL_MS`] and end of stream
//! fires when the clock reaches the configured duration.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::backend::{BackendListener, BackendSetup, MediaBackend, SeekFlags};
use crate::assets::{DEFAULT_MEDIA_DURATION_MS, SYNC_POINT_INTERVAL_MS};
use crate::error::{MediaError, Result};
use crate::utils::sos::SignalOfStop;

#[derive(Debug, Clone)]
pub struct SimOpts {
    pub duration: Duration,
    /// Delay between `prepare` and the prepared callback.
    pub preroll: Duration,
    /// Clock thread granularity.
    pub tick: Duration,
    pub fail_init: bool,
    pub fail_prepare: bool,
}

impl Default for SimOpts {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(DEFAULT_MEDIA_DURATION_MS),
            preroll: Duration::from_millis(10),
            tick: Duration::from_millis(20),
            fail_init: false,
            fail_prepare: false,
        }
    }
}

impl SimOpts {
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_preroll(mut self, preroll: Duration) -> Self {
        self.preroll = preroll;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn with_fail_init(mut self, fail: bool) -> Self {
        self.fail_init = fail;
        self
    }

    pub fn with_fail_prepare(mut self, fail: bool) -> Self {
        self.fail_prepare = fail;
        self
    }
}

#[derive(Default)]
struct Clock {
    initialized: bool,
    prepared: bool,
    playing: bool,
    rate: f64,
    volume: (f32, f32),
    /// Position at `anchor`, in milliseconds.
    base_ms: f64,
    anchor: Option<Instant>,
    eos_sent: bool,
}

impl Clock {
    fn position_ms(&self, duration_ms: f64) -> f64 {
        let elapsed = match (self.playing, self.anchor) {
            (true, Some(anchor)) => anchor.elapsed().as_secs_f64() * 1000.0 * self.rate,
            _ => 0.0,
        };
        (self.base_ms + elapsed).min(duration_ms)
    }

    /// Fold the running time into `base_ms`.
    fn freeze(&mut self, duration_ms: f64) {
        self.base_ms = self.position_ms(duration_ms);
        self.anchor = Some(Instant::now());
    }
}

struct Ticker {
    sos: SignalOfStop,
    handle: JoinHandle<()>,
}

/// In-process [`MediaBackend`] driven by the wall clock.
pub struct SimulatedBackend {
    opts: SimOpts,
    clock: Arc<Mutex<Clock>>,
    listener: Arc<Mutex<Option<Arc<dyn BackendListener>>>>,
    ticker: Mutex<Option<Ticker>>,
}

impl SimulatedBackend {
    pub fn new(opts: SimOpts) -> Self {
        Self {
            opts,
            clock: Arc::new(Mutex::new(Clock::default())),
            listener: Arc::new(Mutex::new(None)),
            ticker: Mutex::new(None),
        }
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn duration_ms(&self) -> f64 {
        self.opts.duration.as_millis() as f64
    }

    fn prepared_clock(&self, op: &'static str) -> Result<MutexGuard<'_, Clock>> {
        let clock = self.clock();
        if !clock.prepared {
            return Err(MediaError::backend(format!("{}: media not prepared", op)));
        }
        Ok(clock)
    }

    /// Resolve a seek target against the sync point grid.
    fn seek_target(&self, position_ms: u64, flags: SeekFlags) -> u64 {
        let position_ms = position_ms.min(self.opts.duration.as_millis() as u64);
        if flags.contains(SeekFlags::ACCURATE) || !flags.contains(SeekFlags::KEY_UNIT) {
            return position_ms;
        }

        let before = position_ms - position_ms % SYNC_POINT_INTERVAL_MS;
        let after = before + SYNC_POINT_INTERVAL_MS;
        let target = if flags.contains(SeekFlags::SNAP_AFTER) {
            if before == position_ms { before } else { after }
        } else if flags.contains(SeekFlags::SNAP_NEAREST) {
            if position_ms - before < after - position_ms {
                before
            } else {
                after
            }
        } else {
            before
        };
        target.min(self.opts.duration.as_millis() as u64)
    }

    fn spawn_ticker(&self) -> Result<()> {
        let sos = SignalOfStop::new();
        let worker = TickerWorker {
            opts: self.opts.clone(),
            clock: Arc::clone(&self.clock),
            listener: Arc::clone(&self.listener),
            sos: sos.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("sim-backend-clock".to_string())
            .spawn(move || worker.run())
            .map_err(|e| MediaError::unavailable(format!("cannot spawn clock thread: {}", e)))?;

        let previous = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Ticker { sos, handle });
        if let Some(previous) = previous {
            stop_ticker(previous);
        }
        Ok(())
    }
}

fn stop_ticker(ticker: Ticker) {
    ticker.sos.cancel();
    if ticker.handle.join().is_err() {
        warn!("simulated backend clock thread panicked");
    }
}

struct TickerWorker {
    opts: SimOpts,
    clock: Arc<Mutex<Clock>>,
    listener: Arc<Mutex<Option<Arc<dyn BackendListener>>>>,
    sos: SignalOfStop,
}

impl TickerWorker {
    fn listener(&self) -> Option<Arc<dyn BackendListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn run(self) {
        if self.sos.sleep(self.opts.preroll) {
            return;
        }

        if self.opts.fail_prepare {
            if let Some(listener) = self.listener() {
                listener.on_error(MediaError::backend("simulated preroll failure"));
            }
            return;
        }

        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prepared = true;
        if let Some(listener) = self.listener() {
            listener.on_prepared();
        }

        let duration_ms = self.opts.duration.as_millis() as f64;
        while !self.sos.sleep(self.opts.tick) {
            let reached_end = {
                let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
                let at_end = clock.playing
                    && !clock.eos_sent
                    && clock.position_ms(duration_ms) >= duration_ms;
                if at_end {
                    clock.eos_sent = true;
                }
                at_end
            };

            if reached_end {
                debug!("simulated backend reached end of stream");
                if let Some(listener) = self.listener() {
                    listener.on_eos();
                }
            }
        }
    }
}

impl MediaBackend for SimulatedBackend {
    fn set_listener(&self, listener: Arc<dyn BackendListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn init(&self, setup: &BackendSetup) -> Result<()> {
        if self.opts.fail_init {
            return Err(MediaError::backend(format!("cannot open '{}'", setup.uri)));
        }
        if !setup.uri.contains("://") {
            return Err(MediaError::backend(format!("unsupported locator '{}'", setup.uri)));
        }

        let mut clock = self.clock();
        *clock = Clock {
            initialized: true,
            rate: 1.0,
            volume: (1.0, 1.0),
            ..Clock::default()
        };
        info!(
            "simulated backend opened {} ({:?} long, surface {:?})",
            setup.uri, self.opts.duration, setup.surface
        );
        Ok(())
    }

    fn deinit(&self) {
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            stop_ticker(ticker);
        }
        *self.clock() = Clock::default();
    }

    fn prepare(&self) -> Result<()> {
        {
            let clock = self.clock();
            if !clock.initialized {
                return Err(MediaError::backend("prepare: backend not initialized"));
            }
        }
        self.spawn_ticker()
    }

    fn play(&self) -> Result<()> {
        let duration_ms = self.duration_ms();
        let mut clock = self.prepared_clock("play")?;
        clock.freeze(duration_ms);
        clock.playing = true;
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let duration_ms = self.duration_ms();
        let mut clock = self.prepared_clock("pause")?;
        clock.freeze(duration_ms);
        clock.playing = false;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.play()
    }

    fn stop(&self) -> Result<()> {
        let mut clock = self.prepared_clock("stop")?;
        clock.playing = false;
        clock.base_ms = 0.0;
        clock.anchor = None;
        Ok(())
    }

    fn set_rate(&self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(MediaError::backend(format!("unsupported rate {}", rate)));
        }
        let duration_ms = self.duration_ms();
        let mut clock = self.prepared_clock("set rate")?;
        clock.freeze(duration_ms);
        clock.rate = rate;
        Ok(())
    }

    fn get_rate(&self) -> Result<f64> {
        Ok(self.prepared_clock("get rate")?.rate)
    }

    fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        self.prepared_clock("set volume")?.volume = (left, right);
        Ok(())
    }

    fn seek(&self, position_ms: u64, flags: SeekFlags) -> Result<()> {
        let target = self.seek_target(position_ms, flags);
        let mut clock = self.prepared_clock("seek")?;
        clock.base_ms = target as f64;
        clock.anchor = Some(Instant::now());
        clock.eos_sent = false;
        debug!("simulated seek {} -> {} ({:#x})", position_ms, target, flags.bits());
        Ok(())
    }

    fn query_position(&self) -> Result<u64> {
        let duration_ms = self.duration_ms();
        let clock = self.prepared_clock("query position")?;
        Ok(clock.position_ms(duration_ms) as u64)
    }

    fn query_duration(&self) -> Result<u64> {
        let _clock = self.prepared_clock("query duration")?;
        Ok(self.opts.duration.as_millis() as u64)
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::backend::SeekMode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Counts {
        prepared: AtomicU32,
        eos: AtomicU32,
        errors: AtomicU32,
    }

    impl BackendListener for Counts {
        fn on_prepared(&self) {
            self.prepared.fetch_add(1, Ordering::SeqCst);
        }

        fn on_eos(&self) {
            self.eos.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: MediaError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> BackendSetup {
        BackendSetup {
            uri: "file:///a.mp4".to_string(),
            surface: None,
        }
    }

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !what() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn prepared(opts: SimOpts) -> (SimulatedBackend, Arc<Counts>) {
        let backend = SimulatedBackend::new(opts);
        let counts = Arc::new(Counts::default());
        backend.set_listener(counts.clone());
        backend.init(&setup()).unwrap();
        backend.prepare().unwrap();
        let c = Arc::clone(&counts);
        wait_until(move || c.prepared.load(Ordering::SeqCst) == 1);
        (backend, counts)
    }

    #[test]
    fn test_calls_before_prepare_fail() {
        let backend = SimulatedBackend::new(SimOpts::default());
        assert!(backend.play().is_err());
        assert!(backend.query_position().is_err());
        assert!(backend.query_duration().is_err());
        assert!(backend.prepare().is_err());
        backend.deinit();
    }

    #[test]
    fn test_duration_known_once_prepared() {
        let (backend, _counts) =
            prepared(SimOpts::default().with_duration(Duration::from_millis(1_500)));
        assert_eq!(backend.query_duration(), Ok(1_500));
        assert_eq!(backend.query_duration(), Ok(1_500));
        backend.play().unwrap();
        assert!(backend.query_position().is_ok());
    }

    #[test]
    fn test_init_failure() {
        let backend = SimulatedBackend::new(SimOpts::default().with_fail_init(true));
        assert!(matches!(
            backend.init(&setup()),
            Err(MediaError::BackendFailure(_))
        ));

        let backend = SimulatedBackend::new(SimOpts::default());
        let bad = BackendSetup {
            uri: "a.mp4".to_string(),
            surface: None,
        };
        assert!(backend.init(&bad).is_err());
    }

    #[test]
    fn test_clock_advances_while_playing() {
        let (backend, _counts) = prepared(SimOpts::default());
        assert_eq!(backend.query_position().unwrap(), 0);
        backend.play().unwrap();
        thread::sleep(Duration::from_millis(40));
        let first = backend.query_position().unwrap();
        assert!(first > 0);

        backend.pause().unwrap();
        let paused = backend.query_position().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.query_position().unwrap(), paused);
    }

    #[test]
    fn test_seek_snaps_to_sync_points() {
        let (backend, _counts) = prepared(SimOpts::default());
        let cases = [
            (SeekMode::PreviousSyncPoint, 5_300, 5_000),
            (SeekMode::NextSyncPoint, 5_300, 5_500),
            (SeekMode::NextSyncPoint, 5_000, 5_000),
            (SeekMode::ClosestSyncPoint, 5_300, 5_500),
            (SeekMode::ClosestSyncPoint, 5_100, 5_000),
            (SeekMode::ClosestFrame, 5_123, 5_123),
        ];
        for (mode, requested, expected) in cases {
            backend.seek(requested, mode.flags()).unwrap();
            assert_eq!(backend.query_position().unwrap(), expected, "{:?}", mode);
        }
    }

    #[test]
    fn test_end_of_stream_fires_once() {
        let opts = SimOpts::default()
            .with_duration(Duration::from_millis(60))
            .with_tick(Duration::from_millis(5));
        let (backend, counts) = prepared(opts);
        backend.play().unwrap();

        let c = Arc::clone(&counts);
        wait_until(move || c.eos.load(Ordering::SeqCst) == 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counts.eos.load(Ordering::SeqCst), 1);
        assert_eq!(backend.query_position().unwrap(), 60);

        // a seek re-arms end of stream
        backend.seek(0, SeekFlags::FLUSH).unwrap();
        let c = Arc::clone(&counts);
        wait_until(move || c.eos.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn test_rate_scales_clock() {
        let (backend, _counts) = prepared(SimOpts::default());
        backend.set_rate(2.0).unwrap();
        assert_eq!(backend.get_rate().unwrap(), 2.0);
        assert!(backend.set_rate(0.0).is_err());

        backend.play().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(backend.query_position().unwrap() >= 90);
    }

    #[test]
    fn test_preroll_failure_reported() {
        let backend = SimulatedBackend::new(SimOpts::default().with_fail_prepare(true));
        let counts = Arc::new(Counts::default());
        backend.set_listener(counts.clone());
        backend.init(&setup()).unwrap();
        backend.prepare().unwrap();

        let c = Arc::clone(&counts);
        wait_until(move || c.errors.load(Ordering::SeqCst) == 1);
        assert_eq!(counts.prepared.load(Ordering::SeqCst), 0);
        assert!(backend.play().is_err());
    }
}
