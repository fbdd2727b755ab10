//! Playback controller
//!
//! [`PlayerEngine`] serializes every public operation on a control lock and
//! keeps the session under a second lock shared with backend callbacks.
//! Lock order is control, then session, then whatever the backend holds
//! internally. Observers are always called with no engine lock held.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};

use super::backend::{BackendListener, BackendSetup, MediaBackend, SeekFlags, SeekMode, Surface};
use super::observer::{PlayerInfo, PlayerObserver};
use super::speed::PlaybackSpeed;
use super::state::PlayerState;
use crate::config::PlayerConfig;
use crate::error::{MediaError, Result};
use crate::utils::{SyncBridge, SyncState};

enum Notice {
    Info(PlayerInfo),
    Error(MediaError),
}

type ObserverRef = Option<Weak<dyn PlayerObserver>>;

fn deliver(observer: ObserverRef, notices: Vec<Notice>) {
    if notices.is_empty() {
        return;
    }
    let Some(observer) = observer.and_then(|weak| weak.upgrade()) else {
        return;
    };
    for notice in notices {
        match notice {
            Notice::Info(info) => observer.on_info(info),
            Notice::Error(error) => observer.on_error(error),
        }
    }
}

struct Session {
    state: PlayerState,
    uri: Option<String>,
    surface: Option<Surface>,
    volume: (f32, f32),
    speed: PlaybackSpeed,
    looping: bool,
    observer: ObserverRef,
    position_ms: u64,
    duration_ms: u64,
    /// End of stream reached without looping.
    completed: bool,
    /// Bridge of the prepare in flight.
    prepare: Option<Arc<SyncBridge>>,
    worker: Option<JoinHandle<()>>,
    /// Bumped by every reset; callbacks and workers of an older session are ignored.
    generation: u64,
}

impl Session {
    fn new(observer: ObserverRef, generation: u64) -> Self {
        Self {
            state: PlayerState::Idle,
            uri: None,
            surface: None,
            volume: (1.0, 1.0),
            speed: PlaybackSpeed::default(),
            looping: false,
            observer,
            position_ms: 0,
            duration_ms: 0,
            completed: false,
            prepare: None,
            worker: None,
            generation,
        }
    }

    fn set_state(&mut self, target: PlayerState, notices: &mut Vec<Notice>) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(&target) {
            warn!("player: unexpected transition {} -> {}", self.state, target);
        }
        debug!("player: {} -> {}", self.state, target);
        self.state = target;
        notices.push(Notice::Info(PlayerInfo::StateChanged(target)));
    }

    fn require(&self, op: &'static str, allowed: &[PlayerState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MediaError::invalid_state(op, self.state))
        }
    }

    fn require_healthy(&self, op: &'static str) -> Result<()> {
        if self.state == PlayerState::Error {
            Err(MediaError::invalid_state(op, self.state))
        } else {
            Ok(())
        }
    }

    /// Move to `Error`, reporting only on first entry.
    fn fail(&mut self, error: &MediaError, notices: &mut Vec<Notice>) {
        if self.state == PlayerState::Error {
            debug!("player: further failure while in error: {}", error);
            return;
        }
        error!("player failed: {}", error);
        self.set_state(PlayerState::Error, notices);
        notices.push(Notice::Error(error.clone()));
    }
}

struct Inner {
    session: Mutex<Session>,
    backend: Arc<dyn MediaBackend>,
    config: PlayerConfig,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a backend failure of the current session and hand the error back.
    fn fail(&self, error: MediaError) -> MediaError {
        self.fail_generation(None, error)
    }

    fn fail_generation(&self, generation: Option<u64>, error: MediaError) -> MediaError {
        let mut notices = Vec::new();
        let observer = {
            let mut session = self.session();
            if generation.is_some_and(|g| g != session.generation) {
                debug!("player: dropping failure of a reset session: {}", error);
                return error;
            }
            session.prepare = None;
            session.fail(&error, &mut notices);
            session.observer.clone()
        };
        deliver(observer, notices);
        error
    }

    /// Apply `update` and move to `target` unless a callback failed the session meanwhile.
    fn commit<F>(&self, op: &'static str, target: Option<PlayerState>, update: F) -> Result<()>
    where
        F: FnOnce(&mut Session, &mut Vec<Notice>),
    {
        let mut notices = Vec::new();
        let observer = {
            let mut session = self.session();
            session.require_healthy(op)?;
            update(&mut session, &mut notices);
            if let Some(target) = target {
                session.set_state(target, &mut notices);
            }
            session.observer.clone()
        };
        deliver(observer, notices);
        Ok(())
    }

    fn begin_prepare(&self, op: &'static str) -> Result<(BackendSetup, Arc<SyncBridge>, u64)> {
        let mut session = self.session();
        if session.prepare.is_some() {
            return Err(MediaError::invalid_state(op, "preparing"));
        }
        session.require(op, &[PlayerState::Initialized])?;

        let bridge = Arc::new(SyncBridge::new());
        session.prepare = Some(Arc::clone(&bridge));
        let setup = BackendSetup {
            uri: session.uri.clone().unwrap_or_default(),
            surface: session.surface,
        };
        Ok((setup, bridge, session.generation))
    }

    /// Backend init + prepare, then wait for the prepared callback.
    fn bring_up(&self, setup: BackendSetup, bridge: Arc<SyncBridge>, generation: u64) -> Result<()> {
        match self.run_prepare(&setup, &bridge) {
            Ok(()) => self.finish_prepare(generation),
            Err(e) => Err(self.fail_generation(Some(generation), e)),
        }
    }

    fn run_prepare(&self, setup: &BackendSetup, bridge: &SyncBridge) -> Result<()> {
        self.backend.init(setup)?;
        self.backend.prepare()?;

        match bridge.wait_timeout(self.config.prepare_timeout, "prepare")? {
            SyncState::Ready => Ok(()),
            _ => Err(MediaError::backend(
                bridge
                    .failure_reason()
                    .unwrap_or_else(|| "prepare failed".to_string()),
            )),
        }
    }

    fn finish_prepare(&self, generation: u64) -> Result<()> {
        let (speed, volume) = {
            let session = self.session();
            if session.generation != generation {
                return Err(MediaError::invalid_state("prepare", PlayerState::Idle));
            }
            (session.speed, session.volume)
        };

        // settings chosen before prepare
        let applied = self
            .backend
            .set_rate(speed.rate())
            .and_then(|_| self.backend.set_volume(volume.0, volume.1));
        if let Err(e) = applied {
            return Err(self.fail_generation(Some(generation), e));
        }
        let duration = self.backend.query_duration().unwrap_or(0);

        let mut notices = Vec::new();
        let observer = {
            let mut session = self.session();
            if session.generation != generation {
                return Err(MediaError::invalid_state("prepare", PlayerState::Idle));
            }
            session.require_healthy("prepare")?;
            session.prepare = None;
            session.duration_ms = duration;
            session.position_ms = 0;
            session.set_state(PlayerState::Prepared, &mut notices);
            notices.push(Notice::Info(PlayerInfo::Prepared));
            session.observer.clone()
        };
        info!("player prepared ({} ms)", duration);
        deliver(observer, notices);
        Ok(())
    }

    /// Clear the session, join the prepare worker and release the backend.
    fn teardown(&self) -> (PlayerState, ObserverRef) {
        let (previous, observer, worker) = {
            let mut session = self.session();
            if let Some(bridge) = session.prepare.take() {
                bridge.cancel();
            }
            let worker = session.worker.take();
            let previous = session.state;
            let observer = session.observer.take();
            *session = Session::new(observer.clone(), session.generation + 1);
            (previous, observer, worker)
        };

        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("player: prepare worker panicked");
            }
        }
        self.backend.deinit();
        (previous, observer)
    }

    fn on_backend_prepared(&self) {
        match &self.session().prepare {
            Some(bridge) => {
                bridge.signal_ready();
            }
            None => debug!("player: prepared callback without a pending prepare"),
        }
    }

    fn on_backend_error(&self, error: MediaError) {
        let mut notices = Vec::new();
        let observer = {
            let mut session = self.session();
            if let Some(bridge) = &session.prepare {
                bridge.signal_failed(error.to_string());
                return;
            }
            if session.state == PlayerState::Idle {
                debug!("player: backend error after reset: {}", error);
                return;
            }
            session.fail(&error, &mut notices);
            session.observer.clone()
        };
        deliver(observer, notices);
    }

    fn on_backend_eos(&self) {
        let mut notices = Vec::new();
        let observer = {
            let mut session = self.session();
            if session.state != PlayerState::Started {
                debug!("player: end of stream ignored while {}", session.state);
                return;
            }

            if session.looping {
                match self.backend.seek(0, SeekFlags::FLUSH | SeekFlags::KEY_UNIT) {
                    Ok(()) => {
                        session.position_ms = 0;
                        info!("player: looping");
                        notices.push(Notice::Info(PlayerInfo::Looped));
                    }
                    Err(e) => session.fail(&e, &mut notices),
                }
            } else {
                session.completed = true;
                session.position_ms = session.duration_ms;
                notices.push(Notice::Info(PlayerInfo::EndOfStream));
                match self.backend.pause() {
                    Ok(()) => session.set_state(PlayerState::Paused, &mut notices),
                    Err(e) => session.fail(&e, &mut notices),
                }
            }
            session.observer.clone()
        };
        deliver(observer, notices);
    }
}

/// Callback sink registered with the backend.
struct EngineListener {
    inner: Weak<Inner>,
}

impl BackendListener for EngineListener {
    fn on_prepared(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_backend_prepared();
        }
    }

    fn on_eos(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_backend_eos();
        }
    }

    fn on_error(&self, error: MediaError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_backend_error(error);
        }
    }
}

/// Playback state machine on top of a [`MediaBackend`].
pub struct PlayerEngine {
    control: Mutex<()>,
    inner: Arc<Inner>,
}

impl PlayerEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PlayerConfig) -> Self {
        let inner = Arc::new(Inner {
            session: Mutex::new(Session::new(None, 0)),
            backend,
            config,
        });
        let listener: Arc<dyn BackendListener> = Arc::new(EngineListener {
            inner: Arc::downgrade(&inner),
        });
        inner.backend.set_listener(listener);

        Self {
            control: Mutex::new(()),
            inner,
        }
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a backend call; a failure moves the session to `Error`.
    fn backend_call<F>(&self, call: F) -> Result<()>
    where
        F: FnOnce(&dyn MediaBackend) -> Result<()>,
    {
        call(self.inner.backend.as_ref()).map_err(|e| self.inner.fail(e))
    }

    pub fn state(&self) -> PlayerState {
        self.inner.session().state
    }

    pub fn source(&self) -> Option<String> {
        self.inner.session().uri.clone()
    }

    pub fn volume(&self) -> (f32, f32) {
        self.inner.session().volume
    }

    pub fn is_looping(&self) -> bool {
        self.inner.session().looping
    }

    pub fn set_source(&self, uri: &str) -> Result<()> {
        let _control = self.control();
        let mut notices = Vec::new();
        let observer = {
            let mut session = self.inner.session();
            session.require("set source", &[PlayerState::Idle])?;
            if uri.trim().is_empty() {
                return Err(MediaError::invalid_parameter("empty source locator"));
            }
            session.uri = Some(uri.to_string());
            session.set_state(PlayerState::Initialized, &mut notices);
            session.observer.clone()
        };
        debug!("player source {}", uri);
        deliver(observer, notices);
        Ok(())
    }

    pub fn set_observer(&self, observer: Weak<dyn PlayerObserver>) -> Result<()> {
        let _control = self.control();
        let mut session = self.inner.session();
        if !session.state.accepts_setup() {
            return Err(MediaError::invalid_state("set observer", session.state));
        }
        session.observer = Some(observer);
        Ok(())
    }

    pub fn set_surface(&self, surface: Surface) -> Result<()> {
        let _control = self.control();
        let mut session = self.inner.session();
        if !session.state.accepts_setup() {
            return Err(MediaError::invalid_state("set surface", session.state));
        }
        session.surface = Some(surface);
        Ok(())
    }

    /// Prepare the backend and block until it is ready or failed.
    pub fn prepare(&self) -> Result<()> {
        let _control = self.control();
        let (setup, bridge, generation) = self.inner.begin_prepare("prepare")?;
        self.inner.bring_up(setup, bridge, generation)
    }

    /// Prepare on a worker thread. The outcome arrives through the observer.
    pub fn prepare_async(&self) -> Result<()> {
        let _control = self.control();
        let (setup, bridge, generation) = self.inner.begin_prepare("prepare async")?;

        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("player-prepare".to_string())
            .spawn(move || {
                if let Err(e) = inner.bring_up(setup, bridge, generation) {
                    debug!("player: async prepare ended with {}", e);
                }
            });

        match spawned {
            Ok(worker) => {
                self.inner.session().worker = Some(worker);
                Ok(())
            }
            Err(e) => Err(self.inner.fail_generation(
                Some(generation),
                MediaError::unavailable(format!("cannot spawn prepare worker: {}", e)),
            )),
        }
    }

    pub fn play(&self) -> Result<()> {
        let _control = self.control();
        let (state, completed) = {
            let session = self.inner.session();
            (session.state, session.completed)
        };

        match state {
            PlayerState::Prepared => self.backend_call(|b| b.play())?,
            PlayerState::Paused if completed => self.backend_call(|b| {
                b.seek(0, SeekFlags::FLUSH | SeekFlags::KEY_UNIT)?;
                b.resume()
            })?,
            PlayerState::Paused => self.backend_call(|b| b.resume())?,
            other => return Err(MediaError::invalid_state("play", other)),
        }

        self.inner
            .commit("play", Some(PlayerState::Started), |session, _| {
                if session.completed {
                    session.completed = false;
                    session.position_ms = 0;
                }
            })
    }

    pub fn pause(&self) -> Result<()> {
        let _control = self.control();
        self.inner.session().require("pause", &[PlayerState::Started])?;
        self.backend_call(|b| b.pause())?;
        self.inner.commit("pause", Some(PlayerState::Paused), |_, _| {})
    }

    pub fn stop(&self) -> Result<()> {
        let _control = self.control();
        self.inner.session().require(
            "stop",
            &[PlayerState::Prepared, PlayerState::Started, PlayerState::Paused],
        )?;
        self.backend_call(|b| b.stop())?;
        self.inner.commit("stop", Some(PlayerState::Stopped), |session, _| {
            session.completed = false;
            session.position_ms = 0;
        })
    }

    /// Back to `Idle` from any state. The observer stays registered.
    pub fn reset(&self) -> Result<()> {
        let _control = self.control();
        let (previous, observer) = self.inner.teardown();
        if previous != PlayerState::Idle {
            info!("player reset from {}", previous);
            deliver(
                observer,
                vec![Notice::Info(PlayerInfo::StateChanged(PlayerState::Idle))],
            );
        }
        Ok(())
    }

    pub fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        let _control = self.control();
        let state = self.state();
        if state == PlayerState::Error {
            return Err(MediaError::invalid_state("set volume", state));
        }
        for level in [left, right] {
            if !(0.0..=1.0).contains(&level) {
                return Err(MediaError::invalid_parameter(format!(
                    "volume {} outside [0, 1]",
                    level
                )));
            }
        }

        if state.is_prepared() {
            self.backend_call(|b| b.set_volume(left, right))?;
        }
        self.inner.commit("set volume", None, |session, notices| {
            session.volume = (left, right);
            notices.push(Notice::Info(PlayerInfo::VolumeChanged { left, right }));
        })
    }

    pub fn seek(&self, position_ms: u64, mode: SeekMode) -> Result<()> {
        let _control = self.control();
        self.inner.session().require(
            "seek",
            &[PlayerState::Prepared, PlayerState::Started, PlayerState::Paused],
        )?;
        self.backend_call(|b| b.seek(position_ms, mode.flags()))?;
        let landed = self.inner.backend.query_position().unwrap_or(position_ms);
        debug!("player seek {} ({:?}) landed at {}", position_ms, mode, landed);

        self.inner.commit("seek", None, |session, notices| {
            session.completed = false;
            session.position_ms = landed;
            notices.push(Notice::Info(PlayerInfo::SeekDone(position_ms)));
        })
    }

    /// Position in milliseconds; the last known value when the backend cannot answer.
    pub fn get_current_time(&self) -> u64 {
        let (state, generation, last) = {
            let session = self.inner.session();
            (session.state, session.generation, session.position_ms)
        };
        if !state.is_prepared() {
            return last;
        }

        match self.inner.backend.query_position() {
            Ok(position) => {
                let mut session = self.inner.session();
                if session.generation == generation {
                    session.position_ms = position;
                }
                position
            }
            Err(e) => {
                debug!("player: position query failed: {}", e);
                last
            }
        }
    }

    /// Duration in milliseconds; the last known value when the backend cannot answer.
    pub fn get_duration(&self) -> u64 {
        let (state, generation, last) = {
            let session = self.inner.session();
            (session.state, session.generation, session.duration_ms)
        };
        if !state.is_prepared() {
            return last;
        }

        match self.inner.backend.query_duration() {
            Ok(duration) => {
                let mut session = self.inner.session();
                if session.generation == generation {
                    session.duration_ms = duration;
                }
                duration
            }
            Err(e) => {
                debug!("player: duration query failed: {}", e);
                last
            }
        }
    }

    pub fn set_playback_speed(&self, speed: PlaybackSpeed) -> Result<()> {
        let _control = self.control();
        let state = self.state();
        if state == PlayerState::Error {
            return Err(MediaError::invalid_state("set speed", state));
        }
        if state.is_prepared() {
            self.backend_call(|b| b.set_rate(speed.rate()))?;
        }
        self.inner.commit("set speed", None, |session, notices| {
            session.speed = speed;
            notices.push(Notice::Info(PlayerInfo::SpeedChanged(speed)));
        })
    }

    pub fn get_playback_speed(&self) -> Result<PlaybackSpeed> {
        let _control = self.control();
        let (state, stored) = {
            let session = self.inner.session();
            (session.state, session.speed)
        };
        if state == PlayerState::Error {
            return Err(MediaError::invalid_state("get speed", state));
        }
        if !state.is_prepared() {
            return Ok(stored);
        }

        let rate = self
            .inner
            .backend
            .get_rate()
            .map_err(|e| self.inner.fail(e))?;
        Ok(PlaybackSpeed::from_rate(rate).unwrap_or_else(|| {
            warn!("backend rate {} matches no speed mode", rate);
            stored
        }))
    }

    pub fn set_looping(&self, looping: bool) -> Result<()> {
        let _control = self.control();
        let mut session = self.inner.session();
        session.require_healthy("set looping")?;
        session.looping = looping;
        Ok(())
    }
}

impl Drop for PlayerEngine {
    fn drop(&mut self) {
        let (previous, _) = self.inner.teardown();
        debug!("player engine dropped while {}", previous);
    }
}
