//! Rendezvous between a worker thread and a waiting caller.
//!
//! A producer moves the bridge out of `Pending` exactly once, to `Ready` or
//! `Failed`. Consumers wait in a predicate loop, so spurious wakeups are
//! harmless. [`SyncBridge::cancel`] is the teardown path: it forces the
//! bridge to `Failed` and releases every waiter.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug)]
struct Inner {
    state: SyncState,
    reason: Option<String>,
    cancelled: bool,
}

#[derive(Debug)]
pub struct SyncBridge {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl SyncBridge {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SyncState::Pending,
                reason: None,
                cancelled: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SyncState {
        self.lock().state
    }

    /// Pending -> Ready. Returns `false` if the bridge was already settled.
    pub fn signal_ready(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SyncState::Pending {
            return false;
        }
        inner.state = SyncState::Ready;
        self.condvar.notify_all();
        true
    }

    /// Pending -> Failed. Returns `false` if the bridge was already settled.
    pub fn signal_failed(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.state != SyncState::Pending {
            return false;
        }
        inner.state = SyncState::Failed;
        inner.reason = Some(reason.into());
        self.condvar.notify_all();
        true
    }

    /// Force Pending/Ready -> Failed and wake every waiter.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if inner.state != SyncState::Failed {
            inner.state = SyncState::Failed;
            inner.reason = Some("cancelled".to_string());
        }
        inner.cancelled = true;
        self.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Block until the bridge is settled.
    pub fn wait(&self) -> SyncState {
        let mut inner = self.lock();
        while inner.state == SyncState::Pending {
            inner = self
                .condvar
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.state
    }

    /// Block until the bridge is settled or `timeout` elapses.
    ///
    /// A timeout leaves the bridge untouched; the producer can still settle it.
    pub fn wait_timeout(&self, timeout: Duration, what: &'static str) -> Result<SyncState> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.state == SyncState::Pending {
            let now = Instant::now();
            if now >= deadline {
                return Err(MediaError::Timeout(what));
            }
            inner = self
                .condvar
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(inner.state)
    }
}

impl Default for SyncBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ready_from_worker() {
        let bridge = Arc::new(SyncBridge::new());
        let producer = Arc::clone(&bridge);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.signal_ready()
        });

        assert_eq!(bridge.wait(), SyncState::Ready);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_settles_only_once() {
        let bridge = SyncBridge::new();
        assert!(bridge.signal_failed("init failed"));
        assert!(!bridge.signal_ready());
        assert_eq!(bridge.state(), SyncState::Failed);
        assert_eq!(bridge.failure_reason().as_deref(), Some("init failed"));
    }

    #[test]
    fn test_timeout_leaves_producer_free() {
        let bridge = SyncBridge::new();
        let res = bridge.wait_timeout(Duration::from_millis(10), "prepare");
        assert_eq!(res, Err(MediaError::Timeout("prepare")));

        assert!(bridge.signal_ready());
        assert_eq!(
            bridge.wait_timeout(Duration::from_millis(10), "prepare"),
            Ok(SyncState::Ready)
        );
    }

    #[test]
    fn test_cancel_releases_waiter() {
        let bridge = Arc::new(SyncBridge::new());
        let waiter = Arc::clone(&bridge);
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(10));
        bridge.cancel();
        assert_eq!(handle.join().unwrap(), SyncState::Failed);
        assert!(bridge.is_cancelled());
    }

    #[test]
    fn test_cancel_overrides_ready() {
        let bridge = SyncBridge::new();
        bridge.signal_ready();
        bridge.cancel();
        assert_eq!(bridge.state(), SyncState::Failed);
    }
}
