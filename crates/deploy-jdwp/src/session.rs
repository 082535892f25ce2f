//! One JDWP session per process.
//!
//! The gate is advisory: every connection handler for a pid goes through the
//! same [`SessionGate`] and honours its answer. Devices older than API 28
//! refuse a second debugger outright; newer devices queue the request until
//! the current holder disconnects.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::poison::{lock, wait_timeout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// How often a queued request re-checks its cancellation predicate.
    pub poll_interval: Duration,
    /// First API level that waits for the previous session instead of failing.
    pub legacy_api_threshold: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            legacy_api_threshold: 28,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentionPolicy {
    FailFast,
    Wait { poll_interval: Duration },
}

impl ContentionPolicy {
    pub fn for_api_level(api_level: u32, settings: &SessionSettings) -> Self {
        if api_level < settings.legacy_api_threshold {
            ContentionPolicy::FailFast
        } else {
            ContentionPolicy::Wait {
                poll_interval: settings.poll_interval,
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("JDWP Session already opened for pid: {pid}")]
    AlreadyOpen { pid: u32 },
    #[error("client {pid} stopped while waiting for its JDWP session")]
    ClientStopped { pid: u32 },
    #[error("JDWP session request for pid {pid} was cancelled")]
    Cancelled { pid: u32 },
}

#[derive(Debug, Default)]
struct GateState {
    holder: Option<u64>,
    next_token: u64,
    closed: bool,
}

#[derive(Debug)]
pub struct SessionGate {
    pid: u32,
    state: Mutex<GateState>,
    released: Condvar,
}

impl SessionGate {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state, "session.is_active").holder.is_some()
    }

    /// Takes the session if nobody holds it.
    pub fn try_acquire(&self) -> Option<SessionGuard<'_>> {
        let mut state = lock(&self.state, "session.try_acquire");
        if state.closed || state.holder.is_some() {
            return None;
        }
        Some(self.grant(&mut state))
    }

    /// Takes the session, resolving contention according to `policy`.
    ///
    /// With [`ContentionPolicy::Wait`] there is no overall timeout; the call
    /// returns once the holder releases, the client is stopped, or
    /// `is_cancelled` reports true (checked every `poll_interval`).
    pub fn acquire(
        &self,
        policy: ContentionPolicy,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<SessionGuard<'_>, SessionError> {
        let mut state = lock(&self.state, "session.acquire");
        loop {
            if state.closed {
                return Err(SessionError::ClientStopped { pid: self.pid });
            }
            if state.holder.is_none() {
                return Ok(self.grant(&mut state));
            }

            match policy {
                ContentionPolicy::FailFast => {
                    return Err(SessionError::AlreadyOpen { pid: self.pid });
                }
                ContentionPolicy::Wait { poll_interval } => {
                    if is_cancelled() {
                        return Err(SessionError::Cancelled { pid: self.pid });
                    }
                    tracing::trace!(
                        target: crate::TRACE_TARGET,
                        pid = self.pid,
                        "jdwp session busy; waiting for release"
                    );
                    state = wait_timeout(&self.released, state, poll_interval, "session.wait");
                }
            }
        }
    }

    fn grant(&self, state: &mut GateState) -> SessionGuard<'_> {
        let token = state.next_token;
        state.next_token = state.next_token.wrapping_add(1);
        state.holder = Some(token);
        tracing::debug!(target: crate::TRACE_TARGET, pid = self.pid, token, "jdwp session started");
        SessionGuard { gate: self, token }
    }

    fn release(&self, token: u64) {
        let mut state = lock(&self.state, "session.release");
        // A stale guard must not release a session granted after a forced stop.
        if state.holder == Some(token) {
            state.holder = None;
            tracing::debug!(target: crate::TRACE_TARGET, pid = self.pid, token, "jdwp session stopped");
            self.released.notify_all();
        }
    }

    /// Drops whoever holds the session. Idempotent.
    pub fn force_release(&self) {
        let mut state = lock(&self.state, "session.force_release");
        if state.holder.take().is_some() {
            tracing::debug!(target: crate::TRACE_TARGET, pid = self.pid, "jdwp session force-released");
        }
        self.released.notify_all();
    }

    /// Marks the owning client as gone: releases the session and fails every
    /// current and future waiter.
    pub fn close(&self) {
        let mut state = lock(&self.state, "session.close");
        state.closed = true;
        state.holder = None;
        self.released.notify_all();
    }
}

/// Holds the session until dropped.
#[derive(Debug)]
#[must_use = "the session is released as soon as the guard is dropped"]
pub struct SessionGuard<'a> {
    gate: &'a SessionGate,
    token: u64,
}

impl SessionGuard<'_> {
    pub fn pid(&self) -> u32 {
        self.gate.pid
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    use super::*;

    const WAIT: ContentionPolicy = ContentionPolicy::Wait {
        poll_interval: Duration::from_millis(10),
    };

    fn never() -> bool {
        false
    }

    #[test]
    fn policy_follows_api_level() {
        let settings = SessionSettings::default();
        assert_eq!(
            ContentionPolicy::for_api_level(27, &settings),
            ContentionPolicy::FailFast
        );
        assert_eq!(
            ContentionPolicy::for_api_level(28, &settings),
            ContentionPolicy::Wait {
                poll_interval: Duration::from_millis(50)
            }
        );
    }

    #[test]
    fn legacy_contention_fails_immediately() {
        let gate = SessionGate::new(1234);
        let _first = gate.acquire(ContentionPolicy::FailFast, &never).unwrap();
        assert_eq!(
            gate.acquire(ContentionPolicy::FailFast, &never).unwrap_err(),
            SessionError::AlreadyOpen { pid: 1234 }
        );
        assert_eq!(
            SessionError::AlreadyOpen { pid: 1234 }.to_string(),
            "JDWP Session already opened for pid: 1234"
        );
    }

    #[test]
    fn modern_contention_waits_for_release() {
        let gate = Arc::new(SessionGate::new(7));
        let first = gate.try_acquire().unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();
        let waiter = {
            let gate = gate.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                started_tx.send(()).unwrap();
                let guard = gate.acquire(WAIT, &never).unwrap();
                acquired.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        started_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!gate.is_active());
    }

    #[test]
    fn waiter_observes_cancellation() {
        let gate = SessionGate::new(9);
        let _held = gate.try_acquire().unwrap();
        let cancelled = || true;
        assert_eq!(
            gate.acquire(WAIT, &cancelled).unwrap_err(),
            SessionError::Cancelled { pid: 9 }
        );
    }

    #[test]
    fn closing_wakes_waiters() {
        let gate = Arc::new(SessionGate::new(5));
        let _held = gate.try_acquire().unwrap();

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.acquire(WAIT, &never).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(30));
        gate.close();

        assert_eq!(
            waiter.join().unwrap(),
            Err(SessionError::ClientStopped { pid: 5 })
        );
    }

    #[test]
    fn stale_guard_does_not_release_newer_holder() {
        let gate = SessionGate::new(3);
        let stale = gate.try_acquire().unwrap();
        gate.force_release();
        gate.force_release();

        let current = gate.try_acquire().unwrap();
        drop(stale);
        assert!(gate.is_active());
        drop(current);
        assert!(!gate.is_active());
    }

    #[test]
    fn guard_releases_on_panic() {
        let gate = Arc::new(SessionGate::new(11));
        let result = {
            let gate = gate.clone();
            thread::spawn(move || {
                let _guard = gate.try_acquire().unwrap();
                panic!("handler blew up");
            })
            .join()
        };
        assert!(result.is_err());
        assert!(!gate.is_active());
    }
}
