//! Session lifecycle notifications
//!
//! The client reports every token and session transition to an observer.
//! Observers are invoked synchronously from inside the request that caused
//! the transition, so implementations must return quickly and never fail.

use crate::error::EnvoyError;
use std::sync::Mutex;

/// Receiver of token and session lifecycle events
pub trait SessionObserver: Send + Sync {
    /// A new JWT was obtained from the token service
    fn jwt_refreshed(&self);

    /// Obtaining a JWT failed
    fn jwt_error(&self, err: &EnvoyError);

    /// A new gateway session was established
    fn session_refreshed(&self, session_id: &str);

    /// A request was sent with the given session
    fn session_used(&self, session_id: &str);

    /// Establishing a gateway session failed
    fn session_error(&self, err: &EnvoyError);
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn jwt_refreshed(&self) {}
    fn jwt_error(&self, _err: &EnvoyError) {}
    fn session_refreshed(&self, _session_id: &str) {}
    fn session_used(&self, _session_id: &str) {}
    fn session_error(&self, _err: &EnvoyError) {}
}

/// A lifecycle event as recorded by [`MemoryObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    JwtRefreshed,
    JwtError(String),
    SessionRefreshed(String),
    SessionUsed(String),
    SessionError(String),
}

/// Observer that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl MemoryObserver {
    /// Create an empty observer
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, oldest first
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events matching a predicate
    pub fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for MemoryObserver {
    fn jwt_refreshed(&self) {
        self.push(SessionEvent::JwtRefreshed);
    }

    fn jwt_error(&self, err: &EnvoyError) {
        self.push(SessionEvent::JwtError(err.to_string()));
    }

    fn session_refreshed(&self, session_id: &str) {
        self.push(SessionEvent::SessionRefreshed(session_id.to_string()));
    }

    fn session_used(&self, session_id: &str) {
        self.push(SessionEvent::SessionUsed(session_id.to_string()));
    }

    fn session_error(&self, err: &EnvoyError) {
        self.push(SessionEvent::SessionError(err.to_string()));
    }
}
