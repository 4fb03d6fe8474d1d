//! Connection Health Monitor: snapshot-recency connectivity inference.
//!
//! DESIGN
//! ======
//! The transport's own connected/disconnected signal lags reality (a
//! half-dead link still reports connected), so health is inferred from
//! how recently a snapshot arrived. States:
//!
//! `Connecting -> Connected <-> Reconnecting`, plus `Error`, which is
//! terminal until a fresh subscribe resets to `Connecting`.
//!
//! Evaluated every 5 s: Connected goes Reconnecting once the last
//! snapshot is older than 15 s; Reconnecting returns to Connected when a
//! snapshot landed within the last 5 s. A successful local mutation also
//! counts as a liveness signal and optimistically clears
//! Error/Reconnecting ahead of the next tick.
//!
//! Purely diagnostic: nothing is gated or retried here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::now_ms;

/// A Connected stream with no snapshot for this long is suspect.
pub const SNAPSHOT_STALE_MS: i64 = 15_000;

/// How often the state machine is evaluated.
pub const CHECK_INTERVAL_MS: u64 = 5_000;

/// A Reconnecting stream with a snapshot this recent has recovered.
pub const RECOVER_WINDOW_MS: i64 = 5_000;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

struct HealthInner {
    state: ConnectionState,
    /// Last liveness signal (snapshot or successful mutation), ms epoch.
    last_signal: Option<i64>,
}

/// Shared health handle; cheap to clone into pump tasks and the UI.
#[derive(Clone)]
pub struct ConnectionHealth {
    inner: Arc<Mutex<HealthInner>>,
}

impl ConnectionHealth {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HealthInner {
                state: ConnectionState::Connecting,
                last_signal: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HealthInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// A snapshot arrived.
    pub fn note_snapshot(&self) {
        self.note_snapshot_at(now_ms());
    }

    pub(crate) fn note_snapshot_at(&self, now: i64) {
        let mut inner = self.lock();
        inner.last_signal = Some(now);
        // Error stays terminal: only a fresh subscribe or a successful
        // mutation clears it.
        if matches!(inner.state, ConnectionState::Connecting | ConnectionState::Reconnecting) {
            inner.state = ConnectionState::Connected;
        }
    }

    /// A local mutation completed successfully; optimistic recovery
    /// ahead of the next tick.
    pub fn note_mutation_ok(&self) {
        self.note_mutation_ok_at(now_ms());
    }

    pub(crate) fn note_mutation_ok_at(&self, now: i64) {
        let mut inner = self.lock();
        inner.last_signal = Some(now);
        if matches!(inner.state, ConnectionState::Error | ConnectionState::Reconnecting) {
            inner.state = ConnectionState::Connected;
        }
    }

    /// The snapshot stream failed. Terminal until a re-subscribe.
    pub fn note_subscribe_error(&self) {
        self.lock().state = ConnectionState::Error;
    }

    /// A fresh subscribe started; back to Connecting.
    pub fn note_subscribed(&self) {
        let mut inner = self.lock();
        inner.state = ConnectionState::Connecting;
        inner.last_signal = None;
    }

    /// Periodic evaluation of the staleness rules.
    pub fn tick(&self) {
        self.tick_at(now_ms());
    }

    pub(crate) fn tick_at(&self, now: i64) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Connected => {
                let stale = inner
                    .last_signal
                    .is_none_or(|last| now - last > SNAPSHOT_STALE_MS);
                if stale {
                    inner.state = ConnectionState::Reconnecting;
                }
            }
            ConnectionState::Reconnecting => {
                let recovered = inner
                    .last_signal
                    .is_some_and(|last| now - last <= RECOVER_WINDOW_MS);
                if recovered {
                    inner.state = ConnectionState::Connected;
                }
            }
            ConnectionState::Connecting | ConnectionState::Error => {}
        }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic health evaluation.
pub fn spawn_health_task(health: ConnectionHealth) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(CHECK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            health.tick();
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
