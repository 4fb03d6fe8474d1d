//! Remote Object Channel: the seam to the authoritative store.
//!
//! ARCHITECTURE
//! ============
//! The remote store is the single source of truth for every canvas. The
//! core talks to it exclusively through [`RemoteObjectChannel`]: point
//! writes, shallow field merges, deletes, whole-collection reads, a
//! subscribe primitive that pushes the *entire* collection on every
//! change, and a disconnect registry that runs mutations automatically
//! when a session drops. Transport implementations live behind this
//! trait; [`memory::MemoryChannel`] is the in-process reference.
//!
//! DESIGN
//! ======
//! - Snapshots are full replacements, never diffs. A lagged subscriber
//!   skips to the newest snapshot since intermediates carry nothing the
//!   latest one doesn't.
//! - Subscriptions end explicitly via `unsubscribe` (or drop), never by
//!   implicit garbage collection.
//! - Merging a `null` field value stores the `null`, so the lock fields
//!   stay on the wire as `string|null` rather than disappearing.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag, surfaced to the UI's generic
/// "sync failed" indicator rather than per-operation dialogs.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// A mutation was rejected by the store or lost in transport.
    #[error("remote write rejected: {0}")]
    Write(String),
    /// The snapshot stream failed; the caller must re-subscribe.
    #[error("snapshot stream failed: {0}")]
    Subscribe(String),
    /// The identity behind this session is not authorized for the canvas.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Write(_) => "E_REMOTE_WRITE",
            Self::Subscribe(_) => "E_REMOTE_SUBSCRIBE",
            Self::PermissionDenied(_) => "E_PERMISSION_DENIED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Full current state of one collection: record key -> raw record.
pub type Snapshot = HashMap<String, Value>;

/// Partial-field payload for merge operations.
pub type Fields = serde_json::Map<String, Value>;

/// The three record collections a canvas owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Objects,
    Presence,
    Cursors,
}

impl Collection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Objects => "objects",
            Self::Presence => "presence",
            Self::Cursors => "cursors",
        }
    }
}

/// A mutation registered to run automatically when a session disconnects.
#[derive(Debug, Clone)]
pub enum DisconnectOp {
    Remove {
        canvas_id: String,
        collection: Collection,
        key: String,
    },
    Merge {
        canvas_id: String,
        collection: Collection,
        key: String,
        fields: Fields,
    },
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle to a snapshot stream for one (canvas, collection).
///
/// Delivery stops when the handle is dropped or `unsubscribe` is called.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Snapshot>,
}

impl Subscription {
    /// Wrap a broadcast receiver. Used by channel implementations.
    #[must_use]
    pub fn from_receiver(rx: broadcast::Receiver<Snapshot>) -> Self {
        Self { rx }
    }

    /// Wait for the next snapshot.
    ///
    /// Skips ahead when lagged; full snapshots make the dropped
    /// intermediates disposable.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Subscribe` once the stream has closed.
    pub async fn recv(&mut self) -> Result<Snapshot, ChannelError> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "snapshot subscriber lagged; skipping to newest");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ChannelError::Subscribe("snapshot stream closed".into()));
                }
            }
        }
    }

    /// Stop snapshot delivery. Equivalent to dropping the handle, spelled
    /// out so callers never rely on implicit collection.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

// =============================================================================
// CHANNEL TRAIT
// =============================================================================

/// Push-based key-value store of records per canvas.
///
/// Ordering: snapshots reach a given subscriber in the order changes were
/// committed; there is no cross-subscriber ordering guarantee.
#[async_trait]
pub trait RemoteObjectChannel: Send + Sync {
    /// Point write: replace the record at `key` wholesale.
    async fn put(
        &self,
        canvas_id: &str,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<(), ChannelError>;

    /// Shallow partial-field merge. Creates the record if absent.
    async fn merge(
        &self,
        canvas_id: &str,
        collection: Collection,
        key: &str,
        fields: Fields,
    ) -> Result<(), ChannelError>;

    /// Batched multi-record merge issued as a single call. Atomicity is
    /// best-effort, not transactional.
    async fn merge_many(
        &self,
        canvas_id: &str,
        collection: Collection,
        entries: HashMap<String, Fields>,
    ) -> Result<(), ChannelError>;

    /// Remove the record at `key` entirely (hard delete).
    async fn remove(&self, canvas_id: &str, collection: Collection, key: &str)
    -> Result<(), ChannelError>;

    /// Read the full current collection once.
    async fn read_all(&self, canvas_id: &str, collection: Collection)
    -> Result<Snapshot, ChannelError>;

    /// Subscribe to the collection. Every change delivers the full
    /// current collection to the returned handle.
    async fn subscribe(
        &self,
        canvas_id: &str,
        collection: Collection,
    ) -> Result<Subscription, ChannelError>;

    /// Register a mutation to run automatically when `session_id`
    /// disconnects without a clean leave.
    async fn on_disconnect(&self, session_id: &str, op: DisconnectOp) -> Result<(), ChannelError>;

    /// Cancel all disconnect registrations for `session_id` (clean leave).
    async fn clear_disconnect(&self, session_id: &str) -> Result<(), ChannelError>;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names() {
        assert_eq!(Collection::Objects.as_str(), "objects");
        assert_eq!(Collection::Presence.as_str(), "presence");
        assert_eq!(Collection::Cursors.as_str(), "cursors");
    }

    #[test]
    fn write_errors_are_retryable() {
        let err = ChannelError::Write("timeout".into());
        assert_eq!(err.error_code(), "E_REMOTE_WRITE");
        assert!(err.retryable());

        let err = ChannelError::Subscribe("closed".into());
        assert_eq!(err.error_code(), "E_REMOTE_SUBSCRIBE");
        assert!(!err.retryable());

        let err = ChannelError::PermissionDenied("viewer role".into());
        assert_eq!(err.error_code(), "E_PERMISSION_DENIED");
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn subscription_skips_lagged_snapshots() {
        let (tx, rx) = broadcast::channel::<Snapshot>(1);
        let mut sub = Subscription::from_receiver(rx);

        let mut first = Snapshot::new();
        first.insert("a".into(), serde_json::json!(1));
        let mut second = Snapshot::new();
        second.insert("b".into(), serde_json::json!(2));

        // Capacity 1: the first snapshot is evicted before anyone reads.
        tx.send(first).unwrap();
        tx.send(second).unwrap();

        let got = sub.recv().await.unwrap();
        assert!(got.contains_key("b"));
    }

    #[tokio::test]
    async fn subscription_errors_on_close() {
        let (tx, rx) = broadcast::channel::<Snapshot>(4);
        let mut sub = Subscription::from_receiver(rx);
        drop(tx);

        let err = sub.recv().await.unwrap_err();
        assert!(matches!(err, ChannelError::Subscribe(_)));
    }
}
