//! In-process reference implementation of the Remote Object Channel.
//!
//! DESIGN
//! ======
//! Collections live in `RwLock`-held maps; every mutation publishes the
//! full collection to a `broadcast` topic while still holding the write
//! lock, so each subscriber observes snapshots in commit order. The
//! disconnect registry mirrors the store-side "run this when the client
//! drops" primitive: [`MemoryChannel::disconnect`] plays the role of the
//! transport noticing a dead session.
//!
//! Tests use `set_fail_writes` and `set_fail_subscribes` to simulate a
//! store that rejects mutations or subscriptions, exercising the
//! catch-and-log error policy upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use super::{ChannelError, Collection, DisconnectOp, Fields, RemoteObjectChannel, Snapshot, Subscription};

/// Snapshots buffered per topic before a slow subscriber starts lagging.
const TOPIC_CAPACITY: usize = 64;

// =============================================================================
// CHANNEL
// =============================================================================

#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<RwLock<MemoryInner>>,
    fail_writes: Arc<AtomicBool>,
    fail_subscribes: Arc<AtomicBool>,
}

#[derive(Default)]
struct MemoryInner {
    /// (canvas, collection) -> key -> record.
    records: HashMap<(String, Collection), HashMap<String, Value>>,
    /// Snapshot fan-out, one topic per (canvas, collection).
    topics: HashMap<(String, Collection), broadcast::Sender<Snapshot>>,
    /// Mutations to run when a session disconnects uncleanly.
    disconnect_ops: HashMap<String, Vec<DisconnectOp>>,
}

impl MemoryChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner::default())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_subscribes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fault injection: make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fault injection: make every subsequent subscribe fail.
    pub fn set_fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    /// Simulate the transport noticing `session_id` is gone: run every
    /// registered disconnect mutation, then drop the registrations.
    pub async fn disconnect(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(ops) = inner.disconnect_ops.remove(session_id) else {
            return;
        };
        for op in ops {
            match op {
                DisconnectOp::Remove { canvas_id, collection, key } => {
                    inner.remove_record(&canvas_id, collection, &key);
                }
                DisconnectOp::Merge { canvas_id, collection, key, fields } => {
                    inner.merge_record(&canvas_id, collection, &key, fields);
                }
            }
        }
    }

    fn check_writes(&self) -> Result<(), ChannelError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChannelError::Write("injected write failure".into()));
        }
        Ok(())
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn publish(&self, canvas_id: &str, collection: Collection) {
        let Some(tx) = self.topics.get(&(canvas_id.to_string(), collection)) else {
            return;
        };
        let snapshot = self
            .records
            .get(&(canvas_id.to_string(), collection))
            .cloned()
            .unwrap_or_default();
        // No receivers is fine; the topic outlives individual subscribers.
        let _ = tx.send(snapshot);
    }

    fn put_record(&mut self, canvas_id: &str, collection: Collection, key: &str, value: Value) {
        self.records
            .entry((canvas_id.to_string(), collection))
            .or_default()
            .insert(key.to_string(), value);
        self.publish(canvas_id, collection);
    }

    fn merge_record(&mut self, canvas_id: &str, collection: Collection, key: &str, fields: Fields) {
        let records = self
            .records
            .entry((canvas_id.to_string(), collection))
            .or_default();
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !record.is_object() {
            *record = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = record {
            for (field, value) in fields {
                // Null values are stored, not dropped: released locks stay
                // on the wire as lockedBy: null.
                map.insert(field, value);
            }
        }
        self.publish(canvas_id, collection);
    }

    fn remove_record(&mut self, canvas_id: &str, collection: Collection, key: &str) {
        let removed = self
            .records
            .get_mut(&(canvas_id.to_string(), collection))
            .and_then(|records| records.remove(key));
        if removed.is_some() {
            self.publish(canvas_id, collection);
        }
    }
}

// =============================================================================
// TRAIT IMPL
// =============================================================================

#[async_trait]
impl RemoteObjectChannel for MemoryChannel {
    async fn put(
        &self,
        canvas_id: &str,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<(), ChannelError> {
        self.check_writes()?;
        let mut inner = self.inner.write().await;
        inner.put_record(canvas_id, collection, key, value);
        Ok(())
    }

    async fn merge(
        &self,
        canvas_id: &str,
        collection: Collection,
        key: &str,
        fields: Fields,
    ) -> Result<(), ChannelError> {
        self.check_writes()?;
        let mut inner = self.inner.write().await;
        inner.merge_record(canvas_id, collection, key, fields);
        Ok(())
    }

    async fn merge_many(
        &self,
        canvas_id: &str,
        collection: Collection,
        entries: HashMap<String, Fields>,
    ) -> Result<(), ChannelError> {
        self.check_writes()?;
        let mut inner = self.inner.write().await;
        // Single publish after all merges: one batch, one snapshot.
        for (key, fields) in entries {
            let records = inner
                .records
                .entry((canvas_id.to_string(), collection))
                .or_default();
            let record = records
                .entry(key)
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(map) = record {
                for (field, value) in fields {
                    map.insert(field, value);
                }
            }
        }
        inner.publish(canvas_id, collection);
        Ok(())
    }

    async fn remove(
        &self,
        canvas_id: &str,
        collection: Collection,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.check_writes()?;
        let mut inner = self.inner.write().await;
        inner.remove_record(canvas_id, collection, key);
        Ok(())
    }

    async fn read_all(
        &self,
        canvas_id: &str,
        collection: Collection,
    ) -> Result<Snapshot, ChannelError> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .get(&(canvas_id.to_string(), collection))
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        canvas_id: &str,
        collection: Collection,
    ) -> Result<Subscription, ChannelError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(ChannelError::Subscribe("injected subscribe failure".into()));
        }
        let mut inner = self.inner.write().await;
        let tx = inner
            .topics
            .entry((canvas_id.to_string(), collection))
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        // Prime the topic with the current collection so the new
        // subscriber starts from the present state. Existing subscribers
        // re-receive the state they already hold, which full-replacement
        // semantics make harmless.
        inner.publish(canvas_id, collection);
        Ok(Subscription::from_receiver(rx))
    }

    async fn on_disconnect(&self, session_id: &str, op: DisconnectOp) -> Result<(), ChannelError> {
        self.check_writes()?;
        let mut inner = self.inner.write().await;
        inner
            .disconnect_ops
            .entry(session_id.to_string())
            .or_default()
            .push(op);
        Ok(())
    }

    async fn clear_disconnect(&self, session_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.write().await;
        inner.disconnect_ops.remove(session_id);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
