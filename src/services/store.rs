//! Object Store Adapter: shape mutations against the remote channel.
//!
//! DESIGN
//! ======
//! Every shape mutation is fire-and-forget from the UI's perspective but
//! returns a completion signal that fails with a write error on transport
//! failure; callers catch and log, they never surface dialogs. Shape ids
//! are generated client-side from creator identity, current time, and a
//! random suffix, so two clients creating in the same millisecond cannot
//! collide without coordination.
//!
//! The lock is two fields on the shape record. Locking merges them in,
//! unlocking merges `null`s back. The record itself never leaves the
//! objects collection for lock traffic.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tracing::warn;

use crate::channel::{
    ChannelError, Collection, Fields, RemoteObjectChannel, Snapshot, Subscription,
};
use crate::state::{Point, Shape, ShapeKind, ShapeMap, now_ms};

/// Random alphanumeric characters appended to generated shape ids.
const ID_SUFFIX_LEN: usize = 6;

// =============================================================================
// DRAFT
// =============================================================================

/// Caller-supplied portion of a new shape. The adapter fills in identity,
/// id, timestamp, and clears the lock fields.
#[derive(Debug, Clone)]
pub struct ShapeDraft {
    pub kind: ShapeKind,
    pub x: f64,
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub radius: Option<f64>,
    pub points: Option<Vec<Point>>,
    pub text: Option<String>,
    pub src: Option<String>,
    pub color: String,
    pub rotation: f64,
    pub z_index: i64,
}

impl ShapeDraft {
    #[must_use]
    pub fn new(kind: ShapeKind, x: f64, y: f64, color: impl Into<String>) -> Self {
        Self {
            kind,
            x,
            y,
            width: None,
            height: None,
            radius: None,
            points: None,
            text: None,
            src: None,
            color: color.into(),
            rotation: 0.0,
            z_index: 0,
        }
    }

    #[must_use]
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    #[must_use]
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    #[must_use]
    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = Some(points);
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    #[must_use]
    pub fn with_z_index(mut self, z_index: i64) -> Self {
        self.z_index = z_index;
        self
    }
}

// =============================================================================
// ID GENERATION
// =============================================================================

/// `{creator}_{ms}_{random}`: unique without coordination.
fn shape_id(user_id: &str, now: i64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{user_id}_{now}_{suffix}")
}

// =============================================================================
// DECODING
// =============================================================================

/// Decode a raw objects snapshot into typed shapes. Undecodable entries
/// are skipped with a warning rather than poisoning the whole snapshot.
#[must_use]
pub fn decode_shapes(snapshot: &Snapshot) -> ShapeMap {
    let mut shapes = ShapeMap::with_capacity(snapshot.len());
    for (id, value) in snapshot {
        match serde_json::from_value::<Shape>(value.clone()) {
            Ok(shape) => {
                shapes.insert(id.clone(), shape);
            }
            Err(e) => {
                warn!(id, error = %e, "skipping undecodable shape record");
            }
        }
    }
    shapes
}

/// Typed snapshot stream over the objects collection.
pub struct ShapeSubscription {
    inner: Subscription,
}

impl ShapeSubscription {
    /// Wait for the next objects snapshot, decoded.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Subscribe` once the stream has closed.
    pub async fn recv(&mut self) -> Result<ShapeMap, ChannelError> {
        let snapshot = self.inner.recv().await?;
        Ok(decode_shapes(&snapshot))
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

#[derive(Clone)]
pub struct ObjectStore {
    channel: Arc<dyn RemoteObjectChannel>,
}

impl ObjectStore {
    #[must_use]
    pub fn new(channel: Arc<dyn RemoteObjectChannel>) -> Self {
        Self { channel }
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<dyn RemoteObjectChannel> {
        &self.channel
    }

    /// Create a new shape and return its generated id.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the point write is rejected.
    pub async fn create_shape(
        &self,
        canvas_id: &str,
        draft: ShapeDraft,
        user_id: &str,
    ) -> Result<String, ChannelError> {
        self.create_shape_at(canvas_id, draft, user_id, now_ms()).await
    }

    /// Internal: create with explicit timestamp (for testing).
    pub(crate) async fn create_shape_at(
        &self,
        canvas_id: &str,
        draft: ShapeDraft,
        user_id: &str,
        now: i64,
    ) -> Result<String, ChannelError> {
        let id = shape_id(user_id, now);
        let shape = Shape {
            id: id.clone(),
            kind: draft.kind,
            x: draft.x,
            y: draft.y,
            width: draft.width,
            height: draft.height,
            radius: draft.radius,
            points: draft.points,
            text: draft.text,
            src: draft.src,
            color: draft.color,
            rotation: draft.rotation,
            created_by: user_id.to_string(),
            timestamp: now,
            z_index: draft.z_index,
            locked_by: None,
            locked_by_user_name: None,
        };
        let value =
            serde_json::to_value(&shape).map_err(|e| ChannelError::Write(e.to_string()))?;
        self.channel
            .put(canvas_id, Collection::Objects, &id, value)
            .await?;
        Ok(id)
    }

    /// Merge partial fields into an existing shape.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the merge is rejected.
    pub async fn update_shape(
        &self,
        canvas_id: &str,
        shape_id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError> {
        self.channel
            .merge(canvas_id, Collection::Objects, shape_id, fields)
            .await
    }

    /// Remove a shape entirely (hard delete, no tombstone).
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the delete is rejected.
    pub async fn delete_shape(&self, canvas_id: &str, shape_id: &str) -> Result<(), ChannelError> {
        self.channel
            .remove(canvas_id, Collection::Objects, shape_id)
            .await
    }

    /// Remove several shapes. Stops at the first rejected delete; already
    /// removed shapes stay removed (best-effort batch).
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` on the first rejected delete.
    pub async fn delete_shapes(
        &self,
        canvas_id: &str,
        shape_ids: &[String],
    ) -> Result<(), ChannelError> {
        for shape_id in shape_ids {
            self.channel
                .remove(canvas_id, Collection::Objects, shape_id)
                .await?;
        }
        Ok(())
    }

    /// Stamp the lock fields with the acquiring user.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the merge is rejected.
    pub async fn lock_shape(
        &self,
        canvas_id: &str,
        shape_id: &str,
        user_id: &str,
        user_name: &str,
    ) -> Result<(), ChannelError> {
        let mut fields = Fields::new();
        fields.insert("lockedBy".into(), Value::String(user_id.to_string()));
        fields.insert("lockedByUserName".into(), Value::String(user_name.to_string()));
        self.channel
            .merge(canvas_id, Collection::Objects, shape_id, fields)
            .await
    }

    /// Clear the lock fields back to `null`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the merge is rejected.
    pub async fn unlock_shape(&self, canvas_id: &str, shape_id: &str) -> Result<(), ChannelError> {
        self.channel
            .merge(canvas_id, Collection::Objects, shape_id, unlock_fields())
            .await
    }

    /// Release several locks in one batched merge. Best-effort atomicity:
    /// the batch is a single channel call, not a transaction.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the batched merge is rejected.
    pub async fn unlock_shapes(
        &self,
        canvas_id: &str,
        shape_ids: &[String],
    ) -> Result<(), ChannelError> {
        if shape_ids.is_empty() {
            return Ok(());
        }
        let entries: HashMap<String, Fields> = shape_ids
            .iter()
            .map(|id| (id.clone(), unlock_fields()))
            .collect();
        self.channel
            .merge_many(canvas_id, Collection::Objects, entries)
            .await
    }

    /// Read the full current object collection once.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Subscribe` if the read fails.
    pub async fn read_shapes(&self, canvas_id: &str) -> Result<ShapeMap, ChannelError> {
        let snapshot = self.channel.read_all(canvas_id, Collection::Objects).await?;
        Ok(decode_shapes(&snapshot))
    }

    /// Subscribe to decoded object snapshots.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Subscribe` if the subscription cannot start.
    pub async fn subscribe_shapes(
        &self,
        canvas_id: &str,
    ) -> Result<ShapeSubscription, ChannelError> {
        let inner = self.channel.subscribe(canvas_id, Collection::Objects).await?;
        Ok(ShapeSubscription { inner })
    }
}

fn unlock_fields() -> Fields {
    let mut fields = Fields::new();
    fields.insert("lockedBy".into(), Value::Null);
    fields.insert("lockedByUserName".into(), Value::Null);
    fields
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
