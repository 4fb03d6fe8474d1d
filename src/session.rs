//! Canvas session: per-canvas context wiring the core together.
//!
//! ARCHITECTURE
//! ============
//! One `CanvasSession` per open canvas per browser session. It owns the
//! reconciliation engine, the snapshot pump tasks, the presence
//! heartbeat, the reclaim sweep, and the health ticker; its lifecycle is
//! canvas-open to canvas-close, never process lifetime. The rendering
//! layer calls the facade operations and draws whatever `shapes()`
//! returns.
//!
//! LIFECYCLE
//! =========
//! 1. `open`: join presence (disconnect cleanup registered first),
//!    subscribe to objects/presence/cursors, spawn pumps + periodic
//!    tasks.
//! 2. Facade calls mutate the remote store; echoes come back through the
//!    snapshot pump and the engine's merge rules.
//! 3. `close`: release held lock, remove cursor, sign-out lock safety
//!    net, presence leave, stop all tasks.
//!
//! ERROR HANDLING
//! ==============
//! Mutation failures are logged at the call site and returned; the UI
//! keeps rendering the last known-good snapshot and surfaces only the
//! generic connection indicator. Stream failure flips health to Error;
//! recovery is the caller re-opening the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::channel::{ChannelError, Collection, Fields, RemoteObjectChannel, Subscription};
use crate::services::health::{ConnectionHealth, ConnectionState, spawn_health_task};
use crate::services::lock::{self, SelectOutcome};
use crate::services::reconcile::ReconcileEngine;
use crate::services::store::{ObjectStore, ShapeDraft, ShapeSubscription};
use crate::services::{cursor, presence, reclaim};
use crate::state::{Cursor, PresenceRecord, Shape, ShapeMap, UserIdentity, now_ms};

// =============================================================================
// SESSION
// =============================================================================

pub struct CanvasSession {
    canvas_id: String,
    session_id: String,
    user: UserIdentity,
    channel: Arc<dyn RemoteObjectChannel>,
    store: ObjectStore,
    engine: Arc<Mutex<ReconcileEngine>>,
    health: ConnectionHealth,
    roster: Arc<RwLock<HashMap<String, PresenceRecord>>>,
    cursors: Arc<RwLock<HashMap<String, Cursor>>>,
    active: Arc<AtomicBool>,
    arrival_time: i64,
    tasks: Vec<JoinHandle<()>>,
}

impl CanvasSession {
    /// Open a canvas: register presence, start snapshot pumps and
    /// periodic tasks.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError` if the presence join or any subscription
    /// fails; no tasks are left running in that case.
    pub async fn open(
        channel: Arc<dyn RemoteObjectChannel>,
        canvas_id: impl Into<String>,
        user: UserIdentity,
    ) -> Result<Self, ChannelError> {
        let canvas_id = canvas_id.into();
        let session_id = Uuid::new_v4().to_string();

        presence::join(&channel, &canvas_id, &session_id, &user).await?;

        let store = ObjectStore::new(channel.clone());
        let engine = Arc::new(Mutex::new(ReconcileEngine::new()));
        let health = ConnectionHealth::new();
        let roster = Arc::new(RwLock::new(HashMap::new()));
        let cursors = Arc::new(RwLock::new(HashMap::new()));
        let active = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();

        // All subscriptions are established before any task spawns, so a
        // failed open leaves nothing running. The join above is rolled
        // back on failure: otherwise the presence record (and its
        // disconnect registrations) would outlive a session that never
        // existed.
        let (mut shape_sub, mut presence_sub, mut cursor_sub) =
            match subscribe_all(&channel, &store, &canvas_id).await {
                Ok(subs) => subs,
                Err(e) => {
                    if let Err(le) = presence::leave(&channel, &canvas_id, &session_id).await {
                        tracing::warn!(error = %le, canvas_id, "presence rollback after failed open");
                    }
                    return Err(e);
                }
            };
        health.note_subscribed();

        // Objects pump: snapshots through the engine's merge rules.
        {
            let engine = engine.clone();
            let health = health.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match shape_sub.recv().await {
                        Ok(shapes) => {
                            engine
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner)
                                .apply_snapshot(shapes);
                            health.note_snapshot();
                        }
                        Err(e) => {
                            error!(error = %e, "object snapshot stream failed");
                            health.note_subscribe_error();
                            break;
                        }
                    }
                }
            }));
        }

        // Presence pump: roster for the UI and the reclaimer's inputs.
        {
            let roster = roster.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(snapshot) = presence_sub.recv().await {
                    let decoded = presence::decode_presence(&snapshot);
                    *roster.write().unwrap_or_else(std::sync::PoisonError::into_inner) = decoded;
                }
            }));
        }

        // Cursor pump: ephemeral peer pointers.
        {
            let cursors = cursors.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(snapshot) = cursor_sub.recv().await {
                    let decoded = cursor::decode_cursors(&snapshot);
                    *cursors.write().unwrap_or_else(std::sync::PoisonError::into_inner) = decoded;
                }
            }));
        }

        tasks.push(presence::spawn_heartbeat_task(
            channel.clone(),
            canvas_id.clone(),
            session_id.clone(),
            active.clone(),
        ));
        tasks.push(reclaim::spawn_reclaim_task(store.clone(), canvas_id.clone()));
        tasks.push(spawn_health_task(health.clone()));

        info!(canvas_id, session_id, user_id = %user.id, "canvas session opened");

        Ok(Self {
            canvas_id,
            session_id,
            user,
            channel,
            store,
            engine,
            health,
            roster,
            cursors,
            active,
            arrival_time: now_ms(),
            tasks,
        })
    }

    fn engine(&self) -> std::sync::MutexGuard<'_, ReconcileEngine> {
        self.engine.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // SHAPE MUTATIONS
    // -------------------------------------------------------------------------

    /// Create a shape. Paint order is assigned here: one above the
    /// current maximum in the local view.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the write is rejected (logged;
    /// the UI keeps the last known-good state).
    pub async fn create_shape(&self, draft: ShapeDraft) -> Result<String, ChannelError> {
        let draft = draft.with_z_index(self.engine().next_z_index());
        match self.store.create_shape(&self.canvas_id, draft, &self.user.id).await {
            Ok(id) => {
                self.health.note_mutation_ok();
                Ok(id)
            }
            Err(e) => {
                error!(error = %e, canvas_id = %self.canvas_id, "create shape failed");
                Err(e)
            }
        }
    }

    /// Merge partial fields into a shape. Callers must hold the shape's
    /// lock before mutating geometry; the lock is advisory and this is
    /// not re-checked here.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the merge is rejected.
    pub async fn update_shape(&self, shape_id: &str, fields: Fields) -> Result<(), ChannelError> {
        match self.store.update_shape(&self.canvas_id, shape_id, fields).await {
            Ok(()) => {
                self.health.note_mutation_ok();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, shape_id, "update shape failed");
                Err(e)
            }
        }
    }

    /// Delete one shape, locally first for immediate feedback.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the delete is rejected.
    pub async fn delete_shape(&self, shape_id: &str) -> Result<(), ChannelError> {
        self.engine().remove_local(shape_id);
        match self.store.delete_shape(&self.canvas_id, shape_id).await {
            Ok(()) => {
                self.health.note_mutation_ok();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, shape_id, "delete shape failed");
                Err(e)
            }
        }
    }

    /// Bulk delete. Snapshot merging is suppressed for the duration so a
    /// stale snapshot racing the deletes cannot resurrect them.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` on the first rejected delete.
    pub async fn delete_shapes(&self, shape_ids: &[String]) -> Result<(), ChannelError> {
        {
            let mut engine = self.engine();
            engine.begin_batch_delete();
            for shape_id in shape_ids {
                engine.remove_local(shape_id);
            }
        }
        let result = self.store.delete_shapes(&self.canvas_id, shape_ids).await;
        self.engine().end_batch_delete();
        match result {
            Ok(()) => {
                self.health.note_mutation_ok();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, count = shape_ids.len(), "batch delete failed");
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // SELECTION & DRAG
    // -------------------------------------------------------------------------

    /// Attempt to select (and lock) a shape. Denial is silent.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if a lock write is rejected.
    pub async fn select(&self, shape_id: &str) -> Result<SelectOutcome, ChannelError> {
        lock::select(&self.engine, &self.store, &self.canvas_id, shape_id, &self.user).await
    }

    /// Release the current selection's lock.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the unlock write is rejected.
    pub async fn deselect(&self) -> Result<(), ChannelError> {
        lock::deselect(&self.engine, &self.store, &self.canvas_id).await
    }

    /// Enter drag mode for the current selection. Marks the session
    /// active for presence purposes.
    pub fn begin_drag(&self) -> bool {
        let started = self.engine().begin_drag();
        if started {
            self.active.store(true, Ordering::SeqCst);
        }
        started
    }

    /// Move the dragged shape locally. The caller throttles its own
    /// remote `update_shape` writes; this only keeps the rendered
    /// position at the pointer.
    pub fn drag_to(&self, x: f64, y: f64) {
        self.engine().drag_to(x, y);
    }

    /// End the drag: commit the final position, then let the next
    /// snapshot become authoritative.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the final position write is
    /// rejected; drag mode is exited regardless.
    pub async fn end_drag(&self) -> Result<(), ChannelError> {
        let committed = {
            let mut engine = self.engine();
            if !engine.is_dragging() {
                return Ok(());
            }
            let selected = engine.selected_id().map(str::to_string);
            let position = selected
                .as_deref()
                .and_then(|id| engine.shape(id))
                .map(|shape| (shape.x, shape.y));
            engine.end_drag();
            selected.zip(position)
        };
        self.active.store(false, Ordering::SeqCst);

        if let Some((shape_id, (x, y))) = committed {
            let mut fields = Fields::new();
            fields.insert("x".into(), Value::from(x));
            fields.insert("y".into(), Value::from(y));
            self.update_shape(&shape_id, fields).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // PRESENCE & CURSOR
    // -------------------------------------------------------------------------

    /// Report this session's pointer position to peers.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Write` if the write is rejected.
    pub async fn move_cursor(&self, x: f64, y: f64) -> Result<(), ChannelError> {
        cursor::move_cursor(
            &self.channel,
            &self.canvas_id,
            &self.session_id,
            &self.user,
            x,
            y,
            self.arrival_time,
            self.active.load(Ordering::SeqCst),
        )
        .await
    }

    /// Flip the interacting flag carried by the next heartbeat (e.g.
    /// typing into a text shape).
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // READ ACCESS
    // -------------------------------------------------------------------------

    /// Current reconciled view of the canvas's shapes.
    #[must_use]
    pub fn shapes(&self) -> ShapeMap {
        self.engine().shapes().clone()
    }

    #[must_use]
    pub fn shape(&self, shape_id: &str) -> Option<Shape> {
        self.engine().shape(shape_id).cloned()
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<String> {
        self.engine().selected_id().map(str::to_string)
    }

    #[must_use]
    pub fn presence(&self) -> HashMap<String, PresenceRecord> {
        self.roster
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn cursors(&self) -> HashMap<String, Cursor> {
        self.cursors
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.health.state()
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    #[must_use]
    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    // -------------------------------------------------------------------------
    // TEARDOWN
    // -------------------------------------------------------------------------

    /// Close the session: release held locks, remove presence and
    /// cursor, stop all background work.
    ///
    /// Ordering matters: every remote cleanup runs while the user still
    /// has write authorization, with the lock release first because an
    /// unreleased lock blocks everyone else.
    pub async fn close(self) {
        lock::release_on_teardown(&self.engine, &self.store, &self.canvas_id).await;
        if let Err(e) = cursor::remove_cursor(&self.channel, &self.canvas_id, &self.session_id).await
        {
            tracing::warn!(error = %e, "cursor removal on close failed");
        }
        // Sign-out safety net: anything the explicit unlock missed.
        if let Err(e) = reclaim::unlock_all_by_user(&self.store, &self.canvas_id, &self.user.id).await
        {
            tracing::warn!(error = %e, "sign-out lock sweep failed; reclaimer will recover");
        }
        if let Err(e) = presence::leave(&self.channel, &self.canvas_id, &self.session_id).await {
            tracing::warn!(error = %e, "presence leave failed; disconnect cleanup remains registered");
        }
        info!(canvas_id = %self.canvas_id, session_id = %self.session_id, "canvas session closed");
        // Drop aborts the tasks.
    }
}

async fn subscribe_all(
    channel: &Arc<dyn RemoteObjectChannel>,
    store: &ObjectStore,
    canvas_id: &str,
) -> Result<(ShapeSubscription, Subscription, Subscription), ChannelError> {
    let shapes = store.subscribe_shapes(canvas_id).await?;
    let presence = channel.subscribe(canvas_id, Collection::Presence).await?;
    let cursors = channel.subscribe(canvas_id, Collection::Cursors).await?;
    Ok((shapes, presence, cursors))
}

impl Drop for CanvasSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
