//! Stale Lock Reclaimer: releases locks orphaned by dead sessions.
//!
//! DESIGN
//! ======
//! An unreleased lock blocks every other user on that shape, so a
//! background sweep cross-references locks against live presence every
//! 10 s. A holder counts as live only while some presence entry of
//! theirs is `isActive` with a fresh heartbeat; `isOnline` alone is not
//! trusted (a crashed tab leaves it true forever). All locks reclaimed
//! in one sweep are released through a single batched merge.
//!
//! TRADE-OFFS
//! ==========
//! The batch is best-effort, not transactional. If it fails nothing is
//! retained: every still-eligible lock is recomputed from scratch on the
//! next sweep, so partial failure self-heals within one interval.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::channel::{ChannelError, Collection};
use crate::services::presence::decode_presence;
use crate::services::store::ObjectStore;
use crate::state::{PresenceRecord, now_ms};

/// A lock whose holder has shown no activity for this long is reclaimed.
pub const LOCK_TIMEOUT_MS: i64 = 30_000;

/// A presence entry older than this is dead regardless of `isOnline`.
pub const PRESENCE_STALE_MS: i64 = 30_000;

/// Sweep cadence per open canvas.
pub const SWEEP_INTERVAL_MS: u64 = 10_000;

// =============================================================================
// LIVE SET
// =============================================================================

/// Live user ids and their freshest activity time, computed from a
/// presence snapshot. Only `isActive` entries within the staleness
/// window count; the freshest session per user wins.
#[must_use]
pub fn live_users_at<'a>(
    records: impl IntoIterator<Item = &'a PresenceRecord>,
    now: i64,
) -> (HashSet<String>, HashMap<String, i64>) {
    let mut live = HashSet::new();
    let mut last_activity: HashMap<String, i64> = HashMap::new();
    for record in records {
        if !record.is_active {
            continue;
        }
        if now - record.last_seen > PRESENCE_STALE_MS {
            continue;
        }
        live.insert(record.user_id.clone());
        let entry = last_activity.entry(record.user_id.clone()).or_insert(record.last_seen);
        if record.last_seen > *entry {
            *entry = record.last_seen;
        }
    }
    (live, last_activity)
}

// =============================================================================
// SWEEP
// =============================================================================

/// Shape ids released by one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub released: Vec<String>,
}

/// Run one reclaim pass over the canvas.
///
/// # Errors
///
/// Returns `ChannelError` if reading presence/objects or the batched
/// release fails; the caller retries on the next interval.
pub async fn sweep(store: &ObjectStore, canvas_id: &str) -> Result<SweepReport, ChannelError> {
    sweep_at(store, canvas_id, now_ms()).await
}

/// Internal: sweep with explicit time (for testing).
pub(crate) async fn sweep_at(
    store: &ObjectStore,
    canvas_id: &str,
    now: i64,
) -> Result<SweepReport, ChannelError> {
    let presence_snapshot = store
        .channel()
        .read_all(canvas_id, Collection::Presence)
        .await?;
    let presence = decode_presence(&presence_snapshot);
    let (live, last_activity) = live_users_at(presence.values(), now);

    let shapes = store.read_shapes(canvas_id).await?;
    let mut released = Vec::new();
    for (shape_id, shape) in &shapes {
        let Some(holder) = shape.locked_by.as_deref().filter(|h| !h.is_empty()) else {
            continue;
        };
        let orphaned = !live.contains(holder);
        let idle = last_activity
            .get(holder)
            .is_none_or(|&seen| now - seen > LOCK_TIMEOUT_MS);
        if orphaned || idle {
            released.push(shape_id.clone());
        }
    }

    if !released.is_empty() {
        store.unlock_shapes(canvas_id, &released).await?;
        info!(canvas_id, count = released.len(), "reclaimed stale locks");
    }
    Ok(SweepReport { released })
}

/// Spawn the periodic reclaim sweep for one open canvas.
pub fn spawn_reclaim_task(store: ObjectStore, canvas_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep(&store, &canvas_id).await {
                warn!(error = %e, canvas_id, "reclaim sweep failed; retrying next interval");
            }
        }
    })
}

// =============================================================================
// MANUAL OVERRIDES
// =============================================================================

/// Administrative override: release one lock regardless of liveness.
///
/// # Errors
///
/// Returns `ChannelError::Write` if the unlock is rejected.
pub async fn force_unlock_shape(
    store: &ObjectStore,
    canvas_id: &str,
    shape_id: &str,
) -> Result<(), ChannelError> {
    store.unlock_shape(canvas_id, shape_id).await
}

/// Release every lock held by `user_id`. Sign-out safety net for locks
/// missed by the per-shape explicit unlock (e.g. crash mid-edit).
///
/// # Errors
///
/// Returns `ChannelError` if reading objects or the batched release fails.
pub async fn unlock_all_by_user(
    store: &ObjectStore,
    canvas_id: &str,
    user_id: &str,
) -> Result<Vec<String>, ChannelError> {
    let shapes = store.read_shapes(canvas_id).await?;
    let held: Vec<String> = shapes
        .iter()
        .filter(|(_, shape)| shape.locked_by.as_deref() == Some(user_id))
        .map(|(shape_id, _)| shape_id.clone())
        .collect();
    if !held.is_empty() {
        store.unlock_shapes(canvas_id, &held).await?;
        info!(canvas_id, user_id, count = held.len(), "released all locks held by user");
    }
    Ok(held)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "reclaim_test.rs"]
mod tests;
