//! Presence Tracker: per-session liveness heartbeat.
//!
//! DESIGN
//! ======
//! Joining a canvas registers disconnect-triggered removal of this
//! session's presence and cursor records *before* the first write, so a
//! tab that crashes between the two never leaves a permanent record
//! behind. A periodic heartbeat (shorter than the 30 s staleness window)
//! refreshes `lastSeen`; explicit sign-out removes the record
//! synchronously while the user still has write authorization.
//!
//! ERROR HANDLING
//! ==============
//! Heartbeat failures are swallowed with a warning; a missed beat is
//! self-healing on the next interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::channel::{ChannelError, Collection, DisconnectOp, Fields, RemoteObjectChannel, Snapshot};
use crate::state::{PresenceRecord, UserIdentity, now_ms};

/// Heartbeat cadence. Must stay well under the 30 s staleness window.
pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Register disconnect cleanup and write the initial presence record.
///
/// # Errors
///
/// Returns `ChannelError::Write` if registration or the initial write is
/// rejected; the session must not be considered open in that case.
pub async fn join(
    channel: &Arc<dyn RemoteObjectChannel>,
    canvas_id: &str,
    session_id: &str,
    user: &UserIdentity,
) -> Result<(), ChannelError> {
    // Cleanup registration first: a crash after this point self-heals.
    channel
        .on_disconnect(
            session_id,
            DisconnectOp::Remove {
                canvas_id: canvas_id.to_string(),
                collection: Collection::Presence,
                key: session_id.to_string(),
            },
        )
        .await?;
    channel
        .on_disconnect(
            session_id,
            DisconnectOp::Remove {
                canvas_id: canvas_id.to_string(),
                collection: Collection::Cursors,
                key: session_id.to_string(),
            },
        )
        .await?;

    let record = PresenceRecord {
        session_id: session_id.to_string(),
        user_id: user.id.clone(),
        user_name: user.name.clone(),
        color: user.color.clone(),
        is_online: true,
        is_active: true,
        last_seen: now_ms(),
    };
    let value = serde_json::to_value(&record).map_err(|e| ChannelError::Write(e.to_string()))?;
    channel
        .put(canvas_id, Collection::Presence, session_id, value)
        .await?;
    info!(canvas_id, session_id, user_id = %user.id, "presence joined");
    Ok(())
}

/// Remove this session's presence record synchronously, then cancel the
/// disconnect registrations. Ordering matters: the removal must complete
/// while the user is still authorized to write.
///
/// # Errors
///
/// Returns `ChannelError::Write` if the removal is rejected.
pub async fn leave(
    channel: &Arc<dyn RemoteObjectChannel>,
    canvas_id: &str,
    session_id: &str,
) -> Result<(), ChannelError> {
    channel
        .remove(canvas_id, Collection::Presence, session_id)
        .await?;
    channel.clear_disconnect(session_id).await?;
    info!(canvas_id, session_id, "presence left");
    Ok(())
}

// =============================================================================
// HEARTBEAT
// =============================================================================

/// Refresh this session's liveness fields.
///
/// # Errors
///
/// Returns `ChannelError::Write` if the merge is rejected.
pub async fn heartbeat(
    channel: &Arc<dyn RemoteObjectChannel>,
    canvas_id: &str,
    session_id: &str,
    is_active: bool,
) -> Result<(), ChannelError> {
    heartbeat_at(channel, canvas_id, session_id, is_active, now_ms()).await
}

/// Internal: heartbeat with explicit timestamp (for testing).
pub(crate) async fn heartbeat_at(
    channel: &Arc<dyn RemoteObjectChannel>,
    canvas_id: &str,
    session_id: &str,
    is_active: bool,
    now: i64,
) -> Result<(), ChannelError> {
    let mut fields = Fields::new();
    fields.insert("isOnline".into(), Value::Bool(true));
    fields.insert("isActive".into(), Value::Bool(is_active));
    fields.insert("lastSeen".into(), Value::from(now));
    channel
        .merge(canvas_id, Collection::Presence, session_id, fields)
        .await
}

/// Spawn the periodic heartbeat. `active` is flipped by the session as
/// the user starts/stops interacting.
pub fn spawn_heartbeat_task(
    channel: Arc<dyn RemoteObjectChannel>,
    canvas_id: String,
    session_id: String,
    active: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let is_active = active.load(Ordering::SeqCst);
            if let Err(e) = heartbeat(&channel, &canvas_id, &session_id, is_active).await {
                warn!(error = %e, canvas_id, "presence heartbeat failed; retrying next interval");
            }
        }
    })
}

// =============================================================================
// DECODING
// =============================================================================

/// Decode a raw presence snapshot, skipping undecodable entries.
#[must_use]
pub fn decode_presence(snapshot: &Snapshot) -> HashMap<String, PresenceRecord> {
    let mut records = HashMap::with_capacity(snapshot.len());
    for (session_id, value) in snapshot {
        match serde_json::from_value::<PresenceRecord>(value.clone()) {
            Ok(record) => {
                records.insert(session_id.clone(), record);
            }
            Err(e) => {
                warn!(session_id, error = %e, "skipping undecodable presence record");
            }
        }
    }
    records
}

// =============================================================================
// TESTS
// =============================================================================
