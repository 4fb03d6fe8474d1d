//! Cursor updates: ephemeral pointer positions.
//!
//! DESIGN
//! ======
//! Cursor records are purely ephemeral: written on pointer movement,
//! removed on disconnect (registered by the presence join) or explicit
//! teardown. They never outlive the session and carry no history.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::channel::{ChannelError, Collection, RemoteObjectChannel, Snapshot};
use crate::state::{Cursor, UserIdentity, now_ms};

/// Write this session's pointer position.
///
/// # Errors
///
/// Returns `ChannelError::Write` if the point write is rejected.
pub async fn move_cursor(
    channel: &Arc<dyn RemoteObjectChannel>,
    canvas_id: &str,
    session_id: &str,
    user: &UserIdentity,
    x: f64,
    y: f64,
    arrival_time: i64,
    is_active: bool,
) -> Result<(), ChannelError> {
    let cursor = Cursor {
        session_id: session_id.to_string(),
        user_id: user.id.clone(),
        x,
        y,
        user_name: user.name.clone(),
        timestamp: now_ms(),
        arrival_time,
        is_active,
    };
    let value = serde_json::to_value(&cursor).map_err(|e| ChannelError::Write(e.to_string()))?;
    channel
        .put(canvas_id, Collection::Cursors, session_id, value)
        .await
}

/// Remove this session's cursor record.
///
/// # Errors
///
/// Returns `ChannelError::Write` if the delete is rejected.
pub async fn remove_cursor(
    channel: &Arc<dyn RemoteObjectChannel>,
    canvas_id: &str,
    session_id: &str,
) -> Result<(), ChannelError> {
    channel
        .remove(canvas_id, Collection::Cursors, session_id)
        .await
}

/// Decode a raw cursors snapshot, skipping undecodable entries.
#[must_use]
pub fn decode_cursors(snapshot: &Snapshot) -> HashMap<String, Cursor> {
    let mut cursors = HashMap::with_capacity(snapshot.len());
    for (session_id, value) in snapshot {
        match serde_json::from_value::<Cursor>(value.clone()) {
            Ok(cursor) => {
                cursors.insert(session_id.clone(), cursor);
            }
            Err(e) => {
                warn!(session_id, error = %e, "skipping undecodable cursor record");
            }
        }
    }
    cursors
}

// =============================================================================
// TESTS
// =============================================================================
