//! Lock Manager: exclusive per-shape selection.
//!
//! DESIGN
//! ======
//! A lock is advisory: it lives as two fields on the shape record and
//! does not physically stop a non-holder from writing. The acquire check
//! here is therefore the enforcement point: every caller must go
//! through `select` before mutating a shape's geometry.
//!
//! Losing a lock race is an expected outcome, not a fault: a denied
//! acquisition is a silent no-op surfaced as [`SelectOutcome::Denied`],
//! never an error. Teardown release is mandatory, not best-effort: an
//! unreleased lock blocks every other user until the reclaimer's timeout
//! elapses.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::channel::ChannelError;
use crate::services::reconcile::ReconcileEngine;
use crate::services::store::ObjectStore;
use crate::state::UserIdentity;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result of a selection attempt. Denial carries the holder for UI
/// affordances (e.g. a "locked by Ada" badge) but raises nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected,
    Denied { locked_by: String },
    NotFound,
}

fn lock_engine(engine: &Mutex<ReconcileEngine>) -> std::sync::MutexGuard<'_, ReconcileEngine> {
    engine.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// =============================================================================
// SELECT
// =============================================================================

/// Attempt to select (and lock) a shape for `user`.
///
/// Re-selecting a shape the user already holds is idempotent. Selecting
/// while another selection is held releases the previous lock first, so
/// a session holds at most one selection.
///
/// # Errors
///
/// Returns `ChannelError::Write` if a lock write is rejected. Denial is
/// not an error.
pub async fn select(
    engine: &Mutex<ReconcileEngine>,
    store: &ObjectStore,
    canvas_id: &str,
    shape_id: &str,
    user: &UserIdentity,
) -> Result<SelectOutcome, ChannelError> {
    let previous = {
        let mut eng = lock_engine(engine);
        let Some(shape) = eng.shape(shape_id) else {
            return Ok(SelectOutcome::NotFound);
        };
        if shape.locked_by_other(&user.id) {
            let holder = shape.locked_by.clone().unwrap_or_default();
            debug!(shape_id, holder, "selection denied: lock held by another user");
            return Ok(SelectOutcome::Denied { locked_by: holder });
        }

        let previous = eng
            .selected_id()
            .filter(|prev| *prev != shape_id)
            .map(str::to_string);
        if let Some(prev) = &previous {
            eng.set_lock_local(prev, None);
        }
        eng.select_local(shape_id);
        eng.set_lock_local(shape_id, Some((&user.id, &user.name)));
        previous
    };

    if let Some(prev) = previous {
        store.unlock_shape(canvas_id, &prev).await?;
    }
    store.lock_shape(canvas_id, shape_id, &user.id, &user.name).await?;
    Ok(SelectOutcome::Selected)
}

// =============================================================================
// DESELECT
// =============================================================================

/// Release the current selection's lock and clear local selection.
/// No-op when nothing is selected.
///
/// # Errors
///
/// Returns `ChannelError::Write` if the unlock write is rejected; local
/// selection is cleared regardless so the UI never sticks.
pub async fn deselect(
    engine: &Mutex<ReconcileEngine>,
    store: &ObjectStore,
    canvas_id: &str,
) -> Result<(), ChannelError> {
    let selected = {
        let mut eng = lock_engine(engine);
        let Some(selected) = eng.selected_id().map(str::to_string) else {
            return Ok(());
        };
        eng.set_lock_local(&selected, None);
        eng.clear_selection();
        Some(selected)
    };

    if let Some(shape_id) = selected {
        store.unlock_shape(canvas_id, &shape_id).await?;
    }
    Ok(())
}

/// Mandatory teardown path: release any held lock, swallowing remote
/// failure (the reclaimer is the backstop, logged here for diagnosis).
pub async fn release_on_teardown(
    engine: &Mutex<ReconcileEngine>,
    store: &ObjectStore,
    canvas_id: &str,
) {
    if let Err(e) = deselect(engine, store, canvas_id).await {
        warn!(error = %e, canvas_id, "failed to release lock on teardown; reclaimer will recover it");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "lock_test.rs"]
mod tests;
