//! Local Reconciliation Engine: merges server snapshots with local state.
//!
//! DESIGN
//! ======
//! The engine is the client's in-memory view of the canvas's objects.
//! Each pushed snapshot is a full replacement set, merged by three rules:
//!
//! 1. Batch-deleting: replace wholesale. A stale snapshot racing a bulk
//!    delete must never resurrect freshly deleted shapes.
//! 2. Not dragging: replace wholesale.
//! 3. Dragging: the snapshot becomes the baseline for every shape except
//!    the selected one, whose position fields keep the locally-held
//!    in-flight values. Without this, every remote echo of a partial
//!    drag write would snap the shape back to its last committed
//!    position between frames.
//!
//! Once the drag ends, the very next snapshot reconciles fully; no
//! local override survives. The override set is a single shape id; group
//! drag is not supported.
//!
//! The engine is pure state, no I/O, so the merge rules test without a
//! channel in the loop.

use crate::state::{Shape, ShapeMap};

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Default)]
pub struct ReconcileEngine {
    shapes: ShapeMap,
    selected_id: Option<String>,
    dragging: bool,
    batch_deleting: bool,
}

impl ReconcileEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // READ ACCESS
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn shapes(&self) -> &ShapeMap {
        &self.shapes
    }

    #[must_use]
    pub fn shape(&self, shape_id: &str) -> Option<&Shape> {
        self.shapes.get(shape_id)
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    #[must_use]
    pub fn is_batch_deleting(&self) -> bool {
        self.batch_deleting
    }

    /// Next paint-order slot: one above the current maximum.
    #[must_use]
    pub fn next_z_index(&self) -> i64 {
        self.shapes
            .values()
            .map(|shape| shape.z_index)
            .max()
            .map_or(0, |max| max + 1)
    }

    // -------------------------------------------------------------------------
    // SELECTION & LOCK MIRROR
    // -------------------------------------------------------------------------

    /// Record the local selection. Returns false if the shape is unknown.
    pub fn select_local(&mut self, shape_id: &str) -> bool {
        if !self.shapes.contains_key(shape_id) {
            return false;
        }
        self.selected_id = Some(shape_id.to_string());
        true
    }

    /// Clear selection and any in-flight drag.
    pub fn clear_selection(&mut self) {
        self.selected_id = None;
        self.dragging = false;
    }

    /// Optimistically mirror a lock acquire/release on the local copy so
    /// the UI reflects it before the remote echo lands.
    pub fn set_lock_local(&mut self, shape_id: &str, holder: Option<(&str, &str)>) {
        let Some(shape) = self.shapes.get_mut(shape_id) else {
            return;
        };
        match holder {
            Some((user_id, user_name)) => {
                shape.locked_by = Some(user_id.to_string());
                shape.locked_by_user_name = Some(user_name.to_string());
            }
            None => {
                shape.locked_by = None;
                shape.locked_by_user_name = None;
            }
        }
    }

    // -------------------------------------------------------------------------
    // DRAG
    // -------------------------------------------------------------------------

    /// Enter drag mode for the current selection. Returns false with no
    /// state change if nothing is selected.
    pub fn begin_drag(&mut self) -> bool {
        if self.selected_id.is_none() {
            return false;
        }
        self.dragging = true;
        true
    }

    /// Move the dragged shape's local position. The remote write happens
    /// separately (throttled by the caller); this keeps the rendered
    /// position at the pointer.
    pub fn drag_to(&mut self, x: f64, y: f64) {
        if !self.dragging {
            return;
        }
        let Some(selected) = self.selected_id.as_deref() else {
            return;
        };
        if let Some(shape) = self.shapes.get_mut(selected) {
            shape.x = x;
            shape.y = y;
        }
    }

    /// Leave drag mode. The next snapshot reconciles fully.
    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    // -------------------------------------------------------------------------
    // BATCH DELETE
    // -------------------------------------------------------------------------

    pub fn begin_batch_delete(&mut self) {
        self.batch_deleting = true;
    }

    pub fn end_batch_delete(&mut self) {
        self.batch_deleting = false;
    }

    /// Optimistically drop a shape locally ahead of the delete echo.
    pub fn remove_local(&mut self, shape_id: &str) {
        self.shapes.remove(shape_id);
        if self.selected_id.as_deref() == Some(shape_id) {
            self.clear_selection();
        }
    }

    // -------------------------------------------------------------------------
    // SNAPSHOT MERGE
    // -------------------------------------------------------------------------

    /// Merge a pushed snapshot into local state (the three rules above).
    pub fn apply_snapshot(&mut self, snapshot: ShapeMap) {
        if self.batch_deleting || !self.dragging {
            self.shapes = snapshot;
            return;
        }

        let Some(selected) = self.selected_id.clone() else {
            self.shapes = snapshot;
            return;
        };

        // Dragging: keep the in-flight position of the selected shape,
        // take the server's view of everything else. A shape the server
        // deleted mid-drag stays deleted; the override never resurrects.
        let local = self.shapes.get(&selected).cloned();
        self.shapes = snapshot;
        if let (Some(local), Some(remote)) = (local, self.shapes.get_mut(&selected)) {
            remote.x = local.x;
            remote.y = local.y;
            if local.points.is_some() {
                remote.points = local.points;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
