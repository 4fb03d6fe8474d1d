//! Core services wired together by the canvas session.
//!
//! ARCHITECTURE
//! ============
//! Service modules own one concern each (remote mutations, snapshot
//! reconciliation, locking, presence, cursors, lock reclamation, and
//! connection health) so the session layer stays focused on wiring and
//! lifecycle.

pub mod cursor;
pub mod health;
pub mod lock;
pub mod presence;
pub mod reclaim;
pub mod reconcile;
pub mod store;
