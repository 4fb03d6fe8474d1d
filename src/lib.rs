//! boardsync: collaborative object synchronization and locking core.
//!
//! ARCHITECTURE
//! ============
//! A canvas is a shared collection of shapes held authoritatively by a
//! push-based remote store (the [`channel::RemoteObjectChannel`] trait).
//! Each client opens a [`session::CanvasSession`], which subscribes to
//! full-collection snapshots and feeds them through the reconciliation
//! engine so the local view tracks the server except for the one shape
//! under active local drag. Exclusive advisory locks live as fields on
//! the shape records themselves; presence heartbeats and a background
//! reclaim sweep release locks orphaned by crashed or idle clients.
//!
//! SCOPE
//! =====
//! Rendering, auth, dashboard CRUD, chat, and image handling are external
//! collaborators. They call the session facade (`create`/`update`/
//! `delete`/`select`/`deselect`) and render whatever the engine holds.
//! There is no OT/CRDT merging: concurrent edits to the same shape are
//! prevented procedurally by the lock, not resolved after the fact.

pub mod channel;
pub mod services;
pub mod session;
pub mod state;

pub use channel::{ChannelError, Collection, ErrorCode, RemoteObjectChannel};
pub use channel::memory::MemoryChannel;
pub use services::health::ConnectionState;
pub use services::lock::SelectOutcome;
pub use services::store::{ObjectStore, ShapeDraft};
pub use session::CanvasSession;
pub use state::{
    CanvasMeta, Cursor, Point, PresenceRecord, Role, Shape, ShapeKind, ShapeMap, UserCanvasEntry,
    UserIdentity,
};
