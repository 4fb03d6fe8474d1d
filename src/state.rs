//! Shared data model.
//!
//! DESIGN
//! ======
//! These types mirror the wire contracts of the remote store verbatim:
//! every record serializes camelCase (`lockedBy`, `lastSeen`, ...) so a
//! snapshot round-trips byte-compatible with what other clients write.
//! The lock is not a separate channel: it is two nullable fields on the
//! shape record itself, which is why `locked_by`/`locked_by_user_name`
//! always serialize (as `null` when released) instead of being omitted.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// TIME
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Stable identity handed to the core by the auth collaborator.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    /// Presence/cursor color assigned at sign-in (hex).
    pub color: String,
}

// =============================================================================
// SHAPE
// =============================================================================

/// Closed set of drawable object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Polygon,
    Text,
    Image,
}

/// A polygon vertex, relative to the shape anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A single drawable object in a canvas's object collection.
///
/// `x`/`y` are the anchor position for every kind; the remaining geometry
/// fields are per-kind and omitted from the wire when absent. At most one
/// user holds the lock at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub color: String,
    pub rotation: f64,
    pub created_by: String,
    /// Creation time, milliseconds since Unix epoch.
    pub timestamp: i64,
    /// Paint order, monotonically increasing per canvas.
    pub z_index: i64,
    /// Holder's user id, or `null` when unlocked. Always on the wire.
    #[serde(default)]
    pub locked_by: Option<String>,
    /// Holder's display name, denormalized for UI badges.
    #[serde(default)]
    pub locked_by_user_name: Option<String>,
}

impl Shape {
    /// True if a user other than `user_id` currently holds the lock.
    #[must_use]
    pub fn locked_by_other(&self, user_id: &str) -> bool {
        match self.locked_by.as_deref() {
            Some(holder) => !holder.is_empty() && holder != user_id,
            None => false,
        }
    }
}

/// The client's view of a canvas's object collection, keyed by shape id.
pub type ShapeMap = HashMap<String, Shape>;

// =============================================================================
// PRESENCE
// =============================================================================

/// Per-browser-session liveness record for a canvas.
///
/// A record with `last_seen` older than the staleness window is dead even
/// if `is_online` is still true; the flag alone cannot be trusted after
/// a crash, only the heartbeat recency can.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub is_online: bool,
    /// Viewing vs interacting (dragging/typing). Consulted by the reclaimer.
    pub is_active: bool,
    /// Last heartbeat, milliseconds since Unix epoch.
    pub last_seen: i64,
}

// =============================================================================
// CURSOR
// =============================================================================

/// Ephemeral per-session pointer position. Created on movement, destroyed
/// on disconnect; never persisted beyond the live collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub session_id: String,
    pub user_id: String,
    pub x: f64,
    pub y: f64,
    pub user_name: String,
    pub timestamp: i64,
    /// When this session first moved its cursor on the canvas.
    pub arrival_time: i64,
    pub is_active: bool,
}

// =============================================================================
// CANVAS
// =============================================================================

/// Access role within a canvas's permission map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

/// Canvas metadata. CRUD lives in the dashboard layer; the core only
/// defines the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasMeta {
    pub name: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-(user, canvas) index entry backing the dashboard listing. Exists
/// only while the user has access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCanvasEntry {
    pub name: String,
    pub role: Role,
    pub last_accessed: i64,
    pub starred: bool,
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// Route log output through the test harness's capture so failing
    /// tests print their tracing context. Idempotent; first caller wins.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    /// A plain unlocked rectangle at (100, 200).
    #[must_use]
    pub fn dummy_shape(id: &str) -> Shape {
        Shape {
            id: id.to_string(),
            kind: ShapeKind::Rectangle,
            x: 100.0,
            y: 200.0,
            width: Some(80.0),
            height: Some(40.0),
            radius: None,
            points: None,
            text: None,
            src: None,
            color: "#FFEB3B".into(),
            rotation: 0.0,
            created_by: "user-a".into(),
            timestamp: 1_700_000_000_000,
            z_index: 0,
            locked_by: None,
            locked_by_user_name: None,
        }
    }

    /// An online, active presence record with the given heartbeat time.
    #[must_use]
    pub fn dummy_presence(session_id: &str, user_id: &str, last_seen: i64) -> PresenceRecord {
        PresenceRecord {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            user_name: format!("{user_id}-name"),
            color: "#4CAF50".into(),
            is_online: true,
            is_active: true,
            last_seen,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_wire_field_names_are_camel_case() {
        let mut shape = test_helpers::dummy_shape("a_100_xyz");
        shape.locked_by = Some("user-b".into());
        shape.locked_by_user_name = Some("Bee".into());
        let json = serde_json::to_value(&shape).unwrap();

        assert_eq!(json["id"], "a_100_xyz");
        assert_eq!(json["type"], "rectangle");
        assert_eq!(json["createdBy"], "user-a");
        assert_eq!(json["zIndex"], 0);
        assert_eq!(json["lockedBy"], "user-b");
        assert_eq!(json["lockedByUserName"], "Bee");
    }

    #[test]
    fn shape_unlocked_serializes_null_lock_fields() {
        let shape = test_helpers::dummy_shape("s1");
        let json = serde_json::to_value(&shape).unwrap();
        assert!(json["lockedBy"].is_null());
        assert!(json["lockedByUserName"].is_null());
        // Absent geometry is omitted entirely, unlike the lock fields.
        assert!(json.get("radius").is_none());
        assert!(json.get("points").is_none());
    }

    #[test]
    fn shape_round_trip() {
        let shape = Shape {
            points: Some(vec![Point { x: 0.0, y: 0.0 }, Point { x: 10.0, y: 5.0 }]),
            kind: ShapeKind::Polygon,
            ..test_helpers::dummy_shape("p1")
        };
        let json = serde_json::to_string(&shape).unwrap();
        let restored: Shape = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, "p1");
        assert_eq!(restored.kind, ShapeKind::Polygon);
        assert_eq!(restored.points.as_ref().map(Vec::len), Some(2));
        assert!(restored.locked_by.is_none());
    }

    #[test]
    fn shape_deserializes_without_lock_fields() {
        // Records written before locking shipped have no lock fields at all.
        let json = serde_json::json!({
            "id": "old_1", "type": "circle", "x": 1.0, "y": 2.0,
            "radius": 30.0, "color": "#000000", "rotation": 0.0,
            "createdBy": "user-a", "timestamp": 5, "zIndex": 3
        });
        let shape: Shape = serde_json::from_value(json).unwrap();
        assert_eq!(shape.kind, ShapeKind::Circle);
        assert!(shape.locked_by.is_none());
    }

    #[test]
    fn locked_by_other_cases() {
        let mut shape = test_helpers::dummy_shape("s1");
        assert!(!shape.locked_by_other("user-a"));

        shape.locked_by = Some("user-a".into());
        assert!(!shape.locked_by_other("user-a"));
        assert!(shape.locked_by_other("user-b"));

        // Empty string is treated as released, matching the wire's
        // string|null contract where older writers cleared with "".
        shape.locked_by = Some(String::new());
        assert!(!shape.locked_by_other("user-b"));
    }

    #[test]
    fn presence_wire_field_names() {
        let presence = test_helpers::dummy_presence("sess-1", "user-a", 42);
        let json = serde_json::to_value(&presence).unwrap();
        assert_eq!(json["sessionId"], "sess-1");
        assert_eq!(json["isOnline"], true);
        assert_eq!(json["isActive"], true);
        assert_eq!(json["lastSeen"], 42);
    }

    #[test]
    fn cursor_round_trip() {
        let cursor = Cursor {
            session_id: "sess-1".into(),
            user_id: "user-a".into(),
            x: 12.5,
            y: -3.0,
            user_name: "Ada".into(),
            timestamp: 100,
            arrival_time: 90,
            is_active: true,
        };
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(json["arrivalTime"], 90);
        let restored: Cursor = serde_json::from_value(json).unwrap();
        assert!((restored.x - 12.5).abs() < f64::EPSILON);
        assert_eq!(restored.arrival_time, 90);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::Owner).unwrap(), "owner");
        assert_eq!(serde_json::to_value(Role::Viewer).unwrap(), "viewer");
    }

    #[test]
    fn canvas_meta_round_trip() {
        let meta = CanvasMeta {
            name: "Roadmap".into(),
            owner: "user-a".into(),
            template: None,
            created_at: 100,
            updated_at: 200,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["createdAt"], 100);
        assert_eq!(json["updatedAt"], 200);
        // An untemplated canvas omits the field entirely.
        assert!(json.get("template").is_none());

        let restored: CanvasMeta = serde_json::from_value(json).unwrap();
        assert_eq!(restored.name, "Roadmap");
        assert!(restored.template.is_none());
    }

    #[test]
    fn user_canvas_entry_round_trip() {
        let entry = UserCanvasEntry {
            name: "Roadmap".into(),
            role: Role::Editor,
            last_accessed: 300,
            starred: true,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["lastAccessed"], 300);
        assert_eq!(json["role"], "editor");
        assert_eq!(json["starred"], true);

        let restored: UserCanvasEntry = serde_json::from_value(json).unwrap();
        assert_eq!(restored.role, Role::Editor);
        assert!(restored.starred);
    }

    #[test]
    fn now_ms_is_positive() {
        assert!(now_ms() > 0);
    }
}
