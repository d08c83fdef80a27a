//! Delta events, the unit of output.
//!
//! Events are flat structs with base fields at the top level, serialized
//! in the documented wire shape (serialization itself is the consumer's
//! responsibility; the types only derive `Serialize`/`Deserialize`).
//! Sequence numbers are monotonic per session and assigned at emission
//! time, after coalescing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CoreError;

/// Event kind discriminator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[serde(rename = "added")]
    PathAdded,
    #[serde(rename = "removed")]
    PathRemoved,
    #[serde(rename = "changed")]
    ValueChanged,
    Progress,
    Error,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathAdded => "added",
            Self::PathRemoved => "removed",
            Self::ValueChanged => "changed",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

/// Machine code plus human message, carried by `error` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&CoreError> for ErrorInfo {
    fn from(e: &CoreError) -> Self {
        Self {
            code: e.error_kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// A path-scoped delta event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    /// Session this event belongs to.
    pub session_id: String,
    /// Monotonic sequence number within the session.
    pub seq: u64,
    /// Wall-clock emission time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Event kind discriminator.
    pub kind: EventKind,
    /// Path rendered in the session's configured style. Empty for the root
    /// and for events without a path scope.
    pub path: String,
    /// New value, for `added`/`changed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Sketch of the previous value, for `changed`/`removed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Error detail, for `error` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl DeltaEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete)
    }
}

/// What one `ingest` call did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Chunks received so far in this session, this call included.
    pub chunks_received: u64,
    /// Bytes currently held in the ring buffer.
    pub bytes_buffered: usize,
    /// Bytes discarded by this call's overflow trimming, if any.
    pub bytes_dropped: usize,
    /// Whether the committed tree changed.
    pub tree_updated: bool,
    /// Delta events flushed to the bus by this call.
    pub events_emitted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::PathAdded).unwrap(),
            r#""added""#
        );
        assert_eq!(
            serde_json::to_string(&EventKind::ValueChanged).unwrap(),
            r#""changed""#
        );
        assert_eq!(
            serde_json::to_string(&EventKind::Complete).unwrap(),
            r#""complete""#
        );
    }

    #[test]
    fn event_serializes_wire_shape() {
        let event = DeltaEvent {
            session_id: "s1".into(),
            seq: 7,
            timestamp_ms: 1_700_000_000_000,
            kind: EventKind::ValueChanged,
            path: "users[0].name".into(),
            value: Some(serde_json::json!("Bob")),
            old_value: Some(serde_json::json!("Alice")),
            error: None,
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "changed");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["path"], "users[0].name");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_info_from_core_error() {
        let info = ErrorInfo::from(&CoreError::SessionClosed("s1".into()));
        assert_eq!(info.code, "session_closed");
        assert!(info.message.contains("s1"));
    }

    #[test]
    fn complete_is_terminal() {
        let event = DeltaEvent {
            session_id: "s".into(),
            seq: 0,
            timestamp_ms: 0,
            kind: EventKind::Complete,
            path: String::new(),
            value: None,
            old_value: None,
            error: None,
        };
        assert!(event.is_terminal());
    }
}
