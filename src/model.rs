//! # Engine Data Model
//!
//! Shared types for the synchronization engine: resource collections, the
//! persisted snapshot document, pending operations, and the small status
//! structs the UI reads.
//!
//! Records are opaque to the engine: each one is a JSON object carrying an
//! `id` string unique within its collection. The engine never interprets
//! business fields; referential integrity and validation belong to the
//! business-rule layer above.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All resource collections, keyed by resource name, each in insertion order
pub type Collections = BTreeMap<String, Vec<Value>>;

/// Extract the `id` field of a record, when present
pub fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Stable name used in the local database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse a stored kind name; unknown names are rejected
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Delivery state of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Awaiting server acknowledgment
    Pending,
    /// Rejected past the retry bound; needs manual resolution
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A mutation awaiting server acknowledgment
///
/// Queue ids are never reused; operations for the same resource drain in
/// enqueue order. `retry_count`, `last_attempt` and `error_message` track
/// server rejections so the UI can surface a stuck item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub queue_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub resource: String,
    pub kind: OperationKind,
    pub target_id: Option<String>,
    pub payload: Value,
    pub retry_count: i32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub status: OperationStatus,
}

/// The persisted whole-document copy of all resource collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the collections were captured from the server
    pub captured_at: DateTime<Utc>,
    /// Full resource state at capture time
    pub collections: Collections,
    /// Whether heavy fields were stripped to fit the storage quota
    pub light: bool,
}

/// Outcome of one queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations acknowledged and removed from the queue
    pub succeeded: usize,
    /// Operations that failed to send this pass
    pub failed: usize,
}

/// Engine status the UI polls for its connectivity banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub online: bool,
    pub pending_count: usize,
    pub last_snapshot: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [OperationKind::Create, OperationKind::Update, OperationKind::Delete] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::parse("upsert"), None);
    }

    #[test]
    fn test_status_names_round_trip() {
        for status in [OperationStatus::Pending, OperationStatus::Failed] {
            assert_eq!(OperationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OperationStatus::parse("done"), None);
    }

    #[test]
    fn test_record_id() {
        assert_eq!(record_id(&json!({"id": "m-1", "model": "X200"})), Some("m-1"));
        assert_eq!(record_id(&json!({"model": "X200"})), None);
        assert_eq!(record_id(&json!({"id": 42})), None);
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut collections = Collections::new();
        collections.insert("clients".to_string(), vec![json!({"id": "c-1"})]);
        let snapshot = Snapshot {
            captured_at: Utc::now(),
            collections,
            light: false,
        };
        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.collections["clients"].len(), 1);
        assert!(!parsed.light);
    }
}
