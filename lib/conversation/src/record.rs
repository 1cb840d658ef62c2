//! Persisted conversation snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_core::{SessionId, SessionRecordId};

const HUMAN_PREFIX: &str = "Human: ";
const AI_PREFIX: &str = "AI: ";

/// Formats a user utterance as a history line.
#[must_use]
pub fn human_line(text: &str) -> String {
    format!("{HUMAN_PREFIX}{text}")
}

/// Formats an assistant answer as a history line.
#[must_use]
pub fn ai_line(text: &str) -> String {
    format!("{AI_PREFIX}{text}")
}

/// The subset of a finished run that is carried into the next turn.
///
/// Every snapshot holds the *full* history up to and including its own turn;
/// the store never merges snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Turn lines, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<String>,
    /// The answer produced by the run, if any.
    #[serde(default)]
    pub final_answer: Option<String>,
}

impl Snapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(conversation_history: Vec<String>, final_answer: Option<String>) -> Self {
        Self {
            conversation_history,
            final_answer,
        }
    }
}

/// Lifecycle status of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Visible to history reads.
    Active,
    /// Soft-deleted by an explicit call.
    Deleted,
    /// Aged out by the retention sweep.
    Expired,
}

impl RecordStatus {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
            Self::Expired => "expired",
        }
    }

    /// Parses the stored representation.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// One persisted snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Record ID.
    pub id: SessionRecordId,
    /// Session this record belongs to.
    pub session_id: SessionId,
    /// The snapshot.
    pub payload: Snapshot,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record was last changed.
    pub updated_at: DateTime<Utc>,
    /// Current status.
    pub status: RecordStatus,
}

impl SessionRecord {
    /// Creates a new active record stamped with the current time.
    #[must_use]
    pub fn new(session_id: SessionId, payload: Snapshot) -> Self {
        let now = Utc::now();
        Self {
            id: SessionRecordId::new(),
            session_id,
            payload,
            created_at: now,
            updated_at: now,
            status: RecordStatus::Active,
        }
    }

    /// Returns true if the record is visible to history reads.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_lines() {
        assert_eq!(human_line("Hello"), "Human: Hello");
        assert_eq!(ai_line("Hi there"), "AI: Hi there");
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            RecordStatus::Active,
            RecordStatus::Deleted,
            RecordStatus::Expired,
        ] {
            assert_eq!(RecordStatus::from_str_value(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::from_str_value("archived"), None);
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snapshot: Snapshot = serde_json::from_str("{}").expect("deserialize");
        assert!(snapshot.conversation_history.is_empty());
        assert_eq!(snapshot.final_answer, None);
    }

    #[test]
    fn new_record_is_active() {
        let record = SessionRecord::new(
            SessionId::new("s1").unwrap(),
            Snapshot::new(vec![human_line("hi")], None),
        );
        assert!(record.is_active());
        assert_eq!(record.created_at, record.updated_at);
    }
}
