//! The session store contract.

use crate::error::StoreError;
use crate::record::{SessionRecord, Snapshot};
use async_trait::async_trait;
use waypoint_core::{SessionId, SessionRecordId};

/// Default age after which active records are expired.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Append-only storage for conversation snapshots.
///
/// Reads are by session, newest first. Records are never physically removed:
/// deletion and expiry only change their status.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new active record and returns its ID.
    async fn append(
        &self,
        session_id: &SessionId,
        snapshot: &Snapshot,
    ) -> waypoint_core::Result<SessionRecordId, StoreError>;

    /// Returns the history carried by the newest active record of a session.
    ///
    /// Returns an empty history when the session has no active record.
    async fn latest_history(
        &self,
        session_id: &SessionId,
    ) -> waypoint_core::Result<Vec<String>, StoreError>;

    /// Loads an active record by ID.
    async fn load(
        &self,
        id: SessionRecordId,
    ) -> waypoint_core::Result<Option<SessionRecord>, StoreError>;

    /// Replaces the payload of an active record.
    ///
    /// Returns false if no active record has that ID.
    async fn update(
        &self,
        id: SessionRecordId,
        snapshot: &Snapshot,
    ) -> waypoint_core::Result<bool, StoreError>;

    /// Soft-deletes a single record.
    ///
    /// Returns false if no record has that ID.
    async fn delete_record(&self, id: SessionRecordId) -> waypoint_core::Result<bool, StoreError>;

    /// Returns up to `limit` records of a session, newest first, any status.
    async fn recent_records(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> waypoint_core::Result<Vec<SessionRecord>, StoreError>;

    /// Soft-deletes every active record of a session.
    ///
    /// Returns the number of records affected.
    async fn soft_delete(&self, session_id: &SessionId) -> waypoint_core::Result<u64, StoreError>;

    /// Marks active records created more than `age` ago as expired.
    ///
    /// Returns the number of records affected.
    async fn expire_older_than(
        &self,
        age: chrono::Duration,
    ) -> waypoint_core::Result<u64, StoreError>;
}
