//! In-memory session store.
//!
//! Holds records in insertion order behind an async lock. Intended for tests
//! and single-process development; nothing survives a restart.

use crate::error::StoreError;
use crate::record::{RecordStatus, SessionRecord, Snapshot};
use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use waypoint_core::{SessionId, SessionRecordId};

/// Session store backed by a `Vec` in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    records: Arc<RwLock<Vec<SessionRecord>>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`, oldest first.
    #[must_use]
    pub fn with_records(records: Vec<SessionRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Returns the total number of records, any status.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn append(
        &self,
        session_id: &SessionId,
        snapshot: &Snapshot,
    ) -> waypoint_core::Result<SessionRecordId, StoreError> {
        let record = SessionRecord::new(session_id.clone(), snapshot.clone());
        let id = record.id;
        self.records.write().await.push(record);
        Ok(id)
    }

    async fn latest_history(
        &self,
        session_id: &SessionId,
    ) -> waypoint_core::Result<Vec<String>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| &r.session_id == session_id && r.is_active())
            .map(|r| r.payload.conversation_history.clone())
            .unwrap_or_default())
    }

    async fn load(
        &self,
        id: SessionRecordId,
    ) -> waypoint_core::Result<Option<SessionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.id == id && r.is_active())
            .cloned())
    }

    async fn update(
        &self,
        id: SessionRecordId,
        snapshot: &Snapshot,
    ) -> waypoint_core::Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id && r.is_active()) {
            Some(record) => {
                record.payload = snapshot.clone();
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_record(&self, id: SessionRecordId) -> waypoint_core::Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.status = RecordStatus::Deleted;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_records(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> waypoint_core::Result<Vec<SessionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| &r.session_id == session_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, session_id: &SessionId) -> waypoint_core::Result<u64, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let mut affected = 0;
        for record in records
            .iter_mut()
            .filter(|r| &r.session_id == session_id && r.is_active())
        {
            record.status = RecordStatus::Deleted;
            record.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    async fn expire_older_than(
        &self,
        age: chrono::Duration,
    ) -> waypoint_core::Result<u64, StoreError> {
        let now = Utc::now();
        let cutoff = now - age;
        let mut records = self.records.write().await;
        let mut affected = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.is_active() && r.created_at < cutoff)
        {
            record.status = RecordStatus::Expired;
            record.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }
}
