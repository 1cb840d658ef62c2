//! SQLite-backed session store.
//!
//! Records are ordered by an autoincrement sequence column rather than by
//! timestamp, so two snapshots written within the same millisecond still
//! read back newest-first.

use crate::error::StoreError;
use crate::record::{RecordStatus, SessionRecord, Snapshot};
use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, instrument};
use waypoint_core::{SessionId, SessionRecordId};

/// Row type for record queries.
#[derive(FromRow)]
struct SessionRecordRow {
    id: String,
    session_id: String,
    payload: String,
    created_at_ms: i64,
    updated_at_ms: i64,
    status: String,
}

impl SessionRecordRow {
    fn try_into_record(self) -> Result<SessionRecord, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRecord {
            id: self.id.clone(),
            reason,
        };

        let id = SessionRecordId::from_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let session_id = SessionId::new(self.session_id.clone()).map_err(|e| corrupt(e.to_string()))?;
        let payload: Snapshot =
            serde_json::from_str(&self.payload).map_err(|e| corrupt(format!("payload: {e}")))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at_ms)
            .ok_or_else(|| corrupt(format!("created_at out of range: {}", self.created_at_ms)))?;
        let updated_at = DateTime::<Utc>::from_timestamp_millis(self.updated_at_ms)
            .ok_or_else(|| corrupt(format!("updated_at out of range: {}", self.updated_at_ms)))?;
        let status = RecordStatus::from_str_value(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;

        Ok(SessionRecord {
            id,
            session_id,
            payload,
            created_at,
            updated_at,
            status,
        })
    }
}

fn encode(snapshot: &Snapshot) -> Result<String, StoreError> {
    serde_json::to_string(snapshot).map_err(|e| StoreError::SerializationFailed {
        reason: e.to_string(),
    })
}

/// Session store persisted in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Wraps an existing pool. The schema must already be migrated.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `url` and runs migrations.
    ///
    /// In-memory URLs get a single-connection pool, since every SQLite
    /// in-memory connection is a separate database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> waypoint_core::Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionFailed {
                details: e.to_string(),
            })?
            .create_if_missing(true);
        let max_connections = if url.contains(":memory:") || url.contains("mode=memory") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                details: e.to_string(),
            })?;

        let store = Self::new(pool);
        store.migrate().await?;
        info!(url, "session store ready");
        Ok(store)
    }

    /// Applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> waypoint_core::Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                details: format!("migration failed: {e}"),
            })?;
        Ok(())
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self, snapshot), fields(session_id = %session_id))]
    async fn append(
        &self,
        session_id: &SessionId,
        snapshot: &Snapshot,
    ) -> waypoint_core::Result<SessionRecordId, StoreError> {
        let record = SessionRecord::new(session_id.clone(), snapshot.clone());
        let payload = encode(snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO session_records
                (id, session_id, payload, created_at_ms, updated_at_ms, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.to_string())
        .bind(session_id.as_str())
        .bind(payload)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        debug!(record_id = %record.id, "snapshot appended");
        Ok(record.id)
    }

    async fn latest_history(
        &self,
        session_id: &SessionId,
    ) -> waypoint_core::Result<Vec<String>, StoreError> {
        let row: Option<SessionRecordRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, payload, created_at_ms, updated_at_ms, status
            FROM session_records
            WHERE session_id = $1 AND status = 'active'
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(row
                .try_into_record()
                .context(StoreError::QueryFailed {
                    details: format!("latest history for session '{session_id}'"),
                })?
                .payload
                .conversation_history),
            None => Ok(Vec::new()),
        }
    }

    async fn load(
        &self,
        id: SessionRecordId,
    ) -> waypoint_core::Result<Option<SessionRecord>, StoreError> {
        let row: Option<SessionRecordRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, payload, created_at_ms, updated_at_ms, status
            FROM session_records
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(Some(row.try_into_record()?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        id: SessionRecordId,
        snapshot: &Snapshot,
    ) -> waypoint_core::Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE session_records
            SET payload = $2, updated_at_ms = $3
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id.to_string())
        .bind(encode(snapshot)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_record(&self, id: SessionRecordId) -> waypoint_core::Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE session_records
            SET status = 'deleted', updated_at_ms = $2
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn recent_records(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> waypoint_core::Result<Vec<SessionRecord>, StoreError> {
        let rows: Vec<SessionRecordRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, payload, created_at_ms, updated_at_ms, status
            FROM session_records
            WHERE session_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(session_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let records = rows
            .into_iter()
            .map(SessionRecordRow::try_into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn soft_delete(&self, session_id: &SessionId) -> waypoint_core::Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE session_records
            SET status = 'deleted', updated_at_ms = $2
            WHERE session_id = $1 AND status = 'active'
            "#,
        )
        .bind(session_id.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        debug!(affected = result.rows_affected(), "session soft-deleted");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn expire_older_than(
        &self,
        age: chrono::Duration,
    ) -> waypoint_core::Result<u64, StoreError> {
        let now = Utc::now();
        let cutoff = now - age;
        let result = sqlx::query(
            r#"
            UPDATE session_records
            SET status = 'expired', updated_at_ms = $2
            WHERE created_at_ms < $1 AND status = 'active'
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected())
    }
}
