//! # Sync Session & History Repositories
//!
//! Provides database persistence for sync sessions and the sync audit trail.
//!
//! ## Overview
//!
//! - `SyncSessionRepository` stores resumable sessions, including the
//!   ordered set of completed document ids (a JSON array column).
//! - `SyncHistoryRepository` stores one row per sync invocation and refuses
//!   to modify a row once it has left `running`.
//! - Both expose the crash-recovery sweeps run at startup.

use crate::history::{HistoryStatus, SyncHistory, SyncHistoryId};
use crate::session::{SessionStatus, SyncSession, SyncSessionId};
use crate::{Result, SyncError};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository trait for sync session persistence
#[async_trait]
pub trait SyncSessionRepository: Send + Sync {
    /// Insert a new session
    async fn insert(&self, session: &SyncSession) -> Result<()>;

    /// Overwrite status, counters and completed ids of an existing session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the row does not exist
    async fn update(&self, session: &SyncSession) -> Result<()>;

    async fn find_by_id(&self, id: &SyncSessionId) -> Result<Option<SyncSession>>;

    /// Most recently touched interrupted session
    async fn find_latest_interrupted(&self) -> Result<Option<SyncSession>>;

    /// Force every `running` session to `interrupted`
    ///
    /// # Returns
    ///
    /// Number of sessions changed
    async fn interrupt_running(&self, now: i64) -> Result<u64>;
}

/// Repository trait for sync history persistence
#[async_trait]
pub trait SyncHistoryRepository: Send + Sync {
    async fn insert(&self, history: &SyncHistory) -> Result<()>;

    /// Persist counters and, if terminal, the final status
    ///
    /// # Errors
    ///
    /// - `HistoryFinalized` if the stored row is no longer `running`
    /// - `HistoryNotFound` if the row does not exist
    async fn update(&self, history: &SyncHistory) -> Result<()>;

    async fn find_by_id(&self, id: &SyncHistoryId) -> Result<Option<SyncHistory>>;

    /// Most recent records first
    async fn list_recent(&self, limit: u32) -> Result<Vec<SyncHistory>>;

    /// Finalize every `running` record as `failed` with `message`
    ///
    /// # Returns
    ///
    /// Number of records changed
    async fn fail_running(&self, message: &str, now: i64) -> Result<u64>;
}

// ============================================================================
// SQLite Implementations
// ============================================================================

/// SQLite implementation of SyncSessionRepository
pub struct SqliteSyncSessionRepository {
    pool: SqlitePool,
}

impl SqliteSyncSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncSessionRow {
    id: String,
    book_ids: String,
    total_docs: i64,
    completed_doc_ids: String,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SyncSessionRow> for SyncSession {
    type Error = SyncError;

    fn try_from(row: SyncSessionRow) -> Result<Self> {
        Ok(SyncSession {
            id: SyncSessionId::from_string(&row.id)?,
            book_ids: serde_json::from_str(&row.book_ids)?,
            total_docs: row.total_docs.max(0) as u64,
            completed_doc_ids: serde_json::from_str(&row.completed_doc_ids)?,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, book_ids, total_docs, completed_doc_ids, status, created_at, updated_at";

#[async_trait]
impl SyncSessionRepository for SqliteSyncSessionRepository {
    async fn insert(&self, session: &SyncSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_sessions (
                id, book_ids, total_docs, completed_doc_ids, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.as_str())
        .bind(serde_json::to_string(&session.book_ids)?)
        .bind(session.total_docs as i64)
        .bind(serde_json::to_string(&session.completed_doc_ids)?)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, session: &SyncSession) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_sessions SET
                total_docs = ?,
                completed_doc_ids = ?,
                status = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(session.total_docs as i64)
        .bind(serde_json::to_string(&session.completed_doc_ids)?)
        .bind(session.status.as_str())
        .bind(session.updated_at)
        .bind(session.id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::SessionNotFound {
                session_id: session.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncSessionId) -> Result<Option<SyncSession>> {
        let row = sqlx::query_as::<_, SyncSessionRow>(&format!(
            "SELECT {} FROM sync_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncSession::try_from).transpose()
    }

    async fn find_latest_interrupted(&self) -> Result<Option<SyncSession>> {
        let row = sqlx::query_as::<_, SyncSessionRow>(&format!(
            "SELECT {} FROM sync_sessions WHERE status = ? \
             ORDER BY updated_at DESC, created_at DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(SessionStatus::Interrupted.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncSession::try_from).transpose()
    }

    async fn interrupt_running(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_sessions SET status = ?, updated_at = ?
            WHERE status = ?
            "#,
        )
        .bind(SessionStatus::Interrupted.as_str())
        .bind(now)
        .bind(SessionStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// SQLite implementation of SyncHistoryRepository
pub struct SqliteSyncHistoryRepository {
    pool: SqlitePool,
}

impl SqliteSyncHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncHistoryRow {
    id: String,
    session_id: Option<String>,
    book_ids: String,
    total_docs: i64,
    synced_docs: i64,
    failed_docs: i64,
    status: String,
    error_message: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<SyncHistoryRow> for SyncHistory {
    type Error = SyncError;

    fn try_from(row: SyncHistoryRow) -> Result<Self> {
        Ok(SyncHistory {
            id: SyncHistoryId::from_string(&row.id)?,
            session_id: row
                .session_id
                .as_deref()
                .map(SyncSessionId::from_string)
                .transpose()?,
            book_ids: serde_json::from_str(&row.book_ids)?,
            total_docs: row.total_docs.max(0) as u64,
            synced_docs: row.synced_docs.max(0) as u64,
            failed_docs: row.failed_docs.max(0) as u64,
            status: row.status.parse()?,
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

const HISTORY_COLUMNS: &str = "id, session_id, book_ids, total_docs, synced_docs, failed_docs, \
                               status, error_message, started_at, finished_at";

#[async_trait]
impl SyncHistoryRepository for SqliteSyncHistoryRepository {
    async fn insert(&self, history: &SyncHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (
                id, session_id, book_ids, total_docs, synced_docs, failed_docs,
                status, error_message, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(history.id.as_str())
        .bind(history.session_id.map(|id| id.as_str()))
        .bind(serde_json::to_string(&history.book_ids)?)
        .bind(history.total_docs as i64)
        .bind(history.synced_docs as i64)
        .bind(history.failed_docs as i64)
        .bind(history.status.as_str())
        .bind(&history.error_message)
        .bind(history.started_at)
        .bind(history.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, history: &SyncHistory) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_history SET
                session_id = ?,
                total_docs = ?,
                synced_docs = ?,
                failed_docs = ?,
                status = ?,
                error_message = ?,
                finished_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(history.session_id.map(|id| id.as_str()))
        .bind(history.total_docs as i64)
        .bind(history.synced_docs as i64)
        .bind(history.failed_docs as i64)
        .bind(history.status.as_str())
        .bind(&history.error_message)
        .bind(history.finished_at)
        .bind(history.id.as_str())
        .bind(HistoryStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(&history.id).await? {
                Some(_) => Err(SyncError::HistoryFinalized(history.id.to_string())),
                None => Err(SyncError::HistoryNotFound {
                    history_id: history.id.to_string(),
                }),
            };
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncHistoryId) -> Result<Option<SyncHistory>> {
        let row = sqlx::query_as::<_, SyncHistoryRow>(&format!(
            "SELECT {} FROM sync_history WHERE id = ?",
            HISTORY_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncHistory::try_from).transpose()
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SyncHistory>> {
        let rows = sqlx::query_as::<_, SyncHistoryRow>(&format!(
            "SELECT {} FROM sync_history ORDER BY started_at DESC, rowid DESC LIMIT ?",
            HISTORY_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncHistory::try_from).collect()
    }

    async fn fail_running(&self, message: &str, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_history SET status = ?, error_message = ?, finished_at = ?
            WHERE status = ?
            "#,
        )
        .bind(HistoryStatus::Failed.as_str())
        .bind(message)
        .bind(now)
        .bind(HistoryStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
