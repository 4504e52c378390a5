//! Resource repository trait and SQLite implementation

use crate::error::{LibraryError, Result};
use crate::models::Resource;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

/// Resource repository interface
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Look up the record for one `(doc_id, remote_url)` pair
    async fn find(&self, doc_id: i64, remote_url: &str) -> Result<Option<Resource>>;

    /// All resources referenced by a document
    async fn find_by_doc(&self, doc_id: i64) -> Result<Vec<Resource>>;

    /// Insert or replace the record for `(doc_id, remote_url)`
    async fn upsert(&self, resource: &Resource) -> Result<()>;

    /// Remove all records of a document
    async fn delete_by_doc(&self, doc_id: i64) -> Result<u64>;
}

/// SQLite implementation of ResourceRepository
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ResourceRow {
    doc_id: i64,
    remote_url: String,
    resource_type: String,
    status: String,
    local_path: Option<String>,
    filename: Option<String>,
    size_bytes: Option<i64>,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = LibraryError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        Ok(Resource {
            doc_id: row.doc_id,
            remote_url: row.remote_url,
            resource_type: row.resource_type.parse()?,
            status: row.status.parse()?,
            local_path: row.local_path,
            filename: row.filename,
            size_bytes: row.size_bytes,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ResourceRepository for SqliteResourceRepository {
    async fn find(&self, doc_id: i64, remote_url: &str) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE doc_id = ? AND remote_url = ?",
        )
        .bind(doc_id)
        .bind(remote_url)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn find_by_doc(&self, doc_id: i64) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE doc_id = ? ORDER BY created_at, remote_url",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Resource::try_from).collect()
    }

    async fn upsert(&self, resource: &Resource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resources (
                doc_id, remote_url, resource_type, status, local_path, filename,
                size_bytes, error_message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(doc_id, remote_url) DO UPDATE SET
                resource_type = excluded.resource_type,
                status = excluded.status,
                local_path = excluded.local_path,
                filename = excluded.filename,
                size_bytes = excluded.size_bytes,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(resource.doc_id)
        .bind(&resource.remote_url)
        .bind(resource.resource_type.as_str())
        .bind(resource.status.as_str())
        .bind(&resource.local_path)
        .bind(&resource.filename)
        .bind(resource.size_bytes)
        .bind(&resource.error_message)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_doc(&self, doc_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM resources WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
