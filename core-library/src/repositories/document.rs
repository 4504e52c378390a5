//! Document repository trait and SQLite implementation
//!
//! Documents are never removed when they disappear remotely; the change
//! detector marks them `deleted` instead. Physical deletion only happens
//! through a book purge (cascading foreign key).

use crate::error::{LibraryError, Result};
use crate::models::{DocSyncStatus, Document};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;

/// Document repository interface
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Document>>;

    /// Documents with the given ids; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Document>>;

    /// All documents of a book in table-of-contents order
    async fn find_by_book(&self, book_id: i64) -> Result<Vec<Document>>;

    /// All documents of several books, grouped by book in the given order
    async fn find_by_books(&self, book_ids: &[i64]) -> Result<Vec<Document>>;

    /// Document currently materialized at `local_path`
    async fn find_by_local_path(&self, local_path: &str) -> Result<Option<Document>>;

    /// Insert or replace a document row
    ///
    /// # Errors
    /// Returns `InvalidInput` if `local_path`/`local_synced_at` are not set
    /// together.
    async fn upsert(&self, document: &Document) -> Result<()>;

    /// Upsert many documents atomically
    async fn upsert_many(&self, documents: &[Document]) -> Result<()>;

    /// Set the status of one document
    ///
    /// # Returns
    /// `Ok(false)` if the document does not exist
    async fn update_status(&self, id: i64, status: DocSyncStatus, updated_at: i64) -> Result<bool>;

    /// Move documents currently in `from` to `to`; others are left alone
    ///
    /// # Returns
    /// Number of documents changed
    async fn transition_status(
        &self,
        ids: &[i64],
        from: DocSyncStatus,
        to: DocSyncStatus,
        updated_at: i64,
    ) -> Result<u64>;

    /// Document counts per status for one book
    async fn count_by_status(&self, book_id: i64) -> Result<HashMap<DocSyncStatus, i64>>;
}

/// SQLite implementation of DocumentRepository
pub struct SqliteDocumentRepository {
    pool: SqlitePool,
}

impl SqliteDocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn validate(document: &Document) -> Result<()> {
        document.validate().map_err(|message| LibraryError::InvalidInput {
            field: "Document".to_string(),
            message,
        })
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: i64,
    book_id: i64,
    slug: String,
    title: String,
    uuid: Option<String>,
    parent_uuid: Option<String>,
    child_uuid: Option<String>,
    depth: Option<i64>,
    sort_order: Option<i64>,
    doc_type: String,
    local_path: Option<String>,
    remote_created_at: Option<String>,
    remote_updated_at: Option<String>,
    local_synced_at: Option<String>,
    sync_status: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<DocumentRow> for Document {
    type Error = LibraryError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(Document {
            id: row.id,
            book_id: row.book_id,
            slug: row.slug,
            title: row.title,
            uuid: row.uuid,
            parent_uuid: row.parent_uuid,
            child_uuid: row.child_uuid,
            depth: row.depth,
            sort_order: row.sort_order,
            doc_type: row.doc_type.parse()?,
            local_path: row.local_path,
            remote_created_at: row.remote_created_at,
            remote_updated_at: row.remote_updated_at,
            local_synced_at: row.local_synced_at,
            sync_status: row.sync_status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const UPSERT_DOCUMENT: &str = r#"
    INSERT INTO documents (
        id, book_id, slug, title, uuid, parent_uuid, child_uuid, depth, sort_order,
        doc_type, local_path, remote_created_at, remote_updated_at, local_synced_at,
        sync_status, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        book_id = excluded.book_id,
        slug = excluded.slug,
        title = excluded.title,
        uuid = excluded.uuid,
        parent_uuid = excluded.parent_uuid,
        child_uuid = excluded.child_uuid,
        depth = excluded.depth,
        sort_order = excluded.sort_order,
        doc_type = excluded.doc_type,
        local_path = excluded.local_path,
        remote_created_at = excluded.remote_created_at,
        remote_updated_at = excluded.remote_updated_at,
        local_synced_at = excluded.local_synced_at,
        sync_status = excluded.sync_status,
        updated_at = excluded.updated_at
"#;

const ORDER_BY_TOC: &str = " ORDER BY book_id, COALESCE(sort_order, 9223372036854775807), id";

async fn upsert_in_tx(tx: &mut Transaction<'_, Sqlite>, document: &Document) -> Result<()> {
    sqlx::query(UPSERT_DOCUMENT)
        .bind(document.id)
        .bind(document.book_id)
        .bind(&document.slug)
        .bind(&document.title)
        .bind(&document.uuid)
        .bind(&document.parent_uuid)
        .bind(&document.child_uuid)
        .bind(document.depth)
        .bind(document.sort_order)
        .bind(document.doc_type.as_str())
        .bind(&document.local_path)
        .bind(&document.remote_created_at)
        .bind(&document.remote_updated_at)
        .bind(&document.local_synced_at)
        .bind(document.sync_status.as_str())
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn rows_to_documents(rows: Vec<DocumentRow>) -> Result<Vec<Document>> {
    rows.into_iter().map(Document::try_from).collect()
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Document::try_from).transpose()
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM documents WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        builder.push(ORDER_BY_TOC);

        let rows = builder
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await?;
        rows_to_documents(rows)
    }

    async fn find_by_book(&self, book_id: i64) -> Result<Vec<Document>> {
        let sql = format!("SELECT * FROM documents WHERE book_id = ?{}", ORDER_BY_TOC);
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;
        rows_to_documents(rows)
    }

    async fn find_by_books(&self, book_ids: &[i64]) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for book_id in book_ids {
            documents.extend(self.find_by_book(*book_id).await?);
        }
        Ok(documents)
    }

    async fn find_by_local_path(&self, local_path: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE local_path = ? LIMIT 1",
        )
        .bind(local_path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Document::try_from).transpose()
    }

    async fn upsert(&self, document: &Document) -> Result<()> {
        Self::validate(document)?;
        let mut tx = self.pool.begin().await?;
        upsert_in_tx(&mut tx, document).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_many(&self, documents: &[Document]) -> Result<()> {
        for document in documents {
            Self::validate(document)?;
        }

        let mut tx = self.pool.begin().await?;
        for document in documents {
            upsert_in_tx(&mut tx, document).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_status(&self, id: i64, status: DocSyncStatus, updated_at: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE documents SET sync_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(updated_at)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_status(
        &self,
        ids: &[i64],
        from: DocSyncStatus,
        to: DocSyncStatus,
        updated_at: i64,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE documents SET sync_status = ");
        builder
            .push_bind(to.as_str())
            .push(", updated_at = ")
            .push_bind(updated_at)
            .push(" WHERE sync_status = ")
            .push_bind(from.as_str())
            .push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, book_id: i64) -> Result<HashMap<DocSyncStatus, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sync_status, COUNT(*) FROM documents WHERE book_id = ? GROUP BY sync_status",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse()?, count)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Book, BookType, DocType};
    use crate::repositories::{BookRepository, SqliteBookRepository};

    async fn setup() -> (SqliteDocumentRepository, SqliteBookRepository) {
        let pool = create_test_pool().await.unwrap();
        let books = SqliteBookRepository::new(pool.clone());
        books
            .upsert(&Book {
                id: 1,
                slug: "kb".to_string(),
                name: "KB".to_string(),
                owner_login: "alice".to_string(),
                book_type: BookType::Owned,
                doc_count: 0,
                remote_updated_at: None,
                created_at: 0,
                updated_at: 0,
            })
            .await
            .unwrap();
        (SqliteDocumentRepository::new(pool), books)
    }

    fn doc(id: i64, sort_order: i64) -> Document {
        Document {
            id,
            book_id: 1,
            slug: format!("doc-{}", id),
            title: format!("Doc {}", id),
            uuid: Some(format!("u{}", id)),
            parent_uuid: None,
            child_uuid: None,
            depth: Some(1),
            sort_order: Some(sort_order),
            doc_type: DocType::Doc,
            local_path: None,
            remote_created_at: Some("2024-01-01T00:00:00Z".to_string()),
            remote_updated_at: Some("2024-01-02T00:00:00Z".to_string()),
            local_synced_at: None,
            sync_status: DocSyncStatus::New,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_upsert_many_orders_by_toc() {
        let (repo, _) = setup().await;
        repo.upsert_many(&[doc(10, 2), doc(11, 0), doc(12, 1)])
            .await
            .unwrap();

        let ids: Vec<i64> = repo
            .find_by_book(1)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![11, 12, 10]);
    }

    #[tokio::test]
    async fn test_upsert_many_is_atomic() {
        let (repo, _) = setup().await;
        let mut orphan = doc(20, 0);
        orphan.book_id = 999;

        let result = repo.upsert_many(&[doc(19, 0), orphan]).await;
        assert!(result.is_err());
        assert!(repo.find_by_id(19).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_rejects_half_materialized() {
        let (repo, _) = setup().await;
        let mut broken = doc(30, 0);
        broken.local_synced_at = Some("2024-01-03T00:00:00Z".to_string());

        let err = repo.upsert(&broken).await.unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_mark_synced_round_trip_and_local_path_lookup() {
        let (repo, _) = setup().await;
        let mut d = doc(40, 0);
        d.mark_synced("/out/KB/Doc 40.md", "2024-01-03T00:00:00Z", 5);
        repo.upsert(&d).await.unwrap();

        let found = repo
            .find_by_local_path("/out/KB/Doc 40.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, 40);
        assert_eq!(found.sync_status, DocSyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_transition_status_only_touches_matching_rows() {
        let (repo, _) = setup().await;
        let mut failed = doc(50, 0);
        failed.sync_status = DocSyncStatus::Failed;
        repo.upsert_many(&[failed, doc(51, 1)]).await.unwrap();

        let changed = repo
            .transition_status(&[50, 51], DocSyncStatus::Failed, DocSyncStatus::New, 9)
            .await
            .unwrap();

        assert_eq!(changed, 1);
        let counts = repo.count_by_status(1).await.unwrap();
        assert_eq!(counts.get(&DocSyncStatus::New), Some(&2));
        assert_eq!(counts.get(&DocSyncStatus::Failed), None);
    }

    #[tokio::test]
    async fn test_book_delete_cascades_to_documents() {
        let (repo, books) = setup().await;
        repo.upsert(&doc(60, 0)).await.unwrap();

        books.delete(1).await.unwrap();

        assert!(repo.find_by_id(60).await.unwrap().is_none());
    }
}
