//! Book repository trait and SQLite implementation

use crate::error::{LibraryError, Result};
use crate::models::Book;
use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

/// Book repository interface
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Find a book by its remote ID
    async fn find_by_id(&self, id: i64) -> Result<Option<Book>>;

    /// All books, ordered by name
    async fn find_all(&self) -> Result<Vec<Book>>;

    /// Insert or refresh a book; `created_at` of an existing row is kept
    async fn upsert(&self, book: &Book) -> Result<()>;

    /// Upsert many books in one transaction
    async fn upsert_many(&self, books: &[Book]) -> Result<()>;

    /// Update the cached document count
    async fn update_doc_count(&self, id: i64, doc_count: i64, updated_at: i64) -> Result<()>;

    /// Delete a book and, through cascading keys, its documents and resources
    ///
    /// # Returns
    /// - `Ok(true)` if the book was deleted
    /// - `Ok(false)` if it did not exist
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// SQLite implementation of BookRepository
pub struct SqliteBookRepository {
    pool: SqlitePool,
}

impl SqliteBookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct BookRow {
    id: i64,
    slug: String,
    name: String,
    owner_login: String,
    book_type: String,
    doc_count: i64,
    remote_updated_at: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<BookRow> for Book {
    type Error = LibraryError;

    fn try_from(row: BookRow) -> Result<Self> {
        Ok(Book {
            id: row.id,
            slug: row.slug,
            name: row.name,
            owner_login: row.owner_login,
            book_type: row.book_type.parse()?,
            doc_count: row.doc_count,
            remote_updated_at: row.remote_updated_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const UPSERT_BOOK: &str = r#"
    INSERT INTO books (
        id, slug, name, owner_login, book_type, doc_count,
        remote_updated_at, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        slug = excluded.slug,
        name = excluded.name,
        owner_login = excluded.owner_login,
        book_type = excluded.book_type,
        doc_count = excluded.doc_count,
        remote_updated_at = excluded.remote_updated_at,
        updated_at = excluded.updated_at
"#;

async fn upsert_in_tx(tx: &mut Transaction<'_, Sqlite>, book: &Book) -> Result<()> {
    sqlx::query(UPSERT_BOOK)
        .bind(book.id)
        .bind(&book.slug)
        .bind(&book.name)
        .bind(&book.owner_login)
        .bind(book.book_type.as_str())
        .bind(book.doc_count)
        .bind(&book.remote_updated_at)
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl BookRepository for SqliteBookRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>("SELECT * FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Book::try_from).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Book>> {
        let rows = sqlx::query_as::<_, BookRow>("SELECT * FROM books ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Book::try_from).collect()
    }

    async fn upsert(&self, book: &Book) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_in_tx(&mut tx, book).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_many(&self, books: &[Book]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for book in books {
            upsert_in_tx(&mut tx, book).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_doc_count(&self, id: i64, doc_count: i64, updated_at: i64) -> Result<()> {
        let result = sqlx::query("UPDATE books SET doc_count = ?, updated_at = ? WHERE id = ?")
            .bind(doc_count)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Book".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::BookType;

    fn book(id: i64, name: &str) -> Book {
        Book {
            id,
            slug: format!("kb-{}", id),
            name: name.to_string(),
            owner_login: "alice".to_string(),
            book_type: BookType::Owned,
            doc_count: 0,
            remote_updated_at: None,
            created_at: 10,
            updated_at: 10,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_created_at() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteBookRepository::new(pool);

        repo.upsert(&book(1, "Notes")).await.unwrap();
        let mut renamed = book(1, "Field Notes");
        renamed.created_at = 99;
        renamed.updated_at = 99;
        repo.upsert(&renamed).await.unwrap();

        let stored = repo.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.name, "Field Notes");
        assert_eq!(stored.created_at, 10);
        assert_eq!(stored.updated_at, 99);
    }

    #[tokio::test]
    async fn test_upsert_many_and_delete() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteBookRepository::new(pool);

        repo.upsert_many(&[book(1, "B"), book(2, "A")]).await.unwrap();
        let all = repo.find_all().await.unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![2, 1]);

        assert!(repo.delete(1).await.unwrap());
        assert!(!repo.delete(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_doc_count_missing_book() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteBookRepository::new(pool);

        let err = repo.update_doc_count(42, 3, 1).await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }
}
