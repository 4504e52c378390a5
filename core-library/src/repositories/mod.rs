//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for the mirrored corpus.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx with raw queries and `FromRow` rows
//! - Batch writes run inside a single transaction
//!
//! ## Available Repositories
//!
//! - `BookRepository` - Books (knowledge bases)
//! - `DocumentRepository` - Documents and section titles with sync status
//! - `ResourceRepository` - Embedded images and attachments per document

pub mod book;
pub mod document;
pub mod resource;

pub use book::{BookRepository, SqliteBookRepository};
pub use document::{DocumentRepository, SqliteDocumentRepository};
pub use resource::{ResourceRepository, SqliteResourceRepository};
