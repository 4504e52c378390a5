//! # Library Metadata Module
//!
//! Owns the metadata store for the mirrored document corpus and provides
//! repository patterns for data access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite schema and migrations (books, documents, resources, sync
//!   sessions and history)
//! - Domain models and their status vocabularies
//! - Repositories with upsert-on-conflict and transactional batch writes

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{
    Book, BookType, DocSyncStatus, DocType, Document, Resource, ResourceStatus, ResourceType,
};
