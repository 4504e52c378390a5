//! Remote Document Provider Abstraction
//!
//! A provider lists books and their documents (with hierarchy fields when the
//! remote exposes them) and fetches rendered document content. Authentication
//! failures must surface as [`BridgeError::Unauthorized`](crate::error::BridgeError::Unauthorized)
//! so the orchestrator can tell them apart from transient errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Ownership of a remote book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBookType {
    Owned,
    Collaborative,
}

/// A remote book (knowledge base)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBook {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub owner_login: String,
    pub book_type: RemoteBookType,
    pub doc_count: i64,
    pub updated_at: Option<String>,
}

/// Node kind in a book's table of contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteDocType {
    /// Leaf document with content
    Doc,
    /// Section title without content
    Title,
}

/// One entry of a book's remote document snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: i64,
    pub book_id: i64,
    pub slug: String,
    pub title: String,
    pub uuid: Option<String>,
    pub parent_uuid: Option<String>,
    pub child_uuid: Option<String>,
    pub depth: Option<i64>,
    pub sort_order: Option<i64>,
    pub doc_type: RemoteDocType,
    /// RFC 3339 creation timestamp
    pub created_at: Option<String>,
    /// RFC 3339 last-modified timestamp
    pub updated_at: Option<String>,
}

/// Addressing information for one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookContext {
    pub book_id: i64,
    pub owner_login: String,
    pub slug: String,
    pub display_name: String,
}

/// Addressing information for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocator {
    pub id: i64,
    pub slug: String,
    pub title: String,
}

/// Representation of fetched content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    /// Lightweight markup, written as-is
    Markdown,
    /// Rich markup that must be normalized first
    Html,
}

/// Rendering preferences passed to `fetch_content`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Ask for lightweight markup when the document type supports it
    pub prefer_markdown: bool,
    /// Prepend the document title as a level-one heading
    pub include_title: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            prefer_markdown: true,
            include_title: false,
        }
    }
}

/// Fetched document body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteContent {
    pub body: String,
    pub format: ContentFormat,
}

/// Remote corpus access
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Books visible to the current session
    async fn list_books(&self) -> Result<Vec<RemoteBook>>;

    /// Full document snapshot of one book, in table-of-contents order
    async fn list_documents(&self, book: &BookContext) -> Result<Vec<RemoteDocument>>;

    /// Rendered content of one document
    async fn fetch_content(
        &self,
        book: &BookContext,
        doc: &DocumentLocator,
        options: &RenderOptions,
    ) -> Result<RemoteContent>;
}
