//! Yuque web API response types
//!
//! Only the fields the sync engine reads are modelled; everything else in
//! the payloads is ignored.

use serde::Deserialize;

/// Every endpoint wraps its payload in `{"data": ...}`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// A group of owned books (`/api/mine/book_stacks`)
#[derive(Debug, Clone, Deserialize)]
pub struct BookStack {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub books: Vec<YuqueBook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YuqueUser {
    pub login: String,
}

/// Book (knowledge base) resource
#[derive(Debug, Clone, Deserialize)]
pub struct YuqueBook {
    pub id: i64,
    pub slug: String,
    pub name: String,

    #[serde(default)]
    pub user: Option<YuqueUser>,

    /// Number of documents
    #[serde(default)]
    pub items_count: i64,

    #[serde(default)]
    pub updated_at: Option<String>,

    #[serde(default)]
    pub content_updated_at: Option<String>,
}

/// Document entry of `/api/docs?book_id=`
#[derive(Debug, Clone, Deserialize)]
pub struct YuqueDoc {
    pub id: i64,
    pub slug: String,
    pub title: String,

    /// `Doc`, `Sheet`, `Board`, ...
    #[serde(rename = "type", default)]
    pub doc_type: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub updated_at: Option<String>,

    /// Last change of the body; metadata edits only touch `updated_at`
    #[serde(default)]
    pub content_updated_at: Option<String>,
}

/// Table-of-contents node of `/api/catalog_nodes?book_id=`
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogNode {
    /// `DOC`, `TITLE` or `LINK`
    #[serde(rename = "type")]
    pub node_type: String,

    pub title: String,
    pub uuid: String,

    #[serde(default)]
    pub parent_uuid: Option<String>,

    #[serde(default)]
    pub child_uuid: Option<String>,

    #[serde(default)]
    pub doc_id: Option<i64>,

    #[serde(default)]
    pub level: Option<i64>,
}

/// Document detail of `/api/docs/{slug}`
#[derive(Debug, Clone, Deserialize)]
pub struct DocDetail {
    #[serde(default)]
    pub title: Option<String>,

    /// Markdown source, present with `mode=markdown` for text documents
    #[serde(default)]
    pub sourcecode: Option<String>,

    /// Rendered HTML
    #[serde(default)]
    pub content: Option<String>,
}
