//! Domain models for the mirrored corpus
//!
//! `Book`, `Document` and `Resource` mirror the rows in the metadata store.
//! Status enums serialize to the lowercase strings stored in SQLite.

use bridge_traits::remote::{
    BookContext, DocumentLocator, RemoteBook, RemoteBookType, RemoteDocType, RemoteDocument,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LibraryError;

// =============================================================================
// Book
// =============================================================================

/// Ownership of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookType {
    Owned,
    Collaborative,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Owned => "owned",
            BookType::Collaborative => "collaborative",
        }
    }
}

impl FromStr for BookType {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owned" => Ok(BookType::Owned),
            "collaborative" => Ok(BookType::Collaborative),
            _ => Err(LibraryError::invalid("book_type", format!("unknown value '{}'", s))),
        }
    }
}

impl From<RemoteBookType> for BookType {
    fn from(value: RemoteBookType) -> Self {
        match value {
            RemoteBookType::Owned => BookType::Owned,
            RemoteBookType::Collaborative => BookType::Collaborative,
        }
    }
}

/// A named collection of documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub owner_login: String,
    pub book_type: BookType,
    pub doc_count: i64,
    pub remote_updated_at: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Book {
    pub fn from_remote(remote: &RemoteBook, now: i64) -> Self {
        Self {
            id: remote.id,
            slug: remote.slug.clone(),
            name: remote.name.clone(),
            owner_login: remote.owner_login.clone(),
            book_type: remote.book_type.into(),
            doc_count: remote.doc_count,
            remote_updated_at: remote.updated_at.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Placeholder row for a book only known through its addressing context
    pub fn from_context(context: &BookContext, now: i64) -> Self {
        Self {
            id: context.book_id,
            slug: context.slug.clone(),
            name: context.display_name.clone(),
            owner_login: context.owner_login.clone(),
            book_type: BookType::Owned,
            doc_count: 0,
            remote_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn context(&self) -> BookContext {
        BookContext {
            book_id: self.id,
            owner_login: self.owner_login.clone(),
            slug: self.slug.clone(),
            display_name: self.name.clone(),
        }
    }
}

// =============================================================================
// Document
// =============================================================================

/// Per-document synchronization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocSyncStatus {
    /// Observed remotely, never materialized
    New,
    /// Queued for sync
    Pending,
    /// Remote changed since the last local write
    Modified,
    /// Local copy matches the remote
    Synced,
    /// Gone from the remote snapshot
    Deleted,
    /// Last attempt failed; excluded until retried
    Failed,
}

impl DocSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocSyncStatus::New => "new",
            DocSyncStatus::Pending => "pending",
            DocSyncStatus::Modified => "modified",
            DocSyncStatus::Synced => "synced",
            DocSyncStatus::Deleted => "deleted",
            DocSyncStatus::Failed => "failed",
        }
    }

    pub const ALL: [DocSyncStatus; 6] = [
        DocSyncStatus::New,
        DocSyncStatus::Pending,
        DocSyncStatus::Modified,
        DocSyncStatus::Synced,
        DocSyncStatus::Deleted,
        DocSyncStatus::Failed,
    ];
}

impl FromStr for DocSyncStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocSyncStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| LibraryError::invalid("sync_status", format!("unknown value '{}'", s)))
    }
}

impl fmt::Display for DocSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf document or section title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Doc,
    Title,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Doc => "doc",
            DocType::Title => "title",
        }
    }
}

impl FromStr for DocType {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doc" => Ok(DocType::Doc),
            "title" => Ok(DocType::Title),
            _ => Err(LibraryError::invalid("doc_type", format!("unknown value '{}'", s))),
        }
    }
}

impl From<RemoteDocType> for DocType {
    fn from(value: RemoteDocType) -> Self {
        match value {
            RemoteDocType::Doc => DocType::Doc,
            RemoteDocType::Title => DocType::Title,
        }
    }
}

/// One syncable content unit
///
/// `local_path` and `local_synced_at` are only ever set together, by
/// [`Document::mark_synced`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub book_id: i64,
    pub slug: String,
    pub title: String,
    pub uuid: Option<String>,
    pub parent_uuid: Option<String>,
    pub child_uuid: Option<String>,
    pub depth: Option<i64>,
    pub sort_order: Option<i64>,
    pub doc_type: DocType,
    pub local_path: Option<String>,
    pub remote_created_at: Option<String>,
    pub remote_updated_at: Option<String>,
    pub local_synced_at: Option<String>,
    pub sync_status: DocSyncStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// First observation of a remote document
    pub fn from_remote(remote: &RemoteDocument, now: i64) -> Self {
        let mut doc = Self {
            id: remote.id,
            book_id: remote.book_id,
            slug: String::new(),
            title: String::new(),
            uuid: None,
            parent_uuid: None,
            child_uuid: None,
            depth: None,
            sort_order: None,
            doc_type: DocType::Doc,
            local_path: None,
            remote_created_at: None,
            remote_updated_at: None,
            local_synced_at: None,
            sync_status: DocSyncStatus::New,
            created_at: now,
            updated_at: now,
        };
        doc.apply_remote(remote, now);
        doc
    }

    /// Refresh remote-owned fields, leaving local materialization untouched
    pub fn apply_remote(&mut self, remote: &RemoteDocument, now: i64) {
        self.book_id = remote.book_id;
        self.slug = remote.slug.clone();
        self.title = remote.title.clone();
        self.uuid = remote.uuid.clone();
        self.parent_uuid = remote.parent_uuid.clone();
        self.child_uuid = remote.child_uuid.clone();
        self.depth = remote.depth;
        self.sort_order = remote.sort_order;
        self.doc_type = remote.doc_type.into();
        self.remote_created_at = remote.created_at.clone();
        self.remote_updated_at = remote.updated_at.clone();
        self.updated_at = now;
    }

    pub fn mark_synced(&mut self, local_path: impl Into<String>, synced_at: impl Into<String>, now: i64) {
        self.local_path = Some(local_path.into());
        self.local_synced_at = Some(synced_at.into());
        self.sync_status = DocSyncStatus::Synced;
        self.updated_at = now;
    }

    pub fn set_status(&mut self, status: DocSyncStatus, now: i64) {
        self.sync_status = status;
        self.updated_at = now;
    }

    pub fn is_title(&self) -> bool {
        self.doc_type == DocType::Title
    }

    pub fn locator(&self) -> DocumentLocator {
        DocumentLocator {
            id: self.id,
            slug: self.slug.clone(),
            title: self.title.clone(),
        }
    }

    /// Validate field invariants before persisting
    pub fn validate(&self) -> Result<(), String> {
        if self.local_path.is_some() != self.local_synced_at.is_some() {
            return Err(format!(
                "document {} must set local_path and local_synced_at together",
                self.id
            ));
        }
        if self.sync_status == DocSyncStatus::Synced && self.local_path.is_none() {
            return Err(format!("synced document {} has no local_path", self.id));
        }
        Ok(())
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Kind of embedded resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Attachment,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Attachment => "attachment",
        }
    }

    /// Subdirectory (relative to the document) holding this kind
    pub fn subdirectory(&self) -> &'static str {
        match self {
            ResourceType::Image => "images",
            ResourceType::Attachment => "attachments",
        }
    }
}

impl FromStr for ResourceType {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ResourceType::Image),
            "attachment" => Ok(ResourceType::Attachment),
            _ => Err(LibraryError::invalid("resource_type", format!("unknown value '{}'", s))),
        }
    }
}

/// Download state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Downloaded,
    Failed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Downloaded => "downloaded",
            ResourceStatus::Failed => "failed",
        }
    }
}

impl FromStr for ResourceStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResourceStatus::Pending),
            "downloaded" => Ok(ResourceStatus::Downloaded),
            "failed" => Ok(ResourceStatus::Failed),
            _ => Err(LibraryError::invalid("status", format!("unknown value '{}'", s))),
        }
    }
}

/// One embedded image or attachment, keyed by `(doc_id, remote_url)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub doc_id: i64,
    pub remote_url: String,
    pub resource_type: ResourceType,
    pub status: ResourceStatus,
    /// Absolute path of the downloaded file
    pub local_path: Option<String>,
    pub filename: Option<String>,
    pub size_bytes: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Resource {
    pub fn downloaded(
        doc_id: i64,
        remote_url: impl Into<String>,
        resource_type: ResourceType,
        local_path: impl Into<String>,
        filename: impl Into<String>,
        size_bytes: i64,
        now: i64,
    ) -> Self {
        Self {
            doc_id,
            remote_url: remote_url.into(),
            resource_type,
            status: ResourceStatus::Downloaded,
            local_path: Some(local_path.into()),
            filename: Some(filename.into()),
            size_bytes: Some(size_bytes),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn failed(
        doc_id: i64,
        remote_url: impl Into<String>,
        resource_type: ResourceType,
        error: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            doc_id,
            remote_url: remote_url.into(),
            resource_type,
            status: ResourceStatus::Failed,
            local_path: None,
            filename: None,
            size_bytes: None,
            error_message: Some(error.into()),
            created_at: now,
            updated_at: now,
        }
    }
}
