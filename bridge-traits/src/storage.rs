//! Storage and File System Abstractions
//!
//! Provides a platform-agnostic trait for the file I/O the sync engine needs:
//! materializing documents and resources, listing target directories for
//! collision checks, and stamping files with remote timestamps.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations so the engine can run against the desktop
/// filesystem or an in-memory fake in tests.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn materialize(fs: &dyn FileSystemAccess, dir: &Path, body: &str) -> Result<()> {
///     fs.create_dir_all(dir).await?;
///     fs.write_file(&dir.join("index.md"), body.to_owned().into()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating or truncating it
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    ///
    /// A missing directory yields an empty listing.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Set access and modification times of a file
    async fn set_file_times(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> Result<()>;

    /// File names (not paths) present in a directory
    async fn list_file_names(&self, path: &Path) -> Result<Vec<String>> {
        let entries = self.list_directory(path).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}
