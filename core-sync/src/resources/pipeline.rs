//! # Resource Pipeline
//!
//! Turns remote image and attachment references inside a document into
//! local files next to it and rewrites the references.
//!
//! ## Flow
//!
//! 1. Scan the content with the configured [`ResourceReferenceScanner`] and
//!    keep the references the [`ResourceClassifier`] recognizes.
//! 2. Resolve each distinct URL: reuse a `downloaded` row whose file still
//!    exists, reuse an image whose content-addressed name already exists on
//!    disk, or download it.
//! 3. Record the outcome in the resource table and report progress.
//! 4. Rewrite resolved URLs to `./images/<name>` / `./attachments/<name>`.
//!
//! A failed resource never fails the document: its row is marked `failed`
//! and the reference is left verbatim.

use super::classify::ResourceClassifier;
use super::naming::{attachment_base_name, image_file_name, unique_name};
use super::scanner::{ResourceReference, ResourceReferenceScanner};
use crate::{Result, SyncError};
use bridge_traits::http::{HttpMethod, HttpRequest};
use bridge_traits::{Clock, FileSystemAccess, HttpClient};
use core_library::models::{Resource, ResourceStatus, ResourceType};
use core_library::repositories::ResourceRepository;
use core_runtime::config::SyncSettings;
use core_runtime::logging::redact_url;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Per-document inputs of one pipeline run
#[derive(Debug, Clone)]
pub struct ResourceTarget<'a> {
    pub doc_id: i64,
    /// Directory of the document file; `images/` and `attachments/` go here
    pub target_dir: &'a Path,
    /// Session cookie for hosts that require it
    pub cookie: Option<&'a str>,
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub total: u64,
    pub downloaded: u64,
    pub reused: u64,
    pub failed: u64,
}

/// Rewritten content plus what happened to each resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedContent {
    pub content: String,
    pub stats: ResourceStats,
}

enum Resolution {
    Reused(String),
    Downloaded(String),
}

pub struct ResourcePipeline {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    resources: Arc<dyn ResourceRepository>,
    clock: Arc<dyn Clock>,
    scanner: Box<dyn ResourceReferenceScanner>,
    classifier: ResourceClassifier,
    settings: SyncSettings,
}

impl ResourcePipeline {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        resources: Arc<dyn ResourceRepository>,
        clock: Arc<dyn Clock>,
        scanner: Box<dyn ResourceReferenceScanner>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            http,
            fs,
            resources,
            clock,
            scanner,
            classifier: ResourceClassifier::from_settings(&settings),
            settings,
        }
    }

    pub fn classifier(&self) -> &ResourceClassifier {
        &self.classifier
    }

    /// Download the resources referenced by `content` and rewrite them.
    ///
    /// `progress` receives `(current, total)` after every attempt.
    pub async fn process_content(
        &self,
        content: &str,
        target: &ResourceTarget<'_>,
        progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<ProcessedContent> {
        let references: Vec<(ResourceReference, ResourceType)> = self
            .scanner
            .scan(content)
            .into_iter()
            .filter_map(|reference| {
                let kind = self.classifier.classify(&reference.url)?;
                Some((reference, kind))
            })
            .collect();

        let mut stats = ResourceStats {
            total: references.len() as u64,
            ..ResourceStats::default()
        };
        if references.is_empty() {
            return Ok(ProcessedContent {
                content: content.to_string(),
                stats,
            });
        }

        let mut taken: HashMap<ResourceType, HashSet<String>> = HashMap::new();
        for kind in [ResourceType::Image, ResourceType::Attachment] {
            let dir = target.target_dir.join(kind.subdirectory());
            let names = self.fs.list_file_names(&dir).await?;
            taken.insert(kind, names.into_iter().map(|n| n.to_lowercase()).collect());
        }

        let mut resolved = HashMap::new();
        for (index, (reference, kind)) in references.iter().enumerate() {
            let names = taken.entry(*kind).or_default();
            match self.resolve(reference, *kind, target, names).await {
                Ok(Resolution::Reused(relative)) => {
                    stats.reused += 1;
                    resolved.insert(reference.url.clone(), relative);
                }
                Ok(Resolution::Downloaded(relative)) => {
                    stats.downloaded += 1;
                    resolved.insert(reference.url.clone(), relative);
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(
                        doc_id = target.doc_id,
                        url = %redact_url(&reference.url),
                        error = %err,
                        "Resource download failed"
                    );
                    let row = Resource::failed(
                        target.doc_id,
                        reference.url.as_str(),
                        *kind,
                        err.to_string(),
                        self.clock.unix_timestamp_millis(),
                    );
                    self.resources.upsert(&row).await?;
                }
            }
            progress(index as u64 + 1, stats.total);
        }

        debug!(
            doc_id = target.doc_id,
            total = stats.total,
            downloaded = stats.downloaded,
            reused = stats.reused,
            failed = stats.failed,
            "Resources processed"
        );

        Ok(ProcessedContent {
            content: self.scanner.rewrite(content, &resolved),
            stats,
        })
    }

    async fn resolve(
        &self,
        reference: &ResourceReference,
        kind: ResourceType,
        target: &ResourceTarget<'_>,
        taken: &mut HashSet<String>,
    ) -> Result<Resolution> {
        let subdir = kind.subdirectory();
        let dir = target.target_dir.join(subdir);
        let existing = self.resources.find(target.doc_id, &reference.url).await?;

        if let Some(row) = &existing {
            if let (ResourceStatus::Downloaded, Some(path), Some(name)) =
                (row.status, &row.local_path, &row.filename)
            {
                let path = PathBuf::from(path);
                if path.parent() == Some(dir.as_path()) && self.fs.exists(&path).await? {
                    taken.insert(name.to_lowercase());
                    return Ok(Resolution::Reused(relative_path(subdir, name)));
                }
            }
        }

        let name = match kind {
            ResourceType::Image => {
                let name = image_file_name(
                    &reference.url,
                    &self.classifier,
                    &self.settings.default_image_extension,
                );
                let path = dir.join(&name);
                if self.fs.exists(&path).await? {
                    let size = self.fs.metadata(&path).await?.size;
                    self.record_downloaded(target.doc_id, reference, kind, &path, &name, size)
                        .await?;
                    taken.insert(name.to_lowercase());
                    return Ok(Resolution::Reused(relative_path(subdir, &name)));
                }
                name
            }
            ResourceType::Attachment => {
                let previous = existing
                    .as_ref()
                    .and_then(|row| row.filename.clone())
                    .filter(|name| !taken.contains(&name.to_lowercase()));
                match previous {
                    Some(name) => name,
                    None => unique_name(
                        &attachment_base_name(&reference.url, reference.suggested_name.as_deref()),
                        taken,
                    ),
                }
            }
        };

        // Reserve before the fetch so a failure does not free the name for a sibling
        taken.insert(name.to_lowercase());

        let path = dir.join(&name);
        let size = self.download(&reference.url, &dir, &path, target.cookie).await?;
        self.record_downloaded(target.doc_id, reference, kind, &path, &name, size)
            .await?;
        Ok(Resolution::Downloaded(relative_path(subdir, &name)))
    }

    async fn download(
        &self,
        url: &str,
        dir: &Path,
        path: &Path,
        cookie: Option<&str>,
    ) -> Result<u64> {
        let mut request =
            HttpRequest::new(HttpMethod::Get, url).timeout(self.settings.resource_timeout);
        if self.classifier.requires_auth(url) {
            if let Some(cookie) = cookie {
                request = request.cookie(cookie);
            }
            if let Some(referer) = origin(url) {
                request = request.header("Referer", referer);
            }
        }

        let response = self
            .http
            .execute_with_retry(request, self.settings.retry_policy.clone())
            .await?;

        if !response.is_success() {
            return Err(SyncError::Resource(format!(
                "HTTP {} fetching {}",
                response.status, url
            )));
        }

        let limit = self.settings.max_resource_bytes;
        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(SyncError::Resource(format!(
                    "Resource is {} bytes, limit is {}",
                    declared, limit
                )));
            }
        }
        let size = response.body.len() as u64;
        if size > limit {
            return Err(SyncError::Resource(format!(
                "Resource is {} bytes, limit is {}",
                size, limit
            )));
        }

        self.fs.create_dir_all(dir).await?;
        self.fs.write_file(path, response.body).await?;
        Ok(size)
    }

    async fn record_downloaded(
        &self,
        doc_id: i64,
        reference: &ResourceReference,
        kind: ResourceType,
        path: &Path,
        name: &str,
        size: u64,
    ) -> Result<()> {
        let row = Resource::downloaded(
            doc_id,
            reference.url.as_str(),
            kind,
            path.to_string_lossy(),
            name,
            size as i64,
            self.clock.unix_timestamp_millis(),
        );
        self.resources.upsert(&row).await?;
        Ok(())
    }
}

fn relative_path(subdir: &str, name: &str) -> String {
    format!("./{}/{}", subdir, name)
}

fn origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    Some(format!("{}://{}/", parsed.scheme(), parsed.host_str()?))
}
