//! # Core Configuration Module
//!
//! Provides configuration management for the sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all dependencies and settings the core needs. It
//! enforces fail-fast validation so a missing bridge is reported at startup
//! rather than in the middle of a sync.
//!
//! ## Required Dependencies
//!
//! - `SessionProvider` - current credential (desktop default: JSON session
//!   file next to the database)
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `FileSystemAccess` - File I/O (desktop default: tokio fs)
//! - `DocumentProvider` - remote corpus (default: built by the service from
//!   `remote_base_url`)
//! - `Clock` - time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/sync.db")
//!     .output_dir("/home/alice/Notes")
//!     .sync_settings(SyncSettings::default().with_max_resource_bytes(20 * 1024 * 1024))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing capabilities produce `CoreError::CapabilityMissing` with an actionable
//! message; inconsistent values produce `CoreError::Config`.

use crate::error::{CoreError, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    Clock, DocumentProvider, FileSystemAccess, HttpClient, RenderOptions, RetryPolicy,
    SessionProvider, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default remote endpoint.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://www.yuque.com";

/// Core configuration for the sync core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite metadata database
    pub database_path: PathBuf,

    /// Root directory the corpus is mirrored into
    pub output_dir: PathBuf,

    /// Base URL of the remote provider
    pub remote_base_url: String,

    pub http_client: Arc<dyn HttpClient>,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub session_provider: Arc<dyn SessionProvider>,

    /// Explicit remote provider; `None` lets the service build the default one
    pub document_provider: Option<Arc<dyn DocumentProvider>>,

    pub clock: Arc<dyn Clock>,

    /// Sync engine tuning
    pub sync: SyncSettings,

    /// Broadcast buffer for progress events
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("output_dir", &self.output_dir)
            .field("remote_base_url", &self.remote_base_url)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("session_provider", &"SessionProvider { ... }")
            .field(
                "document_provider",
                &self
                    .document_provider
                    .as_ref()
                    .map(|_| "DocumentProvider { ... }"),
            )
            .field("sync", &self.sync)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

/// Tuning knobs for the sync engine and its resource pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Largest resource payload accepted, in bytes
    pub max_resource_bytes: u64,

    /// Timeout for listing and content requests
    pub request_timeout: Duration,

    /// Timeout for one resource download
    pub resource_timeout: Duration,

    /// Lowercase extensions recognized as images
    pub image_extensions: Vec<String>,

    /// Extension used when an image URL has none
    pub default_image_extension: String,

    /// Host (or `host/path-prefix`) patterns of image CDNs
    pub image_hosts: Vec<String>,

    /// Host (or `host/path-prefix`) patterns serving document attachments
    pub attachment_hosts: Vec<String>,

    /// Hosts that require the session cookie on resource downloads
    pub auth_hosts: Vec<String>,

    /// Rendering preferences for content fetches
    pub render_options: RenderOptions,

    /// Retry policy for remote requests
    pub retry_policy: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_resource_bytes: 50 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            resource_timeout: Duration::from_secs(60),
            image_extensions: ["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "ico", "avif", "tiff"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            default_image_extension: "png".to_string(),
            image_hosts: vec!["cdn.nlark.com".to_string(), "cdn.yuque.com".to_string()],
            attachment_hosts: vec![
                "yuque.com/attachments".to_string(),
                "cdn.nlark.com/yuque".to_string(),
            ],
            auth_hosts: vec!["yuque.com".to_string()],
            render_options: RenderOptions::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    pub fn with_max_resource_bytes(mut self, bytes: u64) -> Self {
        self.max_resource_bytes = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_resource_bytes == 0 {
            return Err(CoreError::Config(
                "max_resource_bytes must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.resource_timeout.is_zero() {
            return Err(CoreError::Config("Timeouts must be greater than 0".to_string()));
        }
        if self.image_extensions.is_empty() {
            return Err(CoreError::Config(
                "At least one image extension is required".to_string(),
            ));
        }
        if let Some(ext) = self
            .image_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.') || ext.to_lowercase() != **ext)
        {
            return Err(CoreError::Config(format!(
                "Image extension '{}' must be lowercase without a leading dot",
                ext
            )));
        }
        if self.default_image_extension.is_empty() {
            return Err(CoreError::Config(
                "default_image_extension cannot be empty".to_string(),
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(CoreError::Config(
                "retry_policy.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(CoreError::Config("Database path cannot be empty".to_string()));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(CoreError::Config("Output directory cannot be empty".to_string()));
        }

        if !self.remote_base_url.starts_with("http://")
            && !self.remote_base_url.starts_with("https://")
        {
            return Err(CoreError::Config(format!(
                "Remote base URL must be http(s): {}",
                self.remote_base_url
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(CoreError::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.sync.validate()
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(CoreError::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                  Desktop: enable the 'desktop-shims' feature. \
                  Other hosts: inject an HttpClient adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(CoreError::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "No file system implementation provided. \
                  Desktop: enable the 'desktop-shims' feature. \
                  Other hosts: inject a FileSystemAccess adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_session_provider(database_path: &Path) -> Result<Arc<dyn SessionProvider>> {
    let session_file = database_path
        .parent()
        .map(|parent| parent.join("session.json"))
        .unwrap_or_else(|| PathBuf::from("session.json"));
    Ok(Arc::new(bridge_desktop::FileSessionProvider::new(session_file)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_session_provider(_database_path: &Path) -> Result<Arc<dyn SessionProvider>> {
    Err(CoreError::CapabilityMissing {
        capability: "SessionProvider".to_string(),
        message: "A SessionProvider is required to authenticate remote calls. \
                  Desktop: enable the 'desktop-shims' feature to read session.json. \
                  Other hosts: inject the session from the login flow."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    remote_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    session_provider: Option<Arc<dyn SessionProvider>>,
    document_provider: Option<Arc<dyn DocumentProvider>>,
    clock: Option<Arc<dyn Clock>>,
    sync: Option<SyncSettings>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the metadata database path (required).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the mirror root directory (required).
    pub fn output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.remote_base_url = Some(url.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.session_provider = Some(provider);
        self
    }

    pub fn document_provider(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.document_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `CoreError::Config` if a required path is missing or a value is invalid
    /// - `CoreError::CapabilityMissing` if a bridge is missing and no desktop
    ///   default is available
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            CoreError::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let output_dir = self.output_dir.ok_or_else(|| {
            CoreError::Config("Output directory is required. Use .output_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let session_provider = match self.session_provider {
            Some(provider) => provider,
            None => provide_default_session_provider(&database_path)?,
        };

        let config = CoreConfig {
            database_path,
            output_dir,
            remote_base_url: self
                .remote_base_url
                .unwrap_or_else(|| DEFAULT_REMOTE_BASE_URL.to_string()),
            http_client,
            file_system,
            session_provider,
            document_provider: self.document_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::storage::FileMetadata;
    use bridge_traits::SessionCredential;
    use bytes::Bytes;
    use std::time::SystemTime;

    struct NoopHttp;

    #[async_trait]
    impl HttpClient for NoopHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse {
                status: 204,
                headers: Default::default(),
                body: Bytes::new(),
            })
        }
    }

    struct NoopFs;

    #[async_trait]
    impl FileSystemAccess for NoopFs {
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Ok(FileMetadata {
                size: 0,
                created_at: None,
                modified_at: None,
                is_directory: false,
            })
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
        async fn set_file_times(
            &self,
            _path: &Path,
            _accessed: SystemTime,
            _modified: SystemTime,
        ) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NoSession;

    #[async_trait]
    impl SessionProvider for NoSession {
        async fn current_session(&self) -> BridgeResult<Option<SessionCredential>> {
            Ok(None)
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_path("/tmp/sync.db")
            .output_dir("/tmp/out")
            .http_client(Arc::new(NoopHttp))
            .file_system(Arc::new(NoopFs))
            .session_provider(Arc::new(NoSession))
    }

    #[test]
    fn test_build_with_explicit_bridges() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.remote_base_url, DEFAULT_REMOTE_BASE_URL);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.document_provider.is_none());
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn test_custom_retry_policy_survives_build() {
        let mut settings = SyncSettings::default();
        settings.retry_policy.max_attempts = 6;
        assert_ne!(settings, SyncSettings::default());

        let config = complete_builder()
            .sync_settings(settings.clone())
            .build()
            .unwrap();
        assert_eq!(config.sync, settings);
        assert_eq!(config.sync.retry_policy.max_attempts, 6);
    }

    #[test]
    fn test_missing_output_dir() {
        let err = CoreConfig::builder()
            .database_path("/tmp/sync.db")
            .build()
            .unwrap_err();

        assert!(matches!(err, CoreError::Config(msg) if msg.contains("Output directory")));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridge_is_capability_error() {
        let err = CoreConfig::builder()
            .database_path("/tmp/sync.db")
            .output_dir("/tmp/out")
            .build()
            .unwrap_err();

        assert!(matches!(err, CoreError::CapabilityMissing { capability, .. } if capability == "HttpClient"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_are_injected() {
        let config = CoreConfig::builder()
            .database_path("/tmp/sync.db")
            .output_dir("/tmp/out")
            .build()
            .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let err = complete_builder()
            .sync_settings(SyncSettings::default().with_max_resource_bytes(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));

        let mut settings = SyncSettings::default();
        settings.image_extensions.push(".PNG".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = complete_builder()
            .remote_base_url("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(msg) if msg.contains("http")));
    }
}
