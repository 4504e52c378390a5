//! # Host Bridge Traits
//!
//! Capability traits the sync core consumes but does not implement itself.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync engine and its
//! environment. Each trait is a capability that must be injected: the desktop
//! build ships adapters in `bridge-desktop`, the remote provider lives in its
//! own crate, and tests substitute mocks.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry and timeouts
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O and timestamp stamping
//!
//! ### Remote corpus
//! - [`DocumentProvider`](remote::DocumentProvider) - Book/document listing and content fetch
//! - [`SessionProvider`](session::SessionProvider) - Current credential and validity window
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! use core_runtime::error::CoreError;
//!
//! let provider = config.document_provider
//!     .ok_or_else(|| CoreError::CapabilityMissing {
//!         capability: "DocumentProvider".to_string(),
//!         message: "No remote provider configured.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Authentication
//! problems are reported as `BridgeError::Unauthorized` so callers can
//! distinguish them from transient failures.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support usage across
//! async tasks.

pub mod error;
pub mod http;
pub mod remote;
pub mod session;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use remote::{
    BookContext, ContentFormat, DocumentLocator, DocumentProvider, RemoteBook, RemoteBookType,
    RemoteContent, RemoteDocType, RemoteDocument, RenderOptions,
};
pub use session::{SessionCredential, SessionProvider};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, FixedClock, LogLevel, SystemClock};
