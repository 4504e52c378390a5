//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `SessionProvider` backed by memory or a JSON session file
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileSessionProvider, ReqwestHttpClient, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let fs = TokioFileSystem::new();
//!     let session = FileSessionProvider::new("session.json");
//!
//!     // Use in core configuration
//! }
//! ```

mod filesystem;
mod http;
mod session;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use session::{FileSessionProvider, StaticSessionProvider};
