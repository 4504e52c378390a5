//! # Yuque Provider
//!
//! Implements `DocumentProvider` over Yuque's cookie-authenticated web API.
//!
//! ## Overview
//!
//! This module provides:
//! - Book listing (owned book stacks and collaborative books)
//! - Per-book document listing merged with the table of contents, so
//!   documents carry `uuid`/`parent_uuid`/`depth` and section titles appear
//!   as `title` nodes
//! - Document content in Markdown when available, HTML otherwise
//! - 401/403 mapped to `BridgeError::Unauthorized`

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{YuqueConnector, DEFAULT_BASE_URL};
pub use error::{Result, YuqueError};
