//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the document sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other crate depends on.
//! It establishes the configuration builder, logging conventions, and the
//! broadcast channel used to publish sync progress.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, SyncSettings};
pub use error::{CoreError, Result};
pub use events::{CoreEvent, EventBus, EventStream};
