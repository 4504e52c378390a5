//! # Sync Engine
//!
//! Incremental mirroring of a remote document corpus into a local tree.
//!
//! ## Overview
//!
//! This crate owns the synchronization logic:
//! - Comparing remote snapshots with the metadata store
//! - Sequential, cancellable transfer of new and modified documents
//! - Converting rich markup to lightweight markup
//! - Downloading embedded images and attachments and rewriting references
//! - Resumable sessions and an append-only history of runs
//!
//! ## Components
//!
//! - **Change Detector** (`change_detector`): Per-document classification and snapshot diffing
//! - **Content Normalizer** (`normalizer`): HTML to Markdown conversion
//! - **Resource Pipeline** (`resources`): Reference scanning, naming, download and rewrite
//! - **Paths** (`paths`): Filesystem-safe names and hierarchy layout
//! - **Session / History** (`session`, `history`): State machines for resumable work and its audit trail
//! - **Repository** (`repository`): Database persistence for sessions and history
//! - **Sync Orchestrator** (`coordinator`): Runs, cancellation, resume and crash recovery

pub mod change_detector;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod normalizer;
pub mod paths;
pub mod repository;
pub mod resources;
pub mod session;

pub use change_detector::{classify, detect_changes, ChangeSet, Classification};
pub use coordinator::{
    RecoveryReport, SyncDependencies, SyncOptions, SyncOrchestrator, SyncResult, SyncSessionInfo,
    SyncStatus, INTERRUPTED_BY_EXIT,
};
pub use error::{Result, SyncError};
pub use history::{HistoryStatus, SyncHistory, SyncHistoryId};
pub use normalizer::ContentNormalizer;
pub use repository::{
    SqliteSyncHistoryRepository, SqliteSyncSessionRepository, SyncHistoryRepository,
    SyncSessionRepository,
};
pub use resources::{ResourcePipeline, ResourceReferenceScanner};
pub use session::{SessionStatus, SyncSession, SyncSessionId};
