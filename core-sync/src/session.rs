//! # Sync Session State Machine
//!
//! A session is the resumable unit of sync work: the set of books being
//! mirrored, how many documents the work list held, and which of them have
//! been written so far.
//!
//! ## State Machine
//!
//! ```text
//! Running ──→ Completed
//!    │  ↑
//!    ↓  │ (resume)
//! Interrupted
//! ```
//!
//! At most one session is `Running` at a time. On process startup every
//! `Running` session is forced to `Interrupted`.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncSessionId(Uuid);

impl SyncSessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Interrupted,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SessionStatus::Running),
            "interrupted" => Ok(SessionStatus::Interrupted),
            "completed" => Ok(SessionStatus::Completed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Session Entity
// ============================================================================

/// A resumable unit of sync work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SyncSessionId,
    /// Books covered by this session, in request order
    pub book_ids: Vec<i64>,
    /// Size of the work list when the session was opened
    pub total_docs: u64,
    /// Documents written so far, in completion order, without duplicates
    pub completed_doc_ids: Vec<i64>,
    pub status: SessionStatus,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncSession {
    /// Open a new running session.
    pub fn new(book_ids: Vec<i64>, total_docs: u64, now: i64) -> Self {
        Self {
            id: SyncSessionId::new(),
            book_ids,
            total_docs,
            completed_doc_ids: Vec::new(),
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a written document.
    ///
    /// Allowed while running and after an interrupt request, since the
    /// in-flight document may finish after `cancel_sync` flips the status.
    /// Returns `false` if the id was already recorded.
    pub fn record_completed(&mut self, doc_id: i64, now: i64) -> Result<bool> {
        if self.status == SessionStatus::Completed {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "record_completed".to_string(),
                reason: "Completed sessions are immutable".to_string(),
            });
        }

        if self.completed_doc_ids.contains(&doc_id) {
            return Ok(false);
        }
        self.completed_doc_ids.push(doc_id);
        self.updated_at = now;
        Ok(true)
    }

    pub fn interrupt(&mut self, now: i64) -> Result<()> {
        self.transition(SessionStatus::Interrupted, now)
    }

    pub fn complete(&mut self, now: i64) -> Result<()> {
        self.transition(SessionStatus::Completed, now)
    }

    /// Reopen an interrupted session.
    pub fn resume(&mut self, now: i64) -> Result<()> {
        self.transition(SessionStatus::Running, now)
    }

    /// Ids from `candidates` not yet written by this session, order kept.
    pub fn remaining<'a>(&'a self, candidates: &'a [i64]) -> impl Iterator<Item = i64> + 'a {
        candidates
            .iter()
            .copied()
            .filter(move |id| !self.completed_doc_ids.contains(id))
    }

    fn transition(&mut self, to: SessionStatus, now: i64) -> Result<()> {
        self.validate_transition(to)?;
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    fn validate_transition(&self, to: SessionStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (SessionStatus::Running, SessionStatus::Completed) => true,
            (SessionStatus::Running, SessionStatus::Interrupted) => true,
            (SessionStatus::Interrupted, SessionStatus::Running) => true,
            // Idempotent: cancel_sync and crash recovery can both interrupt
            (SessionStatus::Interrupted, SessionStatus::Interrupted) => true,
            (SessionStatus::Completed, _) => false,
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition session from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
