//! # Sync History
//!
//! Append-only audit record of one sync invocation. Counters move while the
//! record is `Running`; it is finalized exactly once into `Success`,
//! `Failed` or `Cancelled` and never changes afterwards.

use crate::session::SyncSessionId;
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncHistoryId(Uuid);

impl SyncHistoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncHistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncHistoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a sync invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl HistoryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HistoryStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Running => "running",
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
            HistoryStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(HistoryStatus::Running),
            "success" => Ok(HistoryStatus::Success),
            "failed" => Ok(HistoryStatus::Failed),
            "cancelled" => Ok(HistoryStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record of one sync invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistory {
    pub id: SyncHistoryId,
    /// Session the run belonged to, once one was opened
    pub session_id: Option<SyncSessionId>,
    pub book_ids: Vec<i64>,
    pub total_docs: u64,
    pub synced_docs: u64,
    pub failed_docs: u64,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
    /// Milliseconds since the Unix epoch
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl SyncHistory {
    pub fn new(book_ids: Vec<i64>, now: i64) -> Self {
        Self {
            id: SyncHistoryId::new(),
            session_id: None,
            book_ids,
            total_docs: 0,
            synced_docs: 0,
            failed_docs: 0,
            status: HistoryStatus::Running,
            error_message: None,
            started_at: now,
            finished_at: None,
        }
    }

    pub fn attach(&mut self, session_id: SyncSessionId, total_docs: u64) -> Result<()> {
        self.ensure_running("attach")?;
        self.session_id = Some(session_id);
        self.total_docs = total_docs;
        Ok(())
    }

    pub fn record_synced(&mut self) -> Result<()> {
        self.ensure_running("record_synced")?;
        self.synced_docs += 1;
        Ok(())
    }

    pub fn record_failed(&mut self) -> Result<()> {
        self.ensure_running("record_failed")?;
        self.failed_docs += 1;
        Ok(())
    }

    /// Number of documents attempted so far
    pub fn attempted(&self) -> u64 {
        self.synced_docs + self.failed_docs
    }

    pub fn succeed(&mut self, now: i64) -> Result<()> {
        self.finish(HistoryStatus::Success, None, now)
    }

    pub fn fail(&mut self, message: impl Into<String>, now: i64) -> Result<()> {
        self.finish(HistoryStatus::Failed, Some(message.into()), now)
    }

    pub fn cancel(&mut self, now: i64) -> Result<()> {
        self.finish(HistoryStatus::Cancelled, None, now)
    }

    /// Whole seconds between start and finish
    pub fn duration_secs(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end.saturating_sub(self.started_at).max(0) / 1000) as u64)
    }

    fn finish(&mut self, to: HistoryStatus, message: Option<String>, now: i64) -> Result<()> {
        if to == HistoryStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: "History cannot be reopened".to_string(),
            });
        }
        self.ensure_running(to.as_str())?;
        self.status = to;
        self.error_message = message;
        self.finished_at = Some(now);
        Ok(())
    }

    fn ensure_running(&self, operation: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: operation.to_string(),
                reason: "History is finalized".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_success() {
        let mut history = SyncHistory::new(vec![7], 1_000);
        history.attach(SyncSessionId::new(), 3).unwrap();
        history.record_synced().unwrap();
        history.record_synced().unwrap();
        history.record_failed().unwrap();
        assert_eq!(history.attempted(), 3);

        history.succeed(4_500).unwrap();
        assert_eq!(history.status, HistoryStatus::Success);
        assert_eq!(history.duration_secs(), Some(3));
    }

    #[test]
    fn test_finalized_history_is_immutable() {
        let mut history = SyncHistory::new(vec![7], 0);
        history.fail("listing failed", 10).unwrap();

        assert!(history.record_synced().is_err());
        assert!(history.cancel(20).is_err());
        assert!(history.succeed(20).is_err());
        assert_eq!(history.finished_at, Some(10));
        assert_eq!(history.error_message.as_deref(), Some("listing failed"));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("cancelled".parse::<HistoryStatus>().unwrap(), HistoryStatus::Cancelled);
        assert!("done".parse::<HistoryStatus>().is_err());
        assert!(HistoryStatus::Failed.is_terminal());
        assert!(!HistoryStatus::Running.is_terminal());
    }
}
