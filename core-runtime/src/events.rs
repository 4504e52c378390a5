//! # Event Bus
//!
//! One-way notification channel from the sync core to the host. The
//! orchestrator and the service publish [`CoreEvent`]s; hosts subscribe and
//! render progress. Nothing is sent back through the bus.
//!
//! ## Delivery
//!
//! The bus wraps `tokio::sync::broadcast`:
//! - events emitted while nobody is subscribed are dropped (`emit` returns
//!   `Err`, producers call `.ok()`);
//! - a subscriber that falls more than the buffer size behind gets
//!   `RecvError::Lagged(n)` once and then continues with newer events.
//!   Progress events are snapshots, so skipping some is harmless;
//! - `RecvError::Closed` means every producer is gone.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut run = EventStream::new(bus.subscribe()).for_history("h-1");
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
//!     history_id: "h-1".to_string(),
//!     synced_docs: 2,
//! }))
//! .ok();
//!
//! let event = run.recv().await.unwrap();
//! assert_eq!(event.description(), "Sync cancelled");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session/credential events
    Auth(AuthEvent),
    /// Sync-related events
    Sync(SyncEvent),
    /// Metadata store maintenance events
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Sync run this event belongs to; `None` outside a run.
    pub fn history_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(
                SyncEvent::Started { history_id, .. }
                | SyncEvent::Progress { history_id, .. }
                | SyncEvent::ResourceProgress { history_id, .. }
                | SyncEvent::DocumentFailed { history_id, .. }
                | SyncEvent::Completed { history_id, .. }
                | SyncEvent::Failed { history_id, .. }
                | SyncEvent::Cancelled { history_id, .. },
            ) => Some(history_id),
            CoreEvent::Auth(_) | CoreEvent::Library(_) => None,
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::SessionRequired { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::DocumentFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Started { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Auth Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A remote operation was refused because no valid session exists.
    SessionRequired { message: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SessionRequired { .. } => "Valid session required",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Phase vocabulary for progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Diffing remote snapshots against the store
    Comparing,
    /// Fetching document content
    Downloading,
    /// Rewriting resources and writing the file
    Writing,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Comparing => "comparing",
            SyncPhase::Downloading => "downloading",
            SyncPhase::Writing => "writing",
        }
    }
}

/// Events emitted by the sync orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Work list computed, document loop about to start.
    Started {
        history_id: String,
        session_id: String,
        total_docs: u64,
    },
    /// Per-document (or per-book while comparing) progress.
    Progress {
        history_id: String,
        current: u64,
        total: u64,
        current_item_label: String,
        phase: SyncPhase,
    },
    /// Resource pipeline progress inside one document.
    ResourceProgress {
        history_id: String,
        doc_id: i64,
        current: u64,
        total: u64,
    },
    /// One document failed; the batch continues.
    DocumentFailed {
        history_id: String,
        doc_id: i64,
        message: String,
    },
    /// Batch finished (possibly with per-document failures).
    Completed {
        history_id: String,
        synced_docs: u64,
        failed_docs: u64,
        duration_secs: u64,
    },
    /// Setup failed before the document loop.
    Failed { history_id: String, message: String },
    /// Stopped at a document boundary on request.
    Cancelled {
        history_id: String,
        synced_docs: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::ResourceProgress { .. } => "Downloading resources",
            SyncEvent::DocumentFailed { .. } => "Document failed to sync",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Book listing refreshed from the remote.
    BooksRefreshed { count: u64 },
    /// Failed documents reset to `new` for another attempt.
    FailedDocumentsRetried { count: u64 },
    /// Failed documents dismissed as `deleted`.
    FailedDocumentsCleared { count: u64 },
    /// A book and its documents were purged.
    BookPurged { book_id: i64 },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::BooksRefreshed { .. } => "Books refreshed",
            LibraryEvent::FailedDocumentsRetried { .. } => "Failed documents queued for retry",
            LibraryEvent::FailedDocumentsCleared { .. } => "Failed documents cleared",
            LibraryEvent::BookPurged { .. } => "Book purged",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody listens.
    /// Producers ignore that error with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscription; only events emitted afterwards are seen.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield sync events of the run recorded as `history_id`.
    pub fn for_history(self, history_id: impl Into<String>) -> Self {
        let history_id = history_id.into();
        self.filter(move |event| event.history_id() == Some(history_id.as_str()))
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
