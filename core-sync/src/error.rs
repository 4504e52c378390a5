use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("Sync history {history_id} not found")]
    HistoryNotFound { history_id: String },

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Session expired or missing: {0}")]
    SessionExpired(String),

    #[error("Invalid sync request: {0}")]
    InvalidRequest(String),

    #[error("No addressing context for book {0}")]
    MissingBookContext(i64),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync history {0} is already finalized")]
    HistoryFinalized(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Database(format!("Malformed JSON column: {}", err))
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Unauthorized(message) => SyncError::SessionExpired(message),
            BridgeError::Io(io) => SyncError::Io(io.to_string()),
            other => SyncError::Provider(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
