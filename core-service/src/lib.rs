//! # Core Service
//!
//! Application-facing façade over the sync core.
//!
//! ## Overview
//!
//! [`CoreService`] wires the host-provided bridges from a
//! [`CoreConfig`] into the metadata store, the remote provider and the
//! [`SyncOrchestrator`]. Bootstrapping opens the database, runs its
//! migrations and recovers any session left running by a previous process
//! before the first operation is accepted.
//!
//! Desktop hosts enable the `desktop-shims` feature so the configuration
//! builder can fall back to the reqwest/tokio adapters from
//! `bridge-desktop`.
//!
//! ```ignore
//! use core_runtime::CoreConfig;
//! use core_service::CoreService;
//! use core_sync::SyncOptions;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/doc-sync/sync.db")
//!     .output_dir("/home/me/notes")
//!     .build()?;
//!
//! let service = CoreService::bootstrap(config).await?;
//! let books = service.refresh_books().await?;
//! let result = service
//!     .start_sync(SyncOptions::new(books.iter().map(|b| b.id).collect()))
//!     .await;
//! ```

pub mod error;

pub use error::{Result, ServiceError};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{
    FileSessionProvider, ReqwestHttpClient, StaticSessionProvider, TokioFileSystem,
};

use bridge_traits::{Clock, DocumentProvider};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{
    BookRepository, DocumentRepository, SqliteBookRepository, SqliteDocumentRepository,
};
use core_library::{Book, DocSyncStatus, Document};
use core_runtime::events::{CoreEvent, EventBus, EventStream, LibraryEvent};
use core_runtime::CoreConfig;
use core_sync::{
    ChangeSet, RecoveryReport, SqliteSyncHistoryRepository, SyncDependencies, SyncHistory,
    SyncHistoryId, SyncHistoryRepository, SyncOptions, SyncOrchestrator, SyncResult,
    SyncSessionId, SyncSessionInfo, SyncStatus,
};
use provider_yuque::YuqueConnector;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    orchestrator: Arc<SyncOrchestrator>,
    provider: Arc<dyn DocumentProvider>,
    books: Arc<dyn BookRepository>,
    documents: Arc<dyn DocumentRepository>,
    history: Arc<dyn SyncHistoryRepository>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    recovery: RecoveryReport,
}

impl CoreService {
    /// Open the database named by `config` and bring the service up.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or migrated, or if crash
    /// recovery cannot update the stored sync state.
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        Self::with_pool(config, pool).await
    }

    /// Bring the service up over an already opened and migrated pool.
    pub async fn with_pool(config: CoreConfig, pool: SqlitePool) -> Result<Self> {
        let provider: Arc<dyn DocumentProvider> = match config.document_provider.clone() {
            Some(provider) => provider,
            None => Arc::new(
                YuqueConnector::new(config.http_client.clone(), config.session_provider.clone())
                    .with_base_url(config.remote_base_url.clone())
                    .with_clock(config.clock.clone())
                    .with_timeout(config.sync.request_timeout)
                    .with_retry_policy(config.sync.retry_policy.clone()),
            ),
        };

        let event_bus = EventBus::new(config.event_buffer_size);
        let deps = SyncDependencies::sqlite(
            pool.clone(),
            provider.clone(),
            config.session_provider.clone(),
            config.http_client.clone(),
            config.file_system.clone(),
            config.clock.clone(),
        );
        let orchestrator = SyncOrchestrator::new(
            deps,
            event_bus.clone(),
            config.output_dir.clone(),
            config.sync.clone(),
        )?;

        let recovery = orchestrator.recover_interrupted_sessions().await?;

        info!(
            output_dir = %config.output_dir.display(),
            recovered_sessions = recovery.sessions_interrupted,
            "Core service ready"
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            provider,
            books: Arc::new(SqliteBookRepository::new(pool.clone())),
            documents: Arc::new(SqliteDocumentRepository::new(pool.clone())),
            history: Arc::new(SqliteSyncHistoryRepository::new(pool)),
            clock: config.clock,
            event_bus,
            recovery,
        })
    }

    /// What crash recovery found at bootstrap.
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Subscribe to sync, auth and library events.
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    // ------------------------------------------------------------------------
    // Books
    // ------------------------------------------------------------------------

    /// Pull the book listing from the remote and store it.
    #[instrument(skip(self))]
    pub async fn refresh_books(&self) -> Result<Vec<Book>> {
        let now = self.clock.unix_timestamp_millis();
        let remote = self.provider.list_books().await?;
        let books: Vec<Book> = remote.iter().map(|book| Book::from_remote(book, now)).collect();

        self.books.upsert_many(&books).await?;
        self.emit(LibraryEvent::BooksRefreshed {
            count: books.len() as u64,
        });
        info!("Refreshed {} books", books.len());
        Ok(books)
    }

    pub async fn list_books(&self) -> Result<Vec<Book>> {
        Ok(self.books.find_all().await?)
    }

    /// Forget a book and everything stored under it. Local files stay.
    #[instrument(skip(self))]
    pub async fn purge_book(&self, book_id: i64) -> Result<bool> {
        self.ensure_idle().await?;

        let deleted = self.books.delete(book_id).await?;
        if deleted {
            self.emit(LibraryEvent::BookPurged { book_id });
            info!(book_id, "Purged book");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// Documents of a book in table-of-contents order.
    pub async fn list_documents(&self, book_id: i64) -> Result<Vec<Document>> {
        Ok(self.documents.find_by_book(book_id).await?)
    }

    pub async fn status_counts(&self, book_id: i64) -> Result<HashMap<DocSyncStatus, i64>> {
        Ok(self.documents.count_by_status(book_id).await?)
    }

    /// Make failed documents eligible for the next incremental run.
    #[instrument(skip(self, doc_ids), fields(count = doc_ids.len()))]
    pub async fn retry_failed(&self, doc_ids: &[i64]) -> Result<u64> {
        let count = self.move_failed(doc_ids, DocSyncStatus::New).await?;
        self.emit(LibraryEvent::FailedDocumentsRetried { count });
        Ok(count)
    }

    /// Give up on failed documents.
    #[instrument(skip(self, doc_ids), fields(count = doc_ids.len()))]
    pub async fn clear_failed(&self, doc_ids: &[i64]) -> Result<u64> {
        let count = self.move_failed(doc_ids, DocSyncStatus::Deleted).await?;
        self.emit(LibraryEvent::FailedDocumentsCleared { count });
        Ok(count)
    }

    async fn move_failed(&self, doc_ids: &[i64], to: DocSyncStatus) -> Result<u64> {
        if doc_ids.is_empty() {
            return Err(ServiceError::InvalidInput(
                "at least one document id is required".to_string(),
            ));
        }
        self.ensure_idle().await?;

        let now = self.clock.unix_timestamp_millis();
        Ok(self
            .documents
            .transition_status(doc_ids, DocSyncStatus::Failed, to, now)
            .await?)
    }

    // ------------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------------

    /// Run a sync with book addressing taken from the stored listing.
    pub async fn start_sync(&self, options: SyncOptions) -> SyncResult {
        self.orchestrator.start_sync(options, &HashMap::new()).await
    }

    pub async fn cancel_sync(&self) -> Result<bool> {
        Ok(self.orchestrator.cancel_sync().await?)
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.orchestrator.get_sync_status().await
    }

    /// Preview what an incremental sync of `book_ids` would transfer.
    pub async fn get_changes(&self, book_ids: &[i64]) -> Result<ChangeSet> {
        Ok(self
            .orchestrator
            .get_changes_for_books(book_ids, &HashMap::new())
            .await?)
    }

    pub async fn interrupted_session(&self) -> Result<Option<SyncSessionInfo>> {
        Ok(self.orchestrator.get_interrupted_session().await?)
    }

    /// Resume an interrupted session by id.
    pub async fn resume_sync(&self, session_id: &str) -> Result<SyncResult> {
        let session_id = SyncSessionId::from_string(session_id)?;
        Ok(self
            .orchestrator
            .resume_sync(&session_id, &HashMap::new())
            .await)
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Most recent runs first.
    pub async fn list_history(&self, limit: u32) -> Result<Vec<SyncHistory>> {
        Ok(self.history.list_recent(limit).await?)
    }

    pub async fn get_history(&self, history_id: &str) -> Result<Option<SyncHistory>> {
        let id = SyncHistoryId::from_string(history_id)?;
        Ok(self.history.find_by_id(&id).await?)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn ensure_idle(&self) -> Result<()> {
        let status = self.orchestrator.get_sync_status().await;
        if status.is_running || status.is_detecting {
            return Err(core_sync::SyncError::SyncInProgress.into());
        }
        Ok(())
    }

    fn emit(&self, event: LibraryEvent) {
        self.event_bus.emit(CoreEvent::Library(event)).ok();
    }
}
