//! # Sync Orchestrator
//!
//! Drives one synchronization run from change detection to the final
//! history record.
//!
//! ## Overview
//!
//! The `SyncOrchestrator` coordinates:
//! - Session validation through `SessionProvider`
//! - Remote listing and change detection per book
//! - Sequential per-document transfer: fetch, normalize, resource rewrite,
//!   filesystem write, status update
//! - Resumable `SyncSession` bookkeeping and the `SyncHistory` audit trail
//! - Cancellation at document boundaries
//! - Progress events on the `EventBus`
//!
//! ## Workflow
//!
//! ### Start
//! 1. Validate the request, resolve book contexts, require a valid session
//! 2. Claim the run guard (one sync at a time)
//! 3. Open a `running` history record
//! 4. List and diff every book, persist the snapshot, build the work list
//! 5. Open a `running` session sized to the work list
//! 6. Process documents in order; failures are recorded and skipped
//! 7. Finalize history (`success`/`failed`/`cancelled`) and session
//!
//! ### Resume
//! Reopens an interrupted session and processes the documents it has not
//! completed yet under a new history record.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncOptions, SyncOrchestrator};
//!
//! let result = orchestrator
//!     .start_sync(SyncOptions::new(vec![42]), &contexts)
//!     .await;
//! println!("synced {} of {}", result.synced_docs, result.total_docs);
//! ```

use crate::change_detector::{detect_changes, parse_timestamp_millis, snapshot_rows, ChangeSet};
use crate::history::{SyncHistory, SyncHistoryId};
use crate::normalizer::ContentNormalizer;
use crate::paths::{document_target, parent_dir};
use crate::repository::{
    SqliteSyncHistoryRepository, SqliteSyncSessionRepository, SyncHistoryRepository,
    SyncSessionRepository,
};
use crate::resources::{CompositeScanner, ResourcePipeline, ResourceTarget};
use crate::session::{SessionStatus, SyncSession, SyncSessionId};
use crate::{Result, SyncError};
use bridge_traits::remote::{BookContext, DocumentProvider, RemoteDocType, RemoteDocument};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, SessionProvider};
use bytes::Bytes;
use chrono::SecondsFormat;
use core_library::models::{Book, DocSyncStatus, Document};
use core_library::repositories::{
    BookRepository, DocumentRepository, ResourceRepository, SqliteBookRepository,
    SqliteDocumentRepository, SqliteResourceRepository,
};
use core_runtime::config::SyncSettings;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SyncEvent, SyncPhase};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Error message stamped on history rows left `running` by a dead process.
pub const INTERRUPTED_BY_EXIT: &str = "interrupted by process exit";

// ============================================================================
// Request / Result Types
// ============================================================================

/// Parameters of a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Books to sync, in processing order
    pub book_ids: Vec<i64>,
    /// Restrict the work list to these documents
    pub document_ids: Option<Vec<i64>>,
    /// Transfer every live document, not only new and modified ones
    pub force: bool,
}

impl SyncOptions {
    pub fn new(book_ids: Vec<i64>) -> Self {
        Self {
            book_ids,
            ..Self::default()
        }
    }

    pub fn with_document_ids(mut self, ids: Vec<i64>) -> Self {
        self.document_ids = Some(ids);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Book ids with duplicates dropped, order kept.
    fn normalized_book_ids(&self) -> Result<Vec<i64>> {
        if self.book_ids.is_empty() {
            return Err(SyncError::InvalidRequest(
                "at least one book id is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        Ok(self
            .book_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect())
    }
}

/// Outcome of `start_sync` / `resume_sync`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    /// History record of the run; `None` when rejected up front
    pub history_id: Option<String>,
    pub total_docs: u64,
    pub synced_docs: u64,
    pub failed_docs: u64,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl SyncResult {
    fn rejected(err: SyncError) -> Self {
        Self {
            errors: vec![err.to_string()],
            ..Self::default()
        }
    }

    fn from_history(history: &SyncHistory, errors: Vec<String>, cancelled: bool) -> Self {
        Self {
            success: !cancelled && errors.is_empty(),
            history_id: Some(history.id.as_str()),
            total_docs: history.total_docs,
            synced_docs: history.synced_docs,
            failed_docs: history.failed_docs,
            errors,
            cancelled,
        }
    }
}

/// Snapshot of the run guard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    /// A `get_changes_for_books` call holds the guard
    pub is_detecting: bool,
    pub cancel_requested: bool,
    pub history_id: Option<String>,
    pub session_id: Option<String>,
}

/// An interrupted session and the documents it still owes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSessionInfo {
    pub session: SyncSession,
    pub remaining_doc_ids: Vec<i64>,
}

/// Rows touched by crash recovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub sessions_interrupted: u64,
    pub histories_failed: u64,
}

// ============================================================================
// Dependencies
// ============================================================================

/// Everything the orchestrator talks to
#[derive(Clone)]
pub struct SyncDependencies {
    pub provider: Arc<dyn DocumentProvider>,
    pub session_provider: Arc<dyn SessionProvider>,
    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub clock: Arc<dyn Clock>,
    pub books: Arc<dyn BookRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub sessions: Arc<dyn SyncSessionRepository>,
    pub history: Arc<dyn SyncHistoryRepository>,
}

impl SyncDependencies {
    /// Wire the SQLite repositories over `pool`.
    pub fn sqlite(
        pool: SqlitePool,
        provider: Arc<dyn DocumentProvider>,
        session_provider: Arc<dyn SessionProvider>,
        http_client: Arc<dyn HttpClient>,
        file_system: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            session_provider,
            http_client,
            file_system,
            clock,
            books: Arc::new(SqliteBookRepository::new(pool.clone())),
            documents: Arc::new(SqliteDocumentRepository::new(pool.clone())),
            resources: Arc::new(SqliteResourceRepository::new(pool.clone())),
            sessions: Arc::new(SqliteSyncSessionRepository::new(pool.clone())),
            history: Arc::new(SqliteSyncHistoryRepository::new(pool)),
        }
    }
}

// ============================================================================
// Internal Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Sync,
    Detection,
}

/// The operation currently holding the guard
struct ActiveSync {
    kind: RunKind,
    token: CancellationToken,
    history_id: Option<SyncHistoryId>,
    session_id: Option<SyncSessionId>,
}

/// Addressing and hierarchy of one book, used to place files
struct BookLayout {
    context: BookContext,
    by_uuid: HashMap<String, Document>,
}

impl BookLayout {
    fn new(context: BookContext, rows: &[Document]) -> Self {
        let by_uuid = rows
            .iter()
            .filter_map(|doc| doc.uuid.clone().map(|uuid| (uuid, doc.clone())))
            .collect();
        Self { context, by_uuid }
    }
}

/// Paths handed out during one run
#[derive(Default)]
struct Placement {
    claimed: HashSet<PathBuf>,
    /// uuid -> resolved path, for placing descendants
    by_uuid: HashMap<String, PathBuf>,
}

impl Placement {
    fn record(&mut self, doc: &Document, path: &Path) {
        self.claimed.insert(path.to_path_buf());
        if let Some(uuid) = &doc.uuid {
            self.by_uuid.insert(uuid.clone(), path.to_path_buf());
        }
    }

    /// Path of an ancestor: resolved this run, else where it was last written.
    fn ancestor_path(&self, node: &Document) -> Option<PathBuf> {
        node.uuid
            .as_ref()
            .and_then(|uuid| self.by_uuid.get(uuid).cloned())
            .or_else(|| node.local_path.as_deref().map(PathBuf::from))
    }
}

#[derive(Default)]
struct WorkPlan {
    work: Vec<Document>,
    layouts: HashMap<i64, BookLayout>,
}

/// One book after listing and diffing
struct BookSnapshot {
    remote: Vec<RemoteDocument>,
    local: Vec<Document>,
    changes: ChangeSet,
    rows: Vec<Document>,
}

impl BookSnapshot {
    /// Every live remote document plus new and resurrected ones.
    fn force_ids(&self) -> HashSet<i64> {
        let status: HashMap<i64, DocSyncStatus> = self
            .local
            .iter()
            .map(|doc| (doc.id, doc.sync_status))
            .collect();
        let mut ids: HashSet<i64> = self
            .remote
            .iter()
            .filter(|remote| {
                !matches!(
                    status.get(&remote.id),
                    Some(DocSyncStatus::Failed) | Some(DocSyncStatus::Deleted)
                )
            })
            .map(|remote| remote.id)
            .collect();
        ids.extend(self.changes.transfer_ids());
        ids
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    provider: Arc<dyn DocumentProvider>,
    session_provider: Arc<dyn SessionProvider>,
    file_system: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    books: Arc<dyn BookRepository>,
    documents: Arc<dyn DocumentRepository>,
    sessions: Arc<dyn SyncSessionRepository>,
    history: Arc<dyn SyncHistoryRepository>,
    normalizer: ContentNormalizer,
    pipeline: ResourcePipeline,
    event_bus: EventBus,
    output_dir: PathBuf,
    settings: SyncSettings,
    run_state: Mutex<Option<ActiveSync>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator writing under `output_dir`.
    ///
    /// # Errors
    ///
    /// Fails only if the built-in content patterns do not compile.
    pub fn new(
        deps: SyncDependencies,
        event_bus: EventBus,
        output_dir: impl Into<PathBuf>,
        settings: SyncSettings,
    ) -> Result<Self> {
        let pipeline = ResourcePipeline::new(
            deps.http_client.clone(),
            deps.file_system.clone(),
            deps.resources.clone(),
            deps.clock.clone(),
            Box::new(CompositeScanner::standard()?),
            settings.clone(),
        );

        Ok(Self {
            provider: deps.provider,
            session_provider: deps.session_provider,
            file_system: deps.file_system,
            clock: deps.clock,
            books: deps.books,
            documents: deps.documents,
            sessions: deps.sessions,
            history: deps.history,
            normalizer: ContentNormalizer::new()?,
            pipeline,
            event_bus,
            output_dir: output_dir.into(),
            settings,
            run_state: Mutex::new(None),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Run an incremental (or forced) sync over `options.book_ids`.
    ///
    /// Never returns an error: precondition failures, concurrent calls and
    /// setup failures all come back as an unsuccessful [`SyncResult`].
    /// `book_context` supplies addressing for books not yet in the store.
    #[instrument(skip(self, options, book_context), fields(books = ?options.book_ids, force = options.force))]
    pub async fn start_sync(
        &self,
        options: SyncOptions,
        book_context: &HashMap<i64, BookContext>,
    ) -> SyncResult {
        let book_ids = match options.normalized_book_ids() {
            Ok(ids) => ids,
            Err(err) => return SyncResult::rejected(err),
        };
        let contexts = match self.resolve_contexts(&book_ids, book_context).await {
            Ok(contexts) => contexts,
            Err(err) => return SyncResult::rejected(err),
        };
        let cookie = match self.require_session().await {
            Ok(cookie) => cookie,
            Err(err) => return SyncResult::rejected(err),
        };
        let token = match self.claim(RunKind::Sync).await {
            Ok(token) => token,
            Err(err) => {
                warn!("Rejected sync request: another sync is running");
                return SyncResult::rejected(err);
            }
        };

        let options = SyncOptions { book_ids, ..options };
        let result = self.run_sync(&options, &contexts, &cookie, &token).await;
        self.release().await;
        result
    }

    /// Request cancellation of the running sync.
    ///
    /// The active session is marked `interrupted` right away and
    /// [`get_sync_status`](Self::get_sync_status) reports `cancel_requested`
    /// together with the run's history id. The history row itself stays
    /// `running` until the loop stops before its next document: it is
    /// finalized exactly once, and the in-flight document still adds to its
    /// counts. Returns `false` if no sync is running.
    #[instrument(skip(self))]
    pub async fn cancel_sync(&self) -> Result<bool> {
        let state = self.run_state.lock().await;
        let Some(active) = state.as_ref().filter(|active| active.kind == RunKind::Sync) else {
            return Ok(false);
        };

        active.token.cancel();
        info!("Sync cancellation requested");

        if let Some(session_id) = &active.session_id {
            if let Some(mut session) = self.sessions.find_by_id(session_id).await? {
                if session.status == SessionStatus::Running {
                    session.interrupt(self.now_millis())?;
                    self.sessions.update(&session).await?;
                }
            }
        }
        Ok(true)
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        let state = self.run_state.lock().await;
        match state.as_ref() {
            Some(active) if active.kind == RunKind::Detection => SyncStatus {
                is_detecting: true,
                ..SyncStatus::default()
            },
            Some(active) => SyncStatus {
                is_running: true,
                is_detecting: false,
                cancel_requested: active.token.is_cancelled(),
                history_id: active.history_id.as_ref().map(SyncHistoryId::as_str),
                session_id: active.session_id.as_ref().map(SyncSessionId::as_str),
            },
            None => SyncStatus::default(),
        }
    }

    /// List each book remotely, persist the snapshot and return the diff.
    ///
    /// Holds the run guard while it reads and rewrites document rows, so it
    /// fails with `SyncInProgress` during a sync and a sync started
    /// meanwhile is rejected.
    #[instrument(skip(self, book_context))]
    pub async fn get_changes_for_books(
        &self,
        book_ids: &[i64],
        book_context: &HashMap<i64, BookContext>,
    ) -> Result<ChangeSet> {
        let contexts = self.resolve_contexts(book_ids, book_context).await?;
        self.require_session().await?;
        self.claim(RunKind::Detection).await?;

        let changes = self.detect_books(&contexts).await;
        self.release().await;
        changes
    }

    async fn detect_books(&self, contexts: &[BookContext]) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        for context in contexts {
            changes.extend(self.detect_book(context).await?.changes);
        }
        Ok(changes)
    }

    /// Most recent interrupted session with the documents it still owes.
    pub async fn get_interrupted_session(&self) -> Result<Option<SyncSessionInfo>> {
        let Some(session) = self.sessions.find_latest_interrupted().await? else {
            return Ok(None);
        };

        let docs = self.documents.find_by_books(&session.book_ids).await?;
        let live: Vec<i64> = docs
            .iter()
            .filter(|doc| doc.sync_status != DocSyncStatus::Deleted)
            .map(|doc| doc.id)
            .collect();
        let remaining_doc_ids = session.remaining(&live).collect();

        Ok(Some(SyncSessionInfo {
            session,
            remaining_doc_ids,
        }))
    }

    /// Crash recovery: nothing can be running in a fresh process.
    #[instrument(skip(self))]
    pub async fn recover_interrupted_sessions(&self) -> Result<RecoveryReport> {
        if self.run_state.lock().await.is_some() {
            return Err(SyncError::SyncInProgress);
        }

        let now = self.now_millis();
        let report = RecoveryReport {
            sessions_interrupted: self.sessions.interrupt_running(now).await?,
            histories_failed: self.history.fail_running(INTERRUPTED_BY_EXIT, now).await?,
        };
        if report.sessions_interrupted > 0 || report.histories_failed > 0 {
            info!(
                sessions = report.sessions_interrupted,
                histories = report.histories_failed,
                "Recovered sync state left by a previous process"
            );
        }
        Ok(report)
    }

    /// Continue an interrupted session under a new history record.
    #[instrument(skip(self, book_context), fields(session_id = %session_id))]
    pub async fn resume_sync(
        &self,
        session_id: &SyncSessionId,
        book_context: &HashMap<i64, BookContext>,
    ) -> SyncResult {
        let session = match self.sessions.find_by_id(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return SyncResult::rejected(SyncError::SessionNotFound {
                    session_id: session_id.as_str(),
                })
            }
            Err(err) => return SyncResult::rejected(err),
        };
        if session.status != SessionStatus::Interrupted {
            return SyncResult::rejected(SyncError::InvalidStateTransition {
                from: session.status.as_str().to_string(),
                to: SessionStatus::Running.as_str().to_string(),
                reason: "Only interrupted sessions can be resumed".to_string(),
            });
        }
        let contexts = match self.resolve_contexts(&session.book_ids, book_context).await {
            Ok(contexts) => contexts,
            Err(err) => return SyncResult::rejected(err),
        };
        let cookie = match self.require_session().await {
            Ok(cookie) => cookie,
            Err(err) => return SyncResult::rejected(err),
        };
        let token = match self.claim(RunKind::Sync).await {
            Ok(token) => token,
            Err(err) => return SyncResult::rejected(err),
        };

        let result = self.run_resume(session, &contexts, &cookie, &token).await;
        self.release().await;
        result
    }

    // ------------------------------------------------------------------------
    // Run guard
    // ------------------------------------------------------------------------

    async fn claim(&self, kind: RunKind) -> Result<CancellationToken> {
        let mut state = self.run_state.lock().await;
        if state.is_some() {
            return Err(SyncError::SyncInProgress);
        }
        let token = CancellationToken::new();
        *state = Some(ActiveSync {
            kind,
            token: token.clone(),
            history_id: None,
            session_id: None,
        });
        Ok(token)
    }

    async fn release(&self) {
        *self.run_state.lock().await = None;
    }

    async fn set_active(&self, history_id: &SyncHistoryId, session_id: Option<&SyncSessionId>) {
        if let Some(active) = self.run_state.lock().await.as_mut() {
            active.history_id = Some(history_id.clone());
            active.session_id = session_id.cloned();
        }
    }

    /// Persist the session; a pending cancellation wins over `running`.
    ///
    /// Holds the run guard so a concurrent `cancel_sync` cannot be
    /// overwritten.
    async fn persist_session(&self, session: &mut SyncSession, token: &CancellationToken) -> Result<()> {
        let _guard = self.run_state.lock().await;
        if token.is_cancelled() && session.status == SessionStatus::Running {
            session.interrupt(self.now_millis())?;
        }
        self.sessions.update(session).await
    }

    // ------------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------------

    async fn run_sync(
        &self,
        options: &SyncOptions,
        contexts: &[BookContext],
        cookie: &str,
        token: &CancellationToken,
    ) -> SyncResult {
        let mut history = SyncHistory::new(options.book_ids.clone(), self.now_millis());
        if let Err(err) = self.history.insert(&history).await {
            error!(error = %err, "Failed to open sync history");
            return SyncResult::rejected(err);
        }
        self.set_active(&history.id, None).await;

        let plan = match self.plan_work(options, contexts, &history.id).await {
            Ok(plan) => plan,
            Err(err) => return self.abort(history, None, err).await,
        };

        let total_docs = plan.work.len() as u64;
        let mut session = SyncSession::new(options.book_ids.clone(), total_docs, self.now_millis());
        if let Err(err) = self.open_session(&mut history, &session, total_docs, true).await {
            return self.abort(history, None, err).await;
        }

        info!(
            history_id = %history.id,
            session_id = %session.id,
            total_docs = history.total_docs,
            "Sync started"
        );
        self.execute(history, &mut session, plan, cookie, token).await
    }

    async fn run_resume(
        &self,
        mut session: SyncSession,
        contexts: &[BookContext],
        cookie: &str,
        token: &CancellationToken,
    ) -> SyncResult {
        let mut history = SyncHistory::new(session.book_ids.clone(), self.now_millis());
        if let Err(err) = self.history.insert(&history).await {
            error!(error = %err, "Failed to open sync history");
            return SyncResult::rejected(err);
        }
        self.set_active(&history.id, None).await;

        let plan = match self.plan_resume(&mut session, contexts).await {
            Ok(plan) => plan,
            Err(err) => return self.abort(history, None, err).await,
        };

        if let Err(err) = session.resume(self.now_millis()) {
            return self.abort(history, None, err).await;
        }
        let total_docs = plan.work.len() as u64;
        if let Err(err) = self.open_session(&mut history, &session, total_docs, false).await {
            return self.abort(history, None, err).await;
        }

        info!(
            history_id = %history.id,
            session_id = %session.id,
            remaining = plan.work.len(),
            "Sync resumed"
        );
        self.execute(history, &mut session, plan, cookie, token).await
    }

    /// Attach the session to history, persist both and expose their ids.
    async fn open_session(
        &self,
        history: &mut SyncHistory,
        session: &SyncSession,
        total_docs: u64,
        is_new: bool,
    ) -> Result<()> {
        if is_new {
            self.sessions.insert(session).await?;
        } else {
            self.sessions.update(session).await?;
        }
        history.attach(session.id.clone(), total_docs)?;
        self.history.update(history).await?;
        self.set_active(&history.id, Some(&session.id)).await;
        Ok(())
    }

    /// Finalize a run that failed outside the per-document loop.
    async fn abort(
        &self,
        mut history: SyncHistory,
        session: Option<(&mut SyncSession, &CancellationToken)>,
        err: SyncError,
    ) -> SyncResult {
        let message = err.to_string();
        error!(history_id = %history.id, error = %message, "Sync failed");

        if let Some((session, token)) = session {
            if session.status == SessionStatus::Running {
                if let Err(err) = session.interrupt(self.now_millis()) {
                    warn!(error = %err, "Could not interrupt session");
                }
            }
            if let Err(err) = self.persist_session(session, token).await {
                warn!(error = %err, "Could not persist interrupted session");
            }
        }

        if let Err(err) = history.fail(message.clone(), self.now_millis()) {
            warn!(error = %err, "History already finalized");
        } else if let Err(err) = self.history.update(&history).await {
            error!(error = %err, "Could not finalize sync history");
        }

        self.emit(SyncEvent::Failed {
            history_id: history.id.as_str(),
            message: message.clone(),
        });
        SyncResult::from_history(&history, vec![message], false)
    }

    /// The sequential document loop shared by start and resume.
    async fn execute(
        &self,
        mut history: SyncHistory,
        session: &mut SyncSession,
        plan: WorkPlan,
        cookie: &str,
        token: &CancellationToken,
    ) -> SyncResult {
        let history_id = history.id.as_str();
        self.emit(SyncEvent::Started {
            history_id: history_id.clone(),
            session_id: session.id.as_str(),
            total_docs: history.total_docs,
        });

        let total = plan.work.len() as u64;
        let mut placement = Placement::default();
        let mut errors = Vec::new();
        let mut cancelled = false;
        let mut session_reported = false;

        for (index, doc) in plan.work.iter().enumerate() {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }

            let Some(layout) = plan.layouts.get(&doc.book_id) else {
                let err = SyncError::MissingBookContext(doc.book_id);
                return self.abort(history, Some((&mut *session, token)), err).await;
            };

            let outcome = self
                .sync_document(doc, layout, cookie, &history_id, index as u64 + 1, total, &mut placement)
                .await;

            let bookkeeping = match outcome {
                Ok(()) => self.record_success(&mut history, session, doc.id, token).await,
                Err(err) => {
                    let message = format!("{} ({}): {}", doc.title, doc.id, err);
                    warn!(doc_id = doc.id, error = %err, "Document sync failed");
                    if let (SyncError::SessionExpired(reason), false) = (&err, session_reported) {
                        session_reported = true;
                        self.event_bus
                            .emit(CoreEvent::Auth(AuthEvent::SessionRequired {
                                message: reason.clone(),
                            }))
                            .ok();
                    }
                    let recorded = self.record_failure(&mut history, doc, &message).await;
                    errors.push(message);
                    recorded
                }
            };
            if let Err(err) = bookkeeping {
                return self.abort(history, Some((&mut *session, token)), err).await;
            }
        }

        match self.finish(&mut history, session, &errors, cancelled, token).await {
            Ok(cancelled) => SyncResult::from_history(&history, errors, cancelled),
            Err(err) => self.abort(history, None, err).await,
        }
    }

    /// Finalize session and history; returns whether the run ended cancelled.
    async fn finish(
        &self,
        history: &mut SyncHistory,
        session: &mut SyncSession,
        errors: &[String],
        cancelled: bool,
        token: &CancellationToken,
    ) -> Result<bool> {
        let now = self.now_millis();
        let cancelled = {
            let _guard = self.run_state.lock().await;
            let cancelled = cancelled || token.is_cancelled();
            if cancelled {
                if session.status == SessionStatus::Running {
                    session.interrupt(now)?;
                }
            } else {
                session.complete(now)?;
            }
            self.sessions.update(session).await?;
            cancelled
        };

        if cancelled {
            history.cancel(now)?;
            self.history.update(history).await?;
            info!(
                history_id = %history.id,
                synced_docs = history.synced_docs,
                "Sync cancelled"
            );
            self.emit(SyncEvent::Cancelled {
                history_id: history.id.as_str(),
                synced_docs: history.synced_docs,
            });
        } else {
            if errors.is_empty() {
                history.succeed(now)?;
            } else {
                history.fail(errors.join("\n"), now)?;
            }
            self.history.update(history).await?;
            info!(
                history_id = %history.id,
                synced_docs = history.synced_docs,
                failed_docs = history.failed_docs,
                "Sync finished"
            );
            self.emit(SyncEvent::Completed {
                history_id: history.id.as_str(),
                synced_docs: history.synced_docs,
                failed_docs: history.failed_docs,
                duration_secs: history.duration_secs().unwrap_or(0),
            });
        }
        Ok(cancelled)
    }

    async fn record_success(
        &self,
        history: &mut SyncHistory,
        session: &mut SyncSession,
        doc_id: i64,
        token: &CancellationToken,
    ) -> Result<()> {
        session.record_completed(doc_id, self.now_millis())?;
        self.persist_session(session, token).await?;
        history.record_synced()?;
        self.history.update(history).await
    }

    async fn record_failure(
        &self,
        history: &mut SyncHistory,
        doc: &Document,
        message: &str,
    ) -> Result<()> {
        let now = self.now_millis();
        history.record_failed()?;
        self.history.update(history).await?;

        if !self
            .documents
            .update_status(doc.id, DocSyncStatus::Failed, now)
            .await?
        {
            let mut row = doc.clone();
            row.set_status(DocSyncStatus::Failed, now);
            self.documents.upsert(&row).await?;
        }

        self.emit(SyncEvent::DocumentFailed {
            history_id: history.id.as_str(),
            doc_id: doc.id,
            message: message.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    async fn plan_work(
        &self,
        options: &SyncOptions,
        contexts: &[BookContext],
        history_id: &SyncHistoryId,
    ) -> Result<WorkPlan> {
        let filter: Option<HashSet<i64>> = options
            .document_ids
            .as_ref()
            .map(|ids| ids.iter().copied().collect());
        let mut plan = WorkPlan::default();
        let mut seen = HashSet::new();

        for (index, context) in contexts.iter().enumerate() {
            self.emit_progress(
                &history_id.as_str(),
                index as u64 + 1,
                contexts.len() as u64,
                &context.display_name,
                SyncPhase::Comparing,
            );

            let snapshot = self.detect_book(context).await?;
            let candidates = if options.force {
                snapshot.force_ids()
            } else {
                snapshot.changes.transfer_ids()
            };
            let rows_by_id: HashMap<i64, &Document> =
                snapshot.rows.iter().map(|doc| (doc.id, doc)).collect();

            for remote in &snapshot.remote {
                let wanted = candidates.contains(&remote.id)
                    && filter.as_ref().map_or(true, |ids| ids.contains(&remote.id));
                if !wanted || !seen.insert(remote.id) {
                    continue;
                }
                if let Some(row) = rows_by_id.get(&remote.id) {
                    plan.work.push((*row).clone());
                }
            }

            plan.layouts
                .insert(context.book_id, BookLayout::new(context.clone(), &snapshot.rows));
        }

        Ok(plan)
    }

    /// Work left in `session`; already materialized documents are recorded
    /// as completed without a transfer.
    async fn plan_resume(
        &self,
        session: &mut SyncSession,
        contexts: &[BookContext],
    ) -> Result<WorkPlan> {
        let mut plan = WorkPlan::default();
        let now = self.now_millis();

        for context in contexts {
            let rows = self.documents.find_by_book(context.book_id).await?;
            for doc in &rows {
                if matches!(doc.sync_status, DocSyncStatus::Deleted | DocSyncStatus::Failed)
                    || session.completed_doc_ids.contains(&doc.id)
                {
                    continue;
                }
                if doc.sync_status == DocSyncStatus::Synced && self.artifact_exists(doc).await? {
                    session.record_completed(doc.id, now)?;
                    continue;
                }
                plan.work.push(doc.clone());
            }
            plan.layouts
                .insert(context.book_id, BookLayout::new(context.clone(), &rows));
        }

        Ok(plan)
    }

    async fn artifact_exists(&self, doc: &Document) -> Result<bool> {
        match &doc.local_path {
            Some(path) => Ok(self.file_system.exists(Path::new(path)).await?),
            None => Ok(false),
        }
    }

    /// List one book, diff it against the store and persist the snapshot.
    async fn detect_book(&self, context: &BookContext) -> Result<BookSnapshot> {
        self.ensure_book(context).await?;

        let remote = self.provider.list_documents(context).await?;
        let local = self.documents.find_by_book(context.book_id).await?;
        let changes = detect_changes(&remote, &local);

        let now = self.now_millis();
        let rows = snapshot_rows(&remote, &local, &changes, now);
        self.documents.upsert_many(&rows).await?;

        let doc_count = remote
            .iter()
            .filter(|doc| doc.doc_type == RemoteDocType::Doc)
            .count() as i64;
        self.books
            .update_doc_count(context.book_id, doc_count, now)
            .await?;

        debug!(
            book_id = context.book_id,
            remote = remote.len(),
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "Compared book snapshot"
        );

        Ok(BookSnapshot {
            remote,
            local,
            changes,
            rows,
        })
    }

    async fn ensure_book(&self, context: &BookContext) -> Result<()> {
        if self.books.find_by_id(context.book_id).await?.is_none() {
            self.books
                .upsert(&Book::from_context(context, self.now_millis()))
                .await?;
        }
        Ok(())
    }

    async fn resolve_contexts(
        &self,
        book_ids: &[i64],
        provided: &HashMap<i64, BookContext>,
    ) -> Result<Vec<BookContext>> {
        let mut contexts = Vec::with_capacity(book_ids.len());
        for id in book_ids {
            match provided.get(id) {
                Some(context) => contexts.push(context.clone()),
                None => match self.books.find_by_id(*id).await? {
                    Some(book) => contexts.push(book.context()),
                    None => return Err(SyncError::MissingBookContext(*id)),
                },
            }
        }
        Ok(contexts)
    }

    async fn require_session(&self) -> Result<String> {
        match self.session_provider.require_session(self.clock.now()).await {
            Ok(session) => Ok(session.cookie),
            Err(err) => {
                let err = SyncError::from(err);
                if let SyncError::SessionExpired(message) = &err {
                    self.event_bus
                        .emit(CoreEvent::Auth(AuthEvent::SessionRequired {
                            message: message.clone(),
                        }))
                        .ok();
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Per-document transfer
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn sync_document(
        &self,
        doc: &Document,
        layout: &BookLayout,
        cookie: &str,
        history_id: &str,
        current: u64,
        total: u64,
        placement: &mut Placement,
    ) -> Result<()> {
        self.emit_progress(history_id, current, total, &doc.title, SyncPhase::Downloading);
        let target = self.resolve_target(doc, layout, placement).await?;

        if doc.is_title() {
            self.file_system.create_dir_all(&target).await?;
        } else {
            let content = self
                .provider
                .fetch_content(&layout.context, &doc.locator(), &self.settings.render_options)
                .await?;
            let markdown = self.normalizer.normalize(&content);

            self.emit_progress(history_id, current, total, &doc.title, SyncPhase::Writing);
            let dir = target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.output_dir.clone());
            let body = self
                .rewrite_resources(&markdown, doc.id, &dir, cookie, history_id)
                .await;

            self.file_system.create_dir_all(&dir).await?;
            self.file_system
                .write_file(&target, Bytes::from(body))
                .await?;
            self.apply_remote_times(&target, doc).await;
            self.remove_stale_file(doc, &target, &placement.claimed).await;
        }

        let mut row = doc.clone();
        let synced_at = self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true);
        row.mark_synced(target.to_string_lossy(), synced_at, self.now_millis());
        self.documents.upsert(&row).await?;

        debug!(doc_id = doc.id, path = %target.display(), "Document written");
        Ok(())
    }

    /// Run the resource pipeline; on failure keep the content as is.
    async fn rewrite_resources(
        &self,
        markdown: &str,
        doc_id: i64,
        dir: &Path,
        cookie: &str,
        history_id: &str,
    ) -> String {
        let bus = self.event_bus.clone();
        let history_id = history_id.to_string();
        let progress = move |current: u64, total: u64| {
            bus.emit(CoreEvent::Sync(SyncEvent::ResourceProgress {
                history_id: history_id.clone(),
                doc_id,
                current,
                total,
            }))
            .ok();
        };

        let target = ResourceTarget {
            doc_id,
            target_dir: dir,
            cookie: Some(cookie),
        };
        match self.pipeline.process_content(markdown, &target, &progress).await {
            Ok(processed) => processed.content,
            Err(err) => {
                warn!(doc_id, error = %err, "Resource pipeline failed, keeping remote references");
                markdown.to_string()
            }
        }
    }

    /// Path for `doc`; the slug is appended when another document owns the
    /// plain path. Children are placed under the path their ancestors got.
    async fn resolve_target(
        &self,
        doc: &Document,
        layout: &BookLayout,
        placement: &mut Placement,
    ) -> Result<PathBuf> {
        let dir = parent_dir(
            &self.output_dir,
            &layout.context.display_name,
            doc,
            &layout.by_uuid,
            |node| placement.ancestor_path(node),
        );

        let plain = document_target(&dir, doc, false);
        let target = if self.path_available(&plain, doc, &placement.claimed).await? {
            plain
        } else {
            document_target(&dir, doc, true)
        };
        placement.record(doc, &target);
        Ok(target)
    }

    async fn path_available(
        &self,
        path: &Path,
        doc: &Document,
        claimed: &HashSet<PathBuf>,
    ) -> Result<bool> {
        if claimed.contains(path) {
            return Ok(false);
        }
        let owner = self
            .documents
            .find_by_local_path(&path.to_string_lossy())
            .await?;
        Ok(owner.map_or(true, |owner| owner.id == doc.id))
    }

    /// Stamp the file with the remote created/updated times.
    async fn apply_remote_times(&self, path: &Path, doc: &Document) {
        let created = parse_timestamp_millis(doc.remote_created_at.as_deref());
        let updated = parse_timestamp_millis(doc.remote_updated_at.as_deref());
        let (Some(accessed), Some(modified)) = (created.or(updated), updated.or(created)) else {
            return;
        };

        if let Err(err) = self
            .file_system
            .set_file_times(path, system_time(accessed), system_time(modified))
            .await
        {
            warn!(path = %path.display(), error = %err, "Could not set file times");
        }
    }

    /// Remove the previous file of a document that moved.
    async fn remove_stale_file(&self, doc: &Document, target: &Path, claimed: &HashSet<PathBuf>) {
        let Some(previous) = doc.local_path.as_deref().map(PathBuf::from) else {
            return;
        };
        if previous == target || claimed.contains(&previous) {
            return;
        }
        match self.file_system.exists(&previous).await {
            Ok(true) => {
                if let Err(err) = self.file_system.delete_file(&previous).await {
                    warn!(path = %previous.display(), error = %err, "Could not remove stale file");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(path = %previous.display(), error = %err, "Could not check stale file"),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn now_millis(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }

    fn emit_progress(&self, history_id: &str, current: u64, total: u64, label: &str, phase: SyncPhase) {
        self.emit(SyncEvent::Progress {
            history_id: history_id.to_string(),
            current,
            total,
            current_item_label: label.to_string(),
            phase,
        });
    }
}

fn system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}
