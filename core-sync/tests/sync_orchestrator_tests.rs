//! Integration tests for the sync orchestrator
//!
//! These tests drive complete runs against an in-memory store, a scripted
//! remote provider and a temporary output directory:
//! - First sync, no-op resync and remote deletion
//! - Failure isolation across a batch
//! - Mid-batch cancellation followed by resume
//! - Precondition failures and the concurrent-run guard
//! - Crash recovery of stale sessions and history rows

use async_trait::async_trait;
use bridge_desktop::{StaticSessionProvider, TokioFileSystem};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::remote::{
    BookContext, ContentFormat, DocumentLocator, DocumentProvider, RemoteBook, RemoteContent,
    RemoteDocType, RemoteDocument, RenderOptions,
};
use bridge_traits::{FixedClock, HttpClient, HttpRequest, HttpResponse, SessionCredential};
use chrono::{TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::models::DocSyncStatus;
use core_library::repositories::{DocumentRepository, SqliteDocumentRepository};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, Receiver, SyncEvent};
use core_sync::{
    ChangeSet, HistoryStatus, SessionStatus, SqliteSyncHistoryRepository,
    SqliteSyncSessionRepository, SyncDependencies, SyncError, SyncHistory, SyncHistoryRepository,
    SyncOptions, SyncOrchestrator, SyncResult, SyncSession, SyncSessionRepository, SyncStatus,
    INTERRUPTED_BY_EXIT,
};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tempfile::TempDir;

const BOOK_ID: i64 = 1;

// ============================================================================
// Fakes
// ============================================================================

/// What the provider does when a given document is fetched
enum FetchHook {
    /// Cancel, then record the status seen right after
    Cancel,
    StartAnother,
    DetectChanges,
}

/// Scripted remote provider
#[derive(Default)]
struct ScriptedProvider {
    docs: Mutex<Vec<RemoteDocument>>,
    bodies: Mutex<HashMap<i64, RemoteContent>>,
    failing: Mutex<HashSet<i64>>,
    fetched: Mutex<Vec<i64>>,
    hooks: Mutex<HashMap<i64, FetchHook>>,
    nested_results: Mutex<Vec<SyncResult>>,
    detections: Mutex<Vec<core_sync::Result<ChangeSet>>>,
    statuses: Mutex<Vec<SyncStatus>>,
    /// Start a sync from inside the next listing
    start_on_list: Mutex<bool>,
    orchestrator: OnceLock<Weak<SyncOrchestrator>>,
}

impl ScriptedProvider {
    fn set_docs(&self, docs: Vec<RemoteDocument>) {
        *self.docs.lock().unwrap() = docs;
    }

    fn set_body(&self, id: i64, body: &str, format: ContentFormat) {
        self.bodies.lock().unwrap().insert(
            id,
            RemoteContent {
                body: body.to_string(),
                format,
            },
        );
    }

    fn fail(&self, id: i64) {
        self.failing.lock().unwrap().insert(id);
    }

    fn hook(&self, id: i64, hook: FetchHook) {
        self.hooks.lock().unwrap().insert(id, hook);
    }

    fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        self.orchestrator
            .get()
            .and_then(Weak::upgrade)
            .expect("orchestrator registered")
    }

    fn fetch_count(&self, id: i64) -> usize {
        self.fetched.lock().unwrap().iter().filter(|d| **d == id).count()
    }

    fn total_fetches(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentProvider for ScriptedProvider {
    async fn list_books(&self) -> BridgeResult<Vec<RemoteBook>> {
        Ok(Vec::new())
    }

    async fn list_documents(&self, book: &BookContext) -> BridgeResult<Vec<RemoteDocument>> {
        let start = std::mem::take(&mut *self.start_on_list.lock().unwrap());
        if start {
            let contexts = HashMap::from([(book.book_id, book.clone())]);
            let nested = self
                .orchestrator()
                .start_sync(SyncOptions::new(vec![book.book_id]), &contexts)
                .await;
            self.nested_results.lock().unwrap().push(nested);
        }
        Ok(self.docs.lock().unwrap().clone())
    }

    async fn fetch_content(
        &self,
        book: &BookContext,
        doc: &DocumentLocator,
        _options: &RenderOptions,
    ) -> BridgeResult<RemoteContent> {
        self.fetched.lock().unwrap().push(doc.id);

        let hook = self.hooks.lock().unwrap().remove(&doc.id);
        if let Some(hook) = hook {
            let orchestrator = self.orchestrator();
            match hook {
                FetchHook::Cancel => {
                    assert!(orchestrator.cancel_sync().await.unwrap());
                    let status = orchestrator.get_sync_status().await;
                    self.statuses.lock().unwrap().push(status);
                }
                FetchHook::StartAnother => {
                    let nested = orchestrator
                        .start_sync(SyncOptions::new(vec![BOOK_ID]), &HashMap::new())
                        .await;
                    self.nested_results.lock().unwrap().push(nested);
                }
                FetchHook::DetectChanges => {
                    let contexts = HashMap::from([(book.book_id, book.clone())]);
                    let detected = orchestrator
                        .get_changes_for_books(&[book.book_id], &contexts)
                        .await;
                    self.detections.lock().unwrap().push(detected);
                }
            }
        }

        if self.failing.lock().unwrap().contains(&doc.id) {
            return Err(BridgeError::OperationFailed(format!("fetch of {} failed", doc.id)));
        }
        let body = self.bodies.lock().unwrap().get(&doc.id).cloned();
        Ok(body.unwrap_or_else(|| RemoteContent {
            body: format!("# {}\n\nBody of {}.\n", doc.title, doc.slug),
            format: ContentFormat::Markdown,
        }))
    }
}

/// Documents in these tests embed no resources
struct OfflineHttp;

#[async_trait]
impl HttpClient for OfflineHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable(format!("offline: {}", request.url)))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    orchestrator: Arc<SyncOrchestrator>,
    provider: Arc<ScriptedProvider>,
    pool: SqlitePool,
    events: Receiver<CoreEvent>,
    dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self::with_session(Some(SessionCredential::new("_session=abc"))).await
    }

    async fn with_session(session: Option<SessionCredential>) -> Self {
        let pool = create_test_pool().await.unwrap();
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::default());
        let event_bus = EventBus::new(1024);
        let events = event_bus.subscribe();

        let deps = SyncDependencies::sqlite(
            pool.clone(),
            provider.clone(),
            Arc::new(StaticSessionProvider::new(session)),
            Arc::new(OfflineHttp),
            Arc::new(TokioFileSystem::new()),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())),
        );
        let orchestrator = Arc::new(
            SyncOrchestrator::new(deps, event_bus, dir.path(), SyncSettings::default()).unwrap(),
        );
        provider
            .orchestrator
            .set(Arc::downgrade(&orchestrator))
            .ok();

        Self {
            orchestrator,
            provider,
            pool,
            events,
            dir,
        }
    }

    fn contexts(&self) -> HashMap<i64, BookContext> {
        HashMap::from([(
            BOOK_ID,
            BookContext {
                book_id: BOOK_ID,
                owner_login: "alice".to_string(),
                slug: "handbook".to_string(),
                display_name: "Team Handbook".to_string(),
            },
        )])
    }

    async fn sync(&self) -> SyncResult {
        self.orchestrator
            .start_sync(SyncOptions::new(vec![BOOK_ID]), &self.contexts())
            .await
    }

    fn documents(&self) -> SqliteDocumentRepository {
        SqliteDocumentRepository::new(self.pool.clone())
    }

    fn history(&self) -> SqliteSyncHistoryRepository {
        SqliteSyncHistoryRepository::new(self.pool.clone())
    }

    fn sessions(&self) -> SqliteSyncSessionRepository {
        SqliteSyncSessionRepository::new(self.pool.clone())
    }

    async fn status_of(&self, id: i64) -> DocSyncStatus {
        self.documents()
            .find_by_id(id)
            .await
            .unwrap()
            .unwrap()
            .sync_status
    }

    fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let CoreEvent::Sync(event) = event {
                events.push(event);
            }
        }
        events
    }

    fn book_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("Team Handbook")
    }
}

fn remote(id: i64, title: &str) -> RemoteDocument {
    RemoteDocument {
        id,
        book_id: BOOK_ID,
        slug: format!("doc-{}", id),
        title: title.to_string(),
        uuid: Some(format!("u{}", id)),
        parent_uuid: None,
        child_uuid: None,
        depth: Some(1),
        sort_order: Some(id),
        doc_type: RemoteDocType::Doc,
        created_at: Some("2024-04-01T08:00:00.000Z".to_string()),
        updated_at: Some("2024-05-01T08:00:00.000Z".to_string()),
    }
}

fn corpus(count: i64) -> Vec<RemoteDocument> {
    (1..=count).map(|id| remote(id, &format!("Chapter {}", id))).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_first_sync_materializes_every_document() {
    let mut h = Harness::new().await;
    h.provider.set_docs(corpus(3));

    let changes = h
        .orchestrator
        .get_changes_for_books(&[BOOK_ID], &h.contexts())
        .await
        .unwrap();
    assert_eq!(changes.new.len(), 3);
    assert!(changes.deleted.is_empty());

    let result = h.sync().await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.total_docs, 3);
    assert_eq!(result.synced_docs, 3);
    assert_eq!(result.failed_docs, 0);

    for id in 1..=3 {
        let doc = h.documents().find_by_id(id).await.unwrap().unwrap();
        assert_eq!(doc.sync_status, DocSyncStatus::Synced);
        let path = doc.local_path.expect("local path set");
        assert!(doc.local_synced_at.is_some());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains(&format!("Body of doc-{}", id)));
    }
    assert!(h.book_dir().join("Chapter 1.md").exists());

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::Started { total_docs: 3, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Completed {
            synced_docs: 3,
            failed_docs: 0,
            ..
        }
    )));

    let history = h.history().list_recent(1).await.unwrap();
    assert_eq!(history[0].status, HistoryStatus::Success);
}

#[tokio::test]
async fn test_remote_file_times_are_applied() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(1));
    assert!(h.sync().await.success);

    let modified = std::fs::metadata(h.book_dir().join("Chapter 1.md"))
        .unwrap()
        .modified()
        .unwrap();
    let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    assert_eq!(
        modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64,
        expected.timestamp()
    );
}

#[tokio::test]
async fn test_identical_snapshot_is_a_noop() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(3));
    assert!(h.sync().await.success);
    let fetches = h.provider.total_fetches();

    let changes = h
        .orchestrator
        .get_changes_for_books(&[BOOK_ID], &h.contexts())
        .await
        .unwrap();
    assert!(changes.new.is_empty());
    assert!(changes.modified.is_empty());

    let result = h.sync().await;
    assert!(result.success);
    assert_eq!(result.synced_docs, 0);
    assert_eq!(h.provider.total_fetches(), fetches);
}

#[tokio::test]
async fn test_remote_update_is_transferred_again() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(2));
    assert!(h.sync().await.success);

    let mut docs = corpus(2);
    docs[1].updated_at = Some("2024-06-02T00:00:00.000Z".to_string());
    h.provider.set_docs(docs);

    let result = h.sync().await;
    assert_eq!(result.synced_docs, 1);
    assert_eq!(h.provider.fetch_count(2), 2);
    assert_eq!(h.provider.fetch_count(1), 1);
}

#[tokio::test]
async fn test_remote_deletion_is_recorded_and_excluded() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(3));
    assert!(h.sync().await.success);

    h.provider
        .set_docs(corpus(3).into_iter().filter(|d| d.id != 2).collect());
    let changes = h
        .orchestrator
        .get_changes_for_books(&[BOOK_ID], &h.contexts())
        .await
        .unwrap();
    assert_eq!(changes.deleted.len(), 1);
    assert_eq!(changes.deleted[0].id, 2);
    assert_eq!(h.status_of(2).await, DocSyncStatus::Deleted);

    let again = h
        .orchestrator
        .get_changes_for_books(&[BOOK_ID], &h.contexts())
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(h.status_of(2).await, DocSyncStatus::Deleted);
}

#[tokio::test]
async fn test_failing_document_does_not_stop_the_batch() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(3));
    h.provider.fail(2);

    let result = h.sync().await;
    assert!(!result.success);
    assert_eq!(result.synced_docs, 2);
    assert_eq!(result.failed_docs, 1);
    assert_eq!(result.synced_docs + result.failed_docs, 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(h.provider.fetch_count(3), 1);

    assert_eq!(h.status_of(2).await, DocSyncStatus::Failed);
    assert_eq!(h.status_of(3).await, DocSyncStatus::Synced);

    let history = h.history().list_recent(1).await.unwrap();
    assert_eq!(history[0].status, HistoryStatus::Failed);
    assert!(history[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("fetch of 2 failed"));

    // Failed documents stay out of incremental runs
    let rerun = h.sync().await;
    assert_eq!(rerun.total_docs, 0);
    assert_eq!(h.provider.fetch_count(2), 1);
}

#[tokio::test]
async fn test_cancel_mid_batch_then_resume() {
    let mut h = Harness::new().await;
    h.provider.set_docs(corpus(5));
    h.provider.hook(2, FetchHook::Cancel);

    let result = h.sync().await;
    assert!(result.cancelled);
    assert!(!result.success);
    assert!(result.synced_docs <= 2);

    let statuses = h.provider.statuses.lock().unwrap().clone();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].is_running);
    assert!(statuses[0].cancel_requested);
    assert_eq!(statuses[0].history_id, result.history_id);
    assert!(statuses[0].session_id.is_some());

    let history = h.history().list_recent(1).await.unwrap();
    assert_eq!(history[0].status, HistoryStatus::Cancelled);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SyncEvent::Cancelled { .. })));

    let info = h
        .orchestrator
        .get_interrupted_session()
        .await
        .unwrap()
        .expect("interrupted session");
    assert_eq!(info.session.status, SessionStatus::Interrupted);
    assert!(info.session.completed_doc_ids.len() <= 2);
    let completed_before = info.session.completed_doc_ids.clone();
    assert_eq!(
        info.remaining_doc_ids.len() + completed_before.len(),
        5
    );

    let resumed = h
        .orchestrator
        .resume_sync(&info.session.id, &h.contexts())
        .await;
    assert!(resumed.success, "errors: {:?}", resumed.errors);
    assert_eq!(resumed.synced_docs as usize, info.remaining_doc_ids.len());

    let session = h
        .sessions()
        .find_by_id(&info.session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.completed_doc_ids.len(), 5);
    assert!(completed_before
        .iter()
        .all(|id| session.completed_doc_ids.contains(id)));

    for id in 1..=5 {
        assert_eq!(h.provider.fetch_count(id), 1, "document {} fetched twice", id);
        assert_eq!(h.status_of(id).await, DocSyncStatus::Synced);
    }
    assert!(h.orchestrator.get_interrupted_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_start_is_rejected() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(2));
    h.provider.hook(1, FetchHook::StartAnother);

    let result = h.sync().await;
    assert!(result.success);

    let nested = h.provider.nested_results.lock().unwrap().clone();
    assert_eq!(nested.len(), 1);
    assert!(!nested[0].success);
    assert!(nested[0].history_id.is_none());
    assert_eq!(h.history().list_recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_detection_during_sync_is_rejected() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(2));
    h.provider.hook(1, FetchHook::DetectChanges);

    let result = h.sync().await;
    assert!(result.success, "errors: {:?}", result.errors);

    let detections = std::mem::take(&mut *h.provider.detections.lock().unwrap());
    assert_eq!(detections.len(), 1);
    assert!(matches!(detections[0], Err(SyncError::SyncInProgress)));

    // The row written by the sync was not reset to pending
    let doc = h.documents().find_by_id(1).await.unwrap().unwrap();
    assert_eq!(doc.sync_status, DocSyncStatus::Synced);
    assert!(doc.local_path.is_some());

    let rerun = h.sync().await;
    assert_eq!(rerun.total_docs, 0);
    assert_eq!(h.provider.fetch_count(1), 1);
}

#[tokio::test]
async fn test_sync_during_detection_is_rejected() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(2));
    *h.provider.start_on_list.lock().unwrap() = true;

    let changes = h
        .orchestrator
        .get_changes_for_books(&[BOOK_ID], &h.contexts())
        .await
        .unwrap();
    assert_eq!(changes.new.len(), 2);

    let nested = h.provider.nested_results.lock().unwrap().clone();
    assert_eq!(nested.len(), 1);
    assert!(!nested[0].success);
    assert!(nested[0].history_id.is_none());
    assert_eq!(nested[0].errors, vec![SyncError::SyncInProgress.to_string()]);
    assert_eq!(h.provider.total_fetches(), 0);
    assert!(h.history().list_recent(10).await.unwrap().is_empty());

    // The guard is released once detection returns
    let status = h.orchestrator.get_sync_status().await;
    assert!(!status.is_detecting);
    assert!(h.sync().await.success);
}

#[tokio::test]
async fn test_sync_status_reflects_idle_state() {
    let h = Harness::new().await;
    let status = h.orchestrator.get_sync_status().await;
    assert!(!status.is_running);
    assert!(!status.cancel_requested);
    assert!(!h.orchestrator.cancel_sync().await.unwrap());
}

#[tokio::test]
async fn test_preconditions_create_no_history() {
    let h = Harness::with_session(None).await;
    h.provider.set_docs(corpus(1));

    let no_session = h.sync().await;
    assert!(!no_session.success);
    assert!(no_session.history_id.is_none());

    let empty = h
        .orchestrator
        .start_sync(SyncOptions::new(Vec::new()), &h.contexts())
        .await;
    assert!(!empty.success);

    let unknown_book = h
        .orchestrator
        .start_sync(SyncOptions::new(vec![99]), &HashMap::new())
        .await;
    assert!(!unknown_book.success);

    assert!(h.history().list_recent(10).await.unwrap().is_empty());
    assert_eq!(h.provider.total_fetches(), 0);
}

#[tokio::test]
async fn test_force_and_document_filter() {
    let h = Harness::new().await;
    h.provider.set_docs(corpus(3));
    assert!(h.sync().await.success);

    let forced = h
        .orchestrator
        .start_sync(
            SyncOptions::new(vec![BOOK_ID])
                .with_force(true)
                .with_document_ids(vec![3]),
            &h.contexts(),
        )
        .await;
    assert_eq!(forced.total_docs, 1);
    assert_eq!(forced.synced_docs, 1);
    assert_eq!(h.provider.fetch_count(3), 2);
    assert_eq!(h.provider.fetch_count(1), 1);
}

#[tokio::test]
async fn test_hierarchy_and_html_normalization() {
    let h = Harness::new().await;
    let mut section = remote(10, "Guides");
    section.doc_type = RemoteDocType::Title;
    let mut child = remote(11, "Setup");
    child.parent_uuid = Some("u10".to_string());
    h.provider.set_docs(vec![section, child]);
    h.provider.set_body(
        11,
        "<h2>Install</h2><ul><li><input type=\"checkbox\" checked> done</li></ul>",
        ContentFormat::Html,
    );

    let result = h.sync().await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(h.provider.fetch_count(10), 0);

    let guides = h.book_dir().join("Guides");
    assert!(guides.is_dir());
    let written = std::fs::read_to_string(guides.join("Setup.md")).unwrap();
    assert!(written.contains("Install"));
    assert!(written.contains("[x]"));
    assert!(!written.contains("<input"));

    let title = h.documents().find_by_id(10).await.unwrap().unwrap();
    assert_eq!(title.sync_status, DocSyncStatus::Synced);
    assert!(Path::new(title.local_path.as_deref().unwrap()).is_dir());
}

#[tokio::test]
async fn test_same_title_gets_slug_suffix() {
    let h = Harness::new().await;
    h.provider
        .set_docs(vec![remote(1, "Notes"), remote(2, "Notes")]);

    assert!(h.sync().await.success);
    assert!(h.book_dir().join("Notes.md").exists());
    assert!(h.book_dir().join("Notes_doc-2.md").exists());
}

#[tokio::test]
async fn test_children_follow_suffixed_section() {
    let h = Harness::new().await;
    let mut first = remote(10, "Guide");
    first.doc_type = RemoteDocType::Title;
    let mut first_child = remote(11, "Intro");
    first_child.parent_uuid = Some("u10".to_string());
    let mut second = remote(20, "Guide");
    second.doc_type = RemoteDocType::Title;
    let mut second_child = remote(21, "Intro");
    second_child.parent_uuid = Some("u20".to_string());
    h.provider
        .set_docs(vec![first, first_child, second, second_child]);

    let result = h.sync().await;
    assert!(result.success, "errors: {:?}", result.errors);

    let first_intro = h.book_dir().join("Guide").join("Intro.md");
    let second_intro = h.book_dir().join("Guide_doc-20").join("Intro.md");
    assert!(first_intro.exists());
    assert!(second_intro.exists());
    assert!(std::fs::read_to_string(&first_intro)
        .unwrap()
        .contains("Body of doc-11"));
    assert!(std::fs::read_to_string(&second_intro)
        .unwrap()
        .contains("Body of doc-21"));

    let child = h.documents().find_by_id(21).await.unwrap().unwrap();
    assert_eq!(
        child.local_path.as_deref().map(Path::new),
        Some(second_intro.as_path())
    );

    // A forced rerun places the child under the stored section path
    let rerun = h
        .orchestrator
        .start_sync(
            SyncOptions::new(vec![BOOK_ID])
                .with_force(true)
                .with_document_ids(vec![21]),
            &h.contexts(),
        )
        .await;
    assert_eq!(rerun.synced_docs, 1);
    let child = h.documents().find_by_id(21).await.unwrap().unwrap();
    assert_eq!(
        child.local_path.as_deref().map(Path::new),
        Some(second_intro.as_path())
    );
}

#[tokio::test]
async fn test_recover_interrupted_sessions() {
    let h = Harness::new().await;
    let sessions = h.sessions();
    let histories = h.history();

    let session = SyncSession::new(vec![BOOK_ID], 4, 1_000);
    sessions.insert(&session).await.unwrap();
    let history = SyncHistory::new(vec![BOOK_ID], 1_000);
    histories.insert(&history).await.unwrap();

    let report = h.orchestrator.recover_interrupted_sessions().await.unwrap();
    assert_eq!(report.sessions_interrupted, 1);
    assert_eq!(report.histories_failed, 1);

    let stored = histories.find_by_id(&history.id).await.unwrap().unwrap();
    assert_eq!(stored.status, HistoryStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(INTERRUPTED_BY_EXIT));

    let stored = sessions.find_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Interrupted);

    let again = h.orchestrator.recover_interrupted_sessions().await.unwrap();
    assert_eq!(again.sessions_interrupted, 0);
    assert_eq!(again.histories_failed, 0);
}
