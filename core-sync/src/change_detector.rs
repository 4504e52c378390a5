//! # Change Detector
//!
//! Compares a remote snapshot of one or more books against the documents in
//! the metadata store and decides what needs to be transferred.
//!
//! ## Classification rules
//!
//! | Local record                        | Remote newer? | Result                     |
//! |-------------------------------------|---------------|----------------------------|
//! | none                                | -             | `New`                      |
//! | `failed`                            | -             | `FailedPreserved`          |
//! | `synced`                            | yes / no      | `Modified` / `Synced`      |
//! | `new`/`pending`/`modified`, no sync | -             | `Modified`                 |
//! | `new`/`pending`/`modified`          | yes           | `Modified`                 |
//! | `new`                               | no            | `New`                      |
//! | `pending`/`modified`                | no            | `Unchanged(status)`        |
//! | `deleted`                           | -             | `Modified` (resurrection)  |
//!
//! "Newer" compares the remote `updated_at` with `local_synced_at`, both
//! parsed from RFC 3339 into millisecond epochs. A missing or unparseable
//! local timestamp sorts before everything; a missing or unparseable remote
//! timestamp is never newer than a present local one.
//!
//! Every local document that is not already `deleted` and is absent from
//! the remote snapshot is reported in [`ChangeSet::deleted`].

use bridge_traits::remote::RemoteDocument;
use chrono::DateTime;
use core_library::models::{DocSyncStatus, Document};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Outcome of comparing one remote document with its local record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum Classification {
    New,
    Modified,
    Synced,
    FailedPreserved,
    /// Carries a pending/modified status forward without scheduling work
    Unchanged(DocSyncStatus),
}

impl Classification {
    /// Whether an incremental sync should transfer the document
    pub fn needs_transfer(&self) -> bool {
        matches!(self, Classification::New | Classification::Modified)
    }
}

/// Result of a detection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub new: Vec<RemoteDocument>,
    pub modified: Vec<RemoteDocument>,
    /// Local records that disappeared remotely
    pub deleted: Vec<Document>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.new.extend(other.new);
        self.modified.extend(other.modified);
        self.deleted.extend(other.deleted);
    }

    /// Ids of `new` and `modified` documents
    pub fn transfer_ids(&self) -> HashSet<i64> {
        self.new
            .iter()
            .chain(self.modified.iter())
            .map(|doc| doc.id)
            .collect()
    }
}

/// Parse an RFC 3339 timestamp into milliseconds since the Unix epoch.
pub fn parse_timestamp_millis(value: Option<&str>) -> Option<i64> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
}

fn remote_is_newer(remote_updated_at: Option<&str>, local_synced_at: Option<&str>) -> bool {
    let Some(remote) = parse_timestamp_millis(remote_updated_at) else {
        return false;
    };
    match parse_timestamp_millis(local_synced_at) {
        Some(local) => remote > local,
        None => true,
    }
}

/// Classify a remote document against its local record.
pub fn classify(remote: &RemoteDocument, local: Option<&Document>) -> Classification {
    let Some(local) = local else {
        return Classification::New;
    };

    let newer = remote_is_newer(remote.updated_at.as_deref(), local.local_synced_at.as_deref());

    match local.sync_status {
        DocSyncStatus::Failed => Classification::FailedPreserved,
        DocSyncStatus::Synced => {
            if newer {
                Classification::Modified
            } else {
                Classification::Synced
            }
        }
        DocSyncStatus::New | DocSyncStatus::Pending | DocSyncStatus::Modified => {
            if local.local_synced_at.is_none() || newer {
                Classification::Modified
            } else if local.sync_status == DocSyncStatus::New {
                Classification::New
            } else {
                Classification::Unchanged(local.sync_status)
            }
        }
        DocSyncStatus::Deleted => Classification::Modified,
    }
}

/// Compare a remote snapshot with the local records of the same books.
pub fn detect_changes(remote_docs: &[RemoteDocument], local_docs: &[Document]) -> ChangeSet {
    let local_by_id: HashMap<i64, &Document> = local_docs.iter().map(|doc| (doc.id, doc)).collect();
    let mut seen = HashSet::with_capacity(remote_docs.len());
    let mut changes = ChangeSet::default();

    for remote in remote_docs {
        if !seen.insert(remote.id) {
            continue;
        }
        match classify(remote, local_by_id.get(&remote.id).copied()) {
            Classification::New => changes.new.push(remote.clone()),
            Classification::Modified => changes.modified.push(remote.clone()),
            _ => {}
        }
    }

    changes.deleted = local_docs
        .iter()
        .filter(|doc| doc.sync_status != DocSyncStatus::Deleted && !seen.contains(&doc.id))
        .cloned()
        .collect();

    changes
}

/// Rows to persist for a detected snapshot.
///
/// New documents are inserted as `new`. Existing rows get their remote
/// metadata refreshed without touching `local_path`/`local_synced_at`;
/// modified rows move to `modified` and deletions to `deleted`.
pub fn snapshot_rows(
    remote_docs: &[RemoteDocument],
    local_docs: &[Document],
    changes: &ChangeSet,
    now: i64,
) -> Vec<Document> {
    let local_by_id: HashMap<i64, &Document> = local_docs.iter().map(|doc| (doc.id, doc)).collect();
    let modified: HashSet<i64> = changes.modified.iter().map(|doc| doc.id).collect();
    let mut seen = HashSet::with_capacity(remote_docs.len());
    let mut rows = Vec::with_capacity(remote_docs.len() + changes.deleted.len());

    for remote in remote_docs {
        if !seen.insert(remote.id) {
            continue;
        }
        match local_by_id.get(&remote.id) {
            None => rows.push(Document::from_remote(remote, now)),
            Some(local) => {
                let mut row = (*local).clone();
                row.apply_remote(remote, now);
                if modified.contains(&remote.id) {
                    row.set_status(DocSyncStatus::Modified, now);
                }
                rows.push(row);
            }
        }
    }

    rows.extend(changes.deleted.iter().map(|doc| {
        let mut row = doc.clone();
        row.set_status(DocSyncStatus::Deleted, now);
        row
    }));

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::remote::RemoteDocType;

    const T1: &str = "2024-03-01T10:00:00Z";
    const T2: &str = "2024-03-02T10:00:00.000+00:00";

    fn remote(id: i64, updated_at: Option<&str>) -> RemoteDocument {
        RemoteDocument {
            id,
            book_id: 1,
            slug: format!("doc-{}", id),
            title: format!("Doc {}", id),
            uuid: None,
            parent_uuid: None,
            child_uuid: None,
            depth: None,
            sort_order: Some(id),
            doc_type: RemoteDocType::Doc,
            created_at: Some(T1.to_string()),
            updated_at: updated_at.map(str::to_string),
        }
    }

    fn local(id: i64, status: DocSyncStatus, synced_at: Option<&str>) -> Document {
        let mut doc = Document::from_remote(&remote(id, Some(T1)), 0);
        doc.sync_status = status;
        if let Some(synced_at) = synced_at {
            doc.local_path = Some(format!("/out/doc-{}.md", id));
            doc.local_synced_at = Some(synced_at.to_string());
        }
        doc
    }

    #[test]
    fn test_missing_local_is_new() {
        assert_eq!(classify(&remote(1, Some(T1)), None), Classification::New);
    }

    #[test]
    fn test_failed_is_preserved_even_if_newer() {
        let local = local(1, DocSyncStatus::Failed, Some(T1));
        assert_eq!(
            classify(&remote(1, Some(T2)), Some(&local)),
            Classification::FailedPreserved
        );
    }

    #[test]
    fn test_synced_compares_timestamps() {
        let local = local(1, DocSyncStatus::Synced, Some(T1));
        assert_eq!(classify(&remote(1, Some(T2)), Some(&local)), Classification::Modified);
        assert_eq!(classify(&remote(1, Some(T1)), Some(&local)), Classification::Synced);
    }

    #[test]
    fn test_missing_remote_timestamp_never_newer() {
        let synced = local(1, DocSyncStatus::Synced, Some(T1));
        assert_eq!(classify(&remote(1, None), Some(&synced)), Classification::Synced);
        assert_eq!(
            classify(&remote(1, Some("yesterday")), Some(&synced)),
            Classification::Synced
        );
    }

    #[test]
    fn test_unparseable_local_timestamp_sorts_first() {
        let mut synced = local(1, DocSyncStatus::Synced, Some(T1));
        synced.local_synced_at = Some("garbage".to_string());
        assert_eq!(classify(&remote(1, Some(T1)), Some(&synced)), Classification::Modified);
    }

    #[test]
    fn test_pending_states() {
        let unsynced = local(1, DocSyncStatus::Pending, None);
        assert_eq!(classify(&remote(1, None), Some(&unsynced)), Classification::Modified);

        let new_synced = local(1, DocSyncStatus::New, Some(T2));
        assert_eq!(classify(&remote(1, Some(T1)), Some(&new_synced)), Classification::New);

        let modified = local(1, DocSyncStatus::Modified, Some(T2));
        assert_eq!(
            classify(&remote(1, Some(T1)), Some(&modified)),
            Classification::Unchanged(DocSyncStatus::Modified)
        );
        assert_eq!(classify(&remote(1, Some("2024-04-01T00:00:00Z")), Some(&modified)), Classification::Modified);
    }

    #[test]
    fn test_deleted_document_is_resurrected() {
        let deleted = local(1, DocSyncStatus::Deleted, Some(T2));
        assert_eq!(classify(&remote(1, Some(T1)), Some(&deleted)), Classification::Modified);
    }

    #[test]
    fn test_classification_is_total_and_deterministic() {
        let statuses = [
            DocSyncStatus::New,
            DocSyncStatus::Pending,
            DocSyncStatus::Modified,
            DocSyncStatus::Synced,
            DocSyncStatus::Deleted,
            DocSyncStatus::Failed,
        ];
        let stamps = [None, Some(T1), Some(T2), Some("not a date")];

        for status in statuses {
            for local_stamp in stamps {
                for remote_stamp in stamps {
                    let doc = local(1, status, local_stamp);
                    let r = remote(1, remote_stamp);
                    let first = classify(&r, Some(&doc));
                    assert_eq!(first, classify(&r, Some(&doc)));
                    if let Classification::Unchanged(carried) = first {
                        assert!(matches!(carried, DocSyncStatus::Pending | DocSyncStatus::Modified));
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_sync_reports_everything_new() {
        let remotes = vec![remote(1, Some(T1)), remote(2, Some(T1)), remote(3, Some(T1))];
        let changes = detect_changes(&remotes, &[]);

        assert_eq!(changes.new.len(), 3);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_identical_snapshot_is_noop() {
        let remotes = vec![remote(1, Some(T1)), remote(2, Some(T1))];
        let locals = vec![
            local(1, DocSyncStatus::Synced, Some(T2)),
            local(2, DocSyncStatus::Synced, Some(T2)),
        ];

        let changes = detect_changes(&remotes, &locals);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_deletion_excludes_already_deleted() {
        let remotes = vec![remote(1, Some(T1))];
        let locals = vec![
            local(1, DocSyncStatus::Synced, Some(T2)),
            local(2, DocSyncStatus::Synced, Some(T2)),
            local(3, DocSyncStatus::Deleted, Some(T2)),
            local(4, DocSyncStatus::Failed, None),
        ];

        let changes = detect_changes(&remotes, &locals);
        let deleted: Vec<i64> = changes.deleted.iter().map(|doc| doc.id).collect();
        assert_eq!(deleted, vec![2, 4]);
    }

    #[test]
    fn test_snapshot_rows_keep_materialization() {
        let remotes = vec![remote(1, Some(T2)), remote(2, Some(T1))];
        let locals = vec![
            local(1, DocSyncStatus::Synced, Some(T1)),
            local(3, DocSyncStatus::Synced, Some(T1)),
        ];
        let changes = detect_changes(&remotes, &locals);
        let rows = snapshot_rows(&remotes, &locals, &changes, 99);

        let by_id: HashMap<i64, &Document> = rows.iter().map(|row| (row.id, row)).collect();
        assert_eq!(by_id[&1].sync_status, DocSyncStatus::Modified);
        assert_eq!(by_id[&1].local_path.as_deref(), Some("/out/doc-1.md"));
        assert_eq!(by_id[&1].remote_updated_at.as_deref(), Some(T2));
        assert_eq!(by_id[&2].sync_status, DocSyncStatus::New);
        assert_eq!(by_id[&3].sync_status, DocSyncStatus::Deleted);
        assert!(rows.iter().all(|row| row.validate().is_ok()));
    }
}
