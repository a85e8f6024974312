//! In-memory backend

use crate::{Backend, BackendStats, ChangeRecord, SyncError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use memsync_core::{Document, DocumentId, Revision};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// In-memory backend
///
/// Behaves like a single CouchDB database: every save must name the
/// revision it replaces, deletions leave tombstones, and each save gets a
/// new update sequence on the changes feed. Data is lost when the process
/// exits.
pub struct MemoryBackend {
    /// Latest version per id: id -> (update seq, document)
    docs: DashMap<String, (u64, Document)>,
    /// Last assigned update sequence
    update_seq: AtomicU64,
    /// Live changes feed
    feed: broadcast::Sender<ChangeRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(1024);

        Self {
            docs: DashMap::new(),
            update_seq: AtomicU64::new(0),
            feed,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Next revision in `{generation}-{hash}` form
fn next_revision(previous: Option<&Revision>) -> Revision {
    let generation = previous
        .and_then(|rev| rev.as_str().split_once('-'))
        .and_then(|(generation, _)| generation.parse::<u64>().ok())
        .unwrap_or(0);

    Revision::new(format!(
        "{}-{}",
        generation + 1,
        uuid::Uuid::new_v4().simple()
    ))
}

fn conflict(doc: &Document, stored: Option<&Revision>) -> SyncError {
    SyncError::Conflict {
        id: doc.id().to_string(),
        expected: doc.rev().map(|r| r.to_string()),
        stored: stored.map(|r| r.to_string()),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&self, doc: &Document) -> Result<Revision, SyncError> {
        let key = doc.id().as_str().to_string();

        let record = match self.docs.entry(key) {
            Entry::Occupied(mut occupied) => {
                let (_, stored) = occupied.get();
                let stored_rev = stored.rev();
                // a tombstone may be recreated without naming its revision
                let accepted = doc.rev() == stored_rev || (stored.is_deleted() && doc.rev().is_none());
                if !accepted {
                    return Err(conflict(doc, stored_rev));
                }

                let mut saved = doc.clone();
                saved.set_rev(Some(next_revision(stored_rev)));
                let seq = self.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
                occupied.insert((seq, saved.clone()));
                ChangeRecord { seq, doc: saved }
            }
            Entry::Vacant(vacant) => {
                if doc.rev().is_some() {
                    return Err(conflict(doc, None));
                }

                let mut saved = doc.clone();
                saved.set_rev(Some(next_revision(None)));
                let seq = self.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
                vacant.insert((seq, saved.clone()));
                ChangeRecord { seq, doc: saved }
            }
        };

        debug!(id = %record.doc.id(), seq = record.seq, rev = ?record.doc.rev(), "Stored document");

        let rev = record
            .doc
            .rev()
            .cloned()
            .ok_or_else(|| SyncError::Backend("stored document lost its revision".into()))?;
        // no receivers is fine
        let _ = self.feed.send(record);
        Ok(rev)
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<Document>, SyncError> {
        Ok(self.docs.get(id.as_str()).map(|entry| entry.value().1.clone()))
    }

    async fn changes_since(&self, since: u64, limit: usize) -> Result<Vec<ChangeRecord>, SyncError> {
        let mut changes: Vec<ChangeRecord> = self
            .docs
            .iter()
            .filter(|entry| entry.value().0 > since)
            .map(|entry| {
                let (seq, doc) = entry.value();
                ChangeRecord {
                    seq: *seq,
                    doc: doc.clone(),
                }
            })
            .collect();

        changes.sort_by_key(|change| change.seq);
        changes.truncate(limit);
        Ok(changes)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeRecord> {
        self.feed.subscribe()
    }

    async fn stats(&self) -> Result<BackendStats, SyncError> {
        Ok(BackendStats {
            document_count: self.docs.len(),
            deleted_count: self.docs.iter().filter(|e| e.value().1.is_deleted()).count(),
            update_seq: self.update_seq.load(Ordering::SeqCst),
        })
    }
}
