//! Reconciliation Store - merges source documents with pending local edits

use crate::document::{Document, DocumentId, Revision};
use crate::error::Result;
use crate::subscription::{dispatch, Change, ChangeCause, Subscribers, Subscription};
use crate::token::{EditToken, SequenceCounter};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// What the source layer knows about an id
#[derive(Debug, Clone)]
pub(crate) enum SourceEntry {
    /// A local edit exists but the source has never confirmed this id
    Absent,
    Known(Arc<Document>),
}

/// Pending local edit plus its bookkeeping
#[derive(Debug, Clone)]
struct EditEntry {
    document: Arc<Document>,
    edit_sequence: u64,
    /// Source version this edit disagrees with
    conflict: Option<Arc<Document>>,
}

/// Everything guarded by the store lock
#[derive(Default)]
pub(crate) struct StoreState {
    sources: BTreeMap<DocumentId, SourceEntry>,
    edits: HashMap<DocumentId, EditEntry>,
    counter: SequenceCounter,
    pub(crate) subscribers: Subscribers,
}

/// A document as currently visible, with its conflict marker if any
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleDoc {
    pub doc: Arc<Document>,
    /// Source version the visible edit disagrees with
    pub conflict: Option<Arc<Document>>,
}

impl VisibleDoc {
    pub fn id(&self) -> &DocumentId {
        self.doc.id()
    }

    pub fn in_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}

/// An outstanding local edit
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEdit {
    pub doc: Arc<Document>,
    /// Timeline position at which the edit was recorded. Acknowledging with
    /// this token absorbs exactly this edit and nothing newer.
    pub token: EditToken,
    pub conflict: Option<Arc<Document>>,
}

/// Outcome of [`ReconciliationStore::update_from_edit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The edit was promoted into the source layer
    Absorbed,
    /// A newer local edit exists and stays pending
    Superseded,
    /// Nothing was pending for the id
    NoOutstandingEdit,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub source_count: usize,
    pub edit_count: usize,
    pub conflict_count: usize,
    pub subscriber_count: usize,
}

/// Resolved state of one id, used to decide whether a mutation is visible
struct Resolved {
    doc: Option<Arc<Document>>,
    conflict: Option<Arc<Document>>,
}

fn same_doc(a: &Option<Arc<Document>>, b: &Option<Arc<Document>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
        _ => false,
    }
}

/// Whether a pending edit disagrees with a source version.
///
/// Edits without a revision never conflict (last edit wins).
fn disagrees(edit: &Document, source: &Document) -> bool {
    match edit.rev() {
        Some(rev) => source.rev() != Some(rev),
        None => false,
    }
}

impl StoreState {
    fn source(&self, id: &DocumentId) -> &SourceEntry {
        self.sources
            .get(id)
            .unwrap_or_else(|| panic!("edit for {id} has no source entry"))
    }

    fn visible(&self, id: &DocumentId) -> Option<VisibleDoc> {
        let visible = match self.edits.get(id) {
            Some(entry) => VisibleDoc {
                doc: entry.document.clone(),
                conflict: entry.conflict.clone(),
            },
            None => match self.sources.get(id)? {
                SourceEntry::Known(doc) => VisibleDoc {
                    doc: doc.clone(),
                    conflict: None,
                },
                SourceEntry::Absent => return None,
            },
        };

        (!visible.doc.is_deleted()).then_some(visible)
    }

    fn resolve(&self, id: &DocumentId) -> Resolved {
        Resolved {
            doc: self.visible(id).map(|v| v.doc),
            conflict: self.edits.get(id).and_then(|e| e.conflict.clone()),
        }
    }

    fn local_edits_since(&self, token: EditToken) -> Vec<LocalEdit> {
        let mut edits: Vec<LocalEdit> = self
            .edits
            .iter()
            .filter(|(_, entry)| token.precedes(entry.edit_sequence))
            .filter(|(id, entry)| {
                // created and deleted without the source ever hearing of it
                !(entry.document.is_deleted()
                    && matches!(self.source(id), SourceEntry::Absent))
            })
            .map(|(_, entry)| LocalEdit {
                doc: entry.document.clone(),
                token: EditToken::at(entry.edit_sequence),
                conflict: entry.conflict.clone(),
            })
            .collect();

        edits.sort_by_key(|edit| edit.token);
        edits
    }

    /// Panics if `id` has a pending edit but no source entry. Checked in
    /// every build after each mutation of `id`.
    fn assert_consistent(&self, id: &DocumentId) {
        assert!(
            !self.edits.contains_key(id) || self.sources.contains_key(id),
            "edit for {id} has no source entry"
        );
    }

    /// Replace the pending edit for `doc`'s id, clearing any conflict
    fn record_edit(&mut self, doc: Arc<Document>) -> Change {
        let id = doc.id().clone();
        self.sources.entry(id.clone()).or_insert(SourceEntry::Absent);

        let edit_sequence = self.counter.advance();
        let previous = self.edits.insert(
            id.clone(),
            EditEntry {
                document: doc,
                edit_sequence,
                conflict: None,
            },
        );

        debug!(
            id = %id,
            seq = edit_sequence,
            cleared_conflict = previous.is_some_and(|p| p.conflict.is_some()),
            "Recorded local edit"
        );

        Change {
            id,
            cause: ChangeCause::Edited,
            token: self.counter.current(),
        }
    }
}

/// In-memory store holding source documents and optimistic local edits.
///
/// All state sits behind one lock; each operation is a single critical
/// section. Subscribers are called after the lock is released but before
/// the mutating call returns, so they may read the store.
#[derive(Clone, Default)]
pub struct ReconciliationStore {
    state: Arc<Mutex<StoreState>>,
}

impl ReconciliationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a mutation of `id` under the lock, then notify subscribers if it
    /// produced a visible change.
    ///
    /// The subscriber list is copied while the lock is held, so the change
    /// goes to exactly the callbacks registered at that moment.
    fn mutate<R>(&self, id: &DocumentId, f: impl FnOnce(&mut StoreState) -> (R, Option<Change>)) -> R {
        let (result, pending) = {
            let mut guard = self.state.lock();
            let (result, change) = f(&mut *guard);
            guard.assert_consistent(id);
            let pending = change.map(|change| (guard.subscribers.snapshot(), change));
            (result, pending)
        };

        if let Some((callbacks, change)) = pending {
            dispatch(&callbacks, &change);
        }

        result
    }

    /// Record a locally proposed future state for `doc`'s id.
    ///
    /// Always notifies subscribers.
    pub fn edit(&self, doc: Document) -> Arc<Document> {
        let doc = Arc::new(doc);
        self.mutate(doc.id(), |state| {
            let change = state.record_edit(doc.clone());
            (doc.clone(), Some(change))
        })
    }

    /// Record a local deletion of whatever is visible for `id`.
    ///
    /// The tombstone carries the visible document's revision, so saving it
    /// deletes exactly the version the caller saw. Returns the tombstone, or
    /// `None` without notifying when nothing is visible.
    pub fn delete(&self, id: &DocumentId) -> Option<Arc<Document>> {
        self.mutate(id, |state| {
            let Some(visible) = state.visible(id) else {
                debug!(id = %id, "Nothing visible to delete");
                return (None, None);
            };

            let tombstone = Arc::new(Document::tombstone(id.clone(), visible.doc.rev().cloned()));
            let change = state.record_edit(tombstone.clone());
            (Some(tombstone), Some(change))
        })
    }

    /// Record a local edit from raw JSON, generating an `_id` for brand-new
    /// documents that lack one
    pub fn edit_json(&self, value: serde_json::Value) -> Result<Arc<Document>> {
        let doc = Document::from_json_or_generate(value)?;
        Ok(self.edit(doc))
    }

    /// Replace the source version of `doc`'s id with what the backing store
    /// reports.
    ///
    /// Notifies only when the visible document or its conflict marker changed.
    pub fn update(&self, doc: Document) {
        let doc = Arc::new(doc);

        self.mutate(doc.id(), |state| {
            let id = doc.id().clone();
            let before = state.resolve(&id);

            state
                .sources
                .insert(id.clone(), SourceEntry::Known(doc.clone()));

            if let Some(entry) = state.edits.get_mut(&id) {
                if disagrees(&entry.document, &doc) {
                    info!(
                        id = %id,
                        edit_rev = ?entry.document.rev(),
                        source_rev = ?doc.rev(),
                        "Source update conflicts with pending edit"
                    );
                    entry.conflict = Some(doc.clone());
                } else {
                    entry.conflict = None;
                }
            }

            let after = state.resolve(&id);
            let cause = if !same_doc(&before.conflict, &after.conflict) {
                Some(match after.conflict {
                    Some(_) => ChangeCause::ConflictChanged,
                    None => ChangeCause::ConflictCleared,
                })
            } else if !same_doc(&before.doc, &after.doc) {
                Some(ChangeCause::Updated)
            } else {
                None
            };

            debug!(id = %id, rev = ?doc.rev(), visible_change = ?cause, "Applied source update");

            let change = cause.map(|cause| Change {
                id,
                cause,
                token: state.counter.current(),
            });
            ((), change)
        })
    }

    /// Apply a source update from raw JSON. The object must carry an `_id`.
    pub fn update_json(&self, value: serde_json::Value) -> Result<()> {
        let doc = Document::from_json(value)?;
        self.update(doc);
        Ok(())
    }

    /// Acknowledge that the edit outstanding as of `token` (default: now) was
    /// accepted by the source, optionally with the revision it was assigned.
    ///
    /// Only notifies when the acknowledgement clears a standing conflict.
    pub fn update_from_edit(
        &self,
        id: &DocumentId,
        token: Option<EditToken>,
        revision: Option<Revision>,
    ) -> Acknowledgement {
        self.mutate(id, |state| {
            let token = token.unwrap_or_else(|| state.counter.current());

            let Entry::Occupied(mut occupied) = state.edits.entry(id.clone()) else {
                debug!(id = %id, "Acknowledgement without outstanding edit ignored");
                return (Acknowledgement::NoOutstandingEdit, None);
            };

            let entry = occupied.get_mut();
            if let Some(rev) = revision {
                let mut revised = (*entry.document).clone();
                revised.set_rev(Some(rev));
                entry.document = Arc::new(revised);
            }
            let had_conflict = entry.conflict.is_some();

            let (outcome, cleared) = if !token.precedes(entry.edit_sequence) {
                let entry = occupied.remove();
                state
                    .sources
                    .insert(id.clone(), SourceEntry::Known(entry.document));
                (Acknowledgement::Absorbed, had_conflict)
            } else {
                let source = state
                    .sources
                    .get_mut(id)
                    .unwrap_or_else(|| panic!("edit for {id} has no source entry"));
                if matches!(source, SourceEntry::Absent) {
                    *source = SourceEntry::Known(Arc::new(Document::new(id.clone())));
                }

                let agrees = match &*source {
                    SourceEntry::Known(src) => !disagrees(&entry.document, src),
                    SourceEntry::Absent => false,
                };
                let cleared = had_conflict && agrees;
                if cleared {
                    entry.conflict = None;
                }
                (Acknowledgement::Superseded, cleared)
            };

            debug!(id = %id, token = %token, outcome = ?outcome, cleared_conflict = cleared, "Acknowledged edit");

            let change = cleared.then(|| Change {
                id: id.clone(),
                cause: ChangeCause::ConflictCleared,
                token: state.counter.current(),
            });
            (outcome, change)
        })
    }

    /// Snapshot of every visible document, in id order.
    ///
    /// The returned vector is detached from the store: later mutations do
    /// not affect it and it can be iterated any number of times.
    pub fn all_docs(&self) -> Vec<VisibleDoc> {
        let state = self.state.lock();
        state
            .sources
            .keys()
            .filter_map(|id| state.visible(id))
            .collect()
    }

    /// The visible document for a single id
    pub fn get(&self, id: &DocumentId) -> Option<VisibleDoc> {
        self.state.lock().visible(id)
    }

    /// Snapshot of all outstanding local edits, oldest first
    pub fn local_edits(&self) -> Vec<LocalEdit> {
        self.local_edits_since(EditToken::ORIGIN)
    }

    /// Snapshot of local edits recorded after `token`, oldest first
    pub fn local_edits_since(&self, token: EditToken) -> Vec<LocalEdit> {
        self.state.lock().local_edits_since(token)
    }

    /// Pending edits that currently disagree with their source version
    pub fn conflicts(&self) -> Vec<LocalEdit> {
        self.local_edits()
            .into_iter()
            .filter(|edit| edit.conflict.is_some())
            .collect()
    }

    /// Token denoting "now" on the edit timeline
    pub fn current_token(&self) -> EditToken {
        self.state.lock().counter.current()
    }

    /// Register a callback fired on every visible-state change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let id = self.state.lock().subscribers.add(Arc::new(callback));
        debug!(subscriber = id, "Subscriber registered");
        Subscription::new(id, Arc::downgrade(&self.state))
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            source_count: state.sources.len(),
            edit_count: state.edits.len(),
            conflict_count: state.edits.values().filter(|e| e.conflict.is_some()).count(),
            subscriber_count: state.subscribers.len(),
        }
    }
}

impl std::fmt::Debug for ReconciliationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationStore")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s).unwrap()
    }

    fn doc(s: &str) -> Document {
        Document::new(id(s))
    }

    /// Collects every change delivered to a subscriber
    fn recorder(store: &ReconciliationStore) -> (Arc<Mutex<Vec<Change>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.subscribe(move |change| sink.lock().push(change.clone()));
        (seen, sub)
    }

    fn ids(docs: &[VisibleDoc]) -> Vec<&str> {
        docs.iter().map(|d| d.id().as_str()).collect()
    }

    #[test]
    fn test_edit_round_trip_keeps_identity() {
        let store = ReconciliationStore::new();
        let edited = store.edit(doc("A").with_field("value", 1));

        let all = store.all_docs();
        assert_eq!(all.len(), 1);
        assert!(Arc::ptr_eq(&all[0].doc, &edited));
        assert!(!all[0].in_conflict());
    }

    #[test]
    fn test_update_shadowed_by_matching_edit() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1").with_field("value", 0));
        let edit = store.edit(doc("A").with_rev("1").with_field("value", 1));

        let (seen, _sub) = recorder(&store);
        store.update(doc("A").with_rev("1").with_field("value", 0));

        let visible = store.get(&id("A")).unwrap();
        assert!(Arc::ptr_eq(&visible.doc, &edit));
        assert!(visible.conflict.is_none());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_update_with_other_revision_marks_conflict() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1").with_field("value", 0));
        store.edit(doc("A").with_rev("1").with_field("value", 2));

        let (seen, _sub) = recorder(&store);
        store.update(doc("A").with_rev("2").with_field("value", 42));

        let visible = store.get(&id("A")).unwrap();
        assert_eq!(visible.doc.get("value"), Some(&json!(2)));
        let conflict = visible.conflict.unwrap();
        assert_eq!(conflict.rev(), Some(&Revision::from("2")));
        assert_eq!(conflict.get("value"), Some(&json!(42)));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].cause, ChangeCause::ConflictChanged);
        assert_eq!(store.stats().conflict_count, 1);
    }

    #[test]
    fn test_edit_without_revision_never_conflicts() {
        let store = ReconciliationStore::new();
        store.edit(doc("A").with_field("value", 1));
        store.update(doc("A").with_rev("7"));

        assert!(!store.get(&id("A")).unwrap().in_conflict());
    }

    #[test]
    fn test_fresh_edit_clears_conflict() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1"));
        store.edit(doc("A").with_rev("1"));
        store.update(doc("A").with_rev("2"));
        assert!(store.get(&id("A")).unwrap().in_conflict());

        store.edit(doc("A").with_rev("2").with_field("merged", true));
        assert!(!store.get(&id("A")).unwrap().in_conflict());
        assert!(store.conflicts().is_empty());
    }

    #[test]
    fn test_matching_update_clears_conflict() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1"));
        store.edit(doc("A").with_rev("1"));
        store.update(doc("A").with_rev("2"));

        let (seen, _sub) = recorder(&store);
        store.update(doc("A").with_rev("1"));

        assert!(!store.get(&id("A")).unwrap().in_conflict());
        assert_eq!(seen.lock()[0].cause, ChangeCause::ConflictCleared);
    }

    #[test]
    fn test_newer_disagreeing_update_replaces_conflict() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1"));
        store.edit(doc("A").with_rev("1").with_field("value", 1));
        store.update(doc("A").with_rev("2").with_field("value", 2));

        let (seen, _sub) = recorder(&store);
        store.update(doc("A").with_rev("3").with_field("value", 3));

        let conflict = store.get(&id("A")).unwrap().conflict.unwrap();
        assert_eq!(conflict.rev(), Some(&Revision::from("3")));
        assert_eq!(conflict.get("value"), Some(&json!(3)));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].cause, ChangeCause::ConflictChanged);
        assert_eq!(store.conflicts().len(), 1);
    }

    #[test]
    fn test_acknowledgement_absorbs_edit() {
        let store = ReconciliationStore::new();
        store.edit(doc("A").with_field("value", 1));
        let token = store.current_token();

        let outcome = store.update_from_edit(&id("A"), Some(token), Some("1-x".into()));

        assert_eq!(outcome, Acknowledgement::Absorbed);
        assert!(store.local_edits().is_empty());
        let visible = store.get(&id("A")).unwrap();
        assert_eq!(visible.doc.rev(), Some(&Revision::from("1-x")));
        assert_eq!(visible.doc.get("value"), Some(&json!(1)));
        assert_eq!(store.stats().edit_count, 0);
    }

    #[test]
    fn test_acknowledgement_defaults_to_current_token() {
        let store = ReconciliationStore::new();
        store.edit(doc("A"));
        store.edit(doc("A").with_field("second", true));

        assert_eq!(store.update_from_edit(&id("A"), None, None), Acknowledgement::Absorbed);
        assert!(store.local_edits().is_empty());
    }

    #[test]
    fn test_late_acknowledgement_keeps_newer_edit() {
        let store = ReconciliationStore::new();
        store.edit(doc("A").with_field("value", 1));
        let token = store.current_token();
        let newer = store.edit(doc("A").with_field("value", 2));

        let outcome = store.update_from_edit(&id("A"), Some(token), Some("1-x".into()));

        assert_eq!(outcome, Acknowledgement::Superseded);
        let pending = store.local_edits_since(token);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].doc.get("value"), newer.get("value"));
        assert_eq!(pending[0].doc.rev(), Some(&Revision::from("1-x")));
    }

    #[test]
    fn test_acknowledgement_without_edit_is_noop() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1"));
        let (seen, _sub) = recorder(&store);

        let outcome = store.update_from_edit(&id("A"), None, Some("2".into()));
        assert_eq!(outcome, Acknowledgement::NoOutstandingEdit);
        assert_eq!(store.get(&id("A")).unwrap().doc.rev(), Some(&Revision::from("1")));
        assert_eq!(
            store.update_from_edit(&id("missing"), None, None),
            Acknowledgement::NoOutstandingEdit
        );
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_acknowledgement_is_silent_unless_conflict_cleared() {
        let store = ReconciliationStore::new();
        store.edit(doc("A"));
        let (seen, _sub) = recorder(&store);

        store.update_from_edit(&id("A"), None, Some("1".into()));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_absorbing_acknowledgement_clears_conflict() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1"));
        store.edit(doc("A").with_rev("1").with_field("value", 1));
        let token = store.current_token();
        // the changes feed reports our own save before the save call returns
        store.update(doc("A").with_rev("2").with_field("value", 1));
        assert!(store.get(&id("A")).unwrap().in_conflict());

        let (seen, _sub) = recorder(&store);
        store.update_from_edit(&id("A"), Some(token), Some("2".into()));

        assert!(!store.get(&id("A")).unwrap().in_conflict());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].cause, ChangeCause::ConflictCleared);
    }

    #[test]
    fn test_superseded_acknowledgement_clears_agreeing_conflict() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1"));
        store.edit(doc("A").with_rev("1"));
        let token = store.current_token();
        store.edit(doc("A").with_rev("1").with_field("more", true));
        store.update(doc("A").with_rev("2"));
        assert!(store.get(&id("A")).unwrap().in_conflict());

        let (seen, _sub) = recorder(&store);
        let outcome = store.update_from_edit(&id("A"), Some(token), Some("2".into()));

        assert_eq!(outcome, Acknowledgement::Superseded);
        assert!(!store.get(&id("A")).unwrap().in_conflict());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_local_only_deletion_is_exempt() {
        let store = ReconciliationStore::new();
        store.edit(doc("X"));
        store.edit(doc("X").with_deleted(true));

        assert!(store.local_edits().is_empty());
        assert!(store.all_docs().is_empty());
    }

    #[test]
    fn test_deletion_after_acknowledgement_is_surfaced() {
        let store = ReconciliationStore::new();
        store.edit(doc("X"));
        let token = store.current_token();
        store.edit(doc("X").with_field("v", 2));
        store.update_from_edit(&id("X"), Some(token), Some("1".into()));
        store.edit(doc("X").with_deleted(true));

        let pending = store.local_edits();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].doc.is_deleted());
        assert!(store.all_docs().is_empty());
    }

    #[test]
    fn test_deletion_of_known_source_doc_is_surfaced() {
        let store = ReconciliationStore::new();
        store.update(doc("X").with_rev("1"));
        store.edit(Document::tombstone(id("X"), Some("1".into())));

        assert_eq!(store.local_edits().len(), 1);
        assert!(store.get(&id("X")).is_none());
    }

    #[test]
    fn test_delete_records_tombstone_at_visible_revision() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("3-a").with_field("v", 1));

        let (seen, _sub) = recorder(&store);
        let tombstone = store.delete(&id("A")).unwrap();

        assert!(tombstone.is_deleted());
        assert_eq!(tombstone.rev(), Some(&Revision::from("3-a")));
        assert!(store.get(&id("A")).is_none());
        let edits = store.local_edits();
        assert_eq!(edits.len(), 1);
        assert!(Arc::ptr_eq(&edits[0].doc, &tombstone));
        assert_eq!(seen.lock()[0].cause, ChangeCause::Edited);
    }

    #[test]
    fn test_delete_of_invisible_id_is_noop() {
        let store = ReconciliationStore::new();
        store.update(Document::tombstone(id("gone"), Some("2".into())));
        let (seen, _sub) = recorder(&store);

        assert!(store.delete(&id("never")).is_none());
        assert!(store.delete(&id("gone")).is_none());
        assert!(seen.lock().is_empty());
        assert_eq!(store.current_token(), EditToken::ORIGIN);
        assert_eq!(store.stats().source_count, 1);
    }

    #[test]
    fn test_delete_of_local_only_edit_is_exempt() {
        let store = ReconciliationStore::new();
        store.edit(doc("draft"));

        let tombstone = store.delete(&id("draft")).unwrap();
        assert_eq!(tombstone.rev(), None);
        assert!(store.local_edits().is_empty());
    }

    #[test]
    fn test_updates_never_advance_token() {
        let store = ReconciliationStore::new();
        let before = store.current_token();
        store.update(doc("A").with_rev("1"));
        assert_eq!(store.current_token(), before);

        store.edit(doc("A"));
        let after_edit = store.current_token();
        assert!(after_edit > before);

        store.update_from_edit(&id("A"), None, Some("2".into()));
        assert_eq!(store.current_token(), after_edit);
    }

    #[test]
    fn test_local_edits_since_token() {
        let store = ReconciliationStore::new();
        store.edit(doc("A"));
        let token = store.current_token();
        store.edit(doc("B"));
        store.edit(doc("C"));

        let since: Vec<_> = store
            .local_edits_since(token)
            .iter()
            .map(|e| e.doc.id().to_string())
            .collect();
        assert_eq!(since, vec!["B", "C"]);
        assert_eq!(store.local_edits().len(), 3);
        assert!(store.local_edits_since(store.current_token()).is_empty());
    }

    #[test]
    fn test_local_edit_token_absorbs_only_that_edit() {
        let store = ReconciliationStore::new();
        store.edit(doc("A"));
        let first = store.local_edits()[0].token;
        store.edit(doc("A").with_field("v", 2));

        assert_eq!(
            store.update_from_edit(&id("A"), Some(first), None),
            Acknowledgement::Superseded
        );
        let latest = store.local_edits()[0].token;
        assert_eq!(
            store.update_from_edit(&id("A"), Some(latest), None),
            Acknowledgement::Absorbed
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let store = ReconciliationStore::new();
        let (first, sub) = recorder(&store);
        let (second, _keep) = recorder(&store);

        sub.unsubscribe();
        sub.unsubscribe();
        store.edit(doc("A"));

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
        assert_eq!(store.stats().subscriber_count, 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_applies_to_next_change() {
        let store = ReconciliationStore::new();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let handle = victim.clone();
        let _first = store.subscribe(move |_| {
            if let Some(sub) = handle.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        let (second, sub) = recorder(&store);
        *victim.lock() = Some(sub);

        store.edit(doc("A"));
        store.edit(doc("B"));

        let second = second.lock();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id("A"));
        assert_eq!(store.stats().subscriber_count, 1);
    }

    #[test]
    fn test_unsubscribe_after_store_dropped() {
        let store = ReconciliationStore::new();
        let sub = store.subscribe(|_| {});
        drop(store);
        sub.unsubscribe();
    }

    #[test]
    fn test_edit_always_notifies() {
        let store = ReconciliationStore::new();
        let (seen, _sub) = recorder(&store);
        store.edit(doc("A"));
        store.edit(doc("A"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|c| c.cause == ChangeCause::Edited && c.id == id("A")));
        assert!(seen[1].token > seen[0].token);
    }

    #[test]
    fn test_duplicate_update_notifies_once() {
        let store = ReconciliationStore::new();
        let (seen, _sub) = recorder(&store);
        store.update(doc("A").with_rev("1").with_field("v", 1));
        store.update(doc("A").with_rev("1").with_field("v", 1));
        store.update(doc("A").with_rev("2").with_field("v", 2));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|c| c.cause == ChangeCause::Updated));
    }

    #[test]
    fn test_update_of_invisible_tombstone_is_silent() {
        let store = ReconciliationStore::new();
        store.update(Document::tombstone(id("A"), Some("1".into())));
        let (seen, _sub) = recorder(&store);
        store.update(Document::tombstone(id("A"), Some("2".into())));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_subscriber_can_read_store() {
        let store = ReconciliationStore::new();
        let reader = store.clone();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let _sub = store.subscribe(move |_| sink.lock().push(reader.all_docs().len()));

        store.edit(doc("A"));
        store.edit(doc("B"));
        assert_eq!(*counts.lock(), vec![1, 2]);
    }

    #[test]
    fn test_all_docs_snapshot_ignores_later_mutations() {
        let store = ReconciliationStore::new();
        store.update(doc("A").with_rev("1").with_field("value", 0));
        store.edit(doc("A").with_rev("1").with_field("value", 3));

        let snapshot = store.all_docs();
        store.edit(doc("B").with_field("value", true));

        assert_eq!(ids(&snapshot), vec!["A"]);
        assert_eq!(ids(&snapshot), ids(&snapshot.clone()));
        assert_eq!(ids(&store.all_docs()), vec!["A", "B"]);
    }

    #[test]
    fn test_all_docs_is_ordered_and_skips_deleted() {
        let store = ReconciliationStore::new();
        store.update(doc("c"));
        store.update(doc("a"));
        store.update(Document::tombstone(id("b"), None));
        store.edit(doc("d"));

        assert_eq!(ids(&store.all_docs()), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_json_entry_points() {
        let store = ReconciliationStore::new();
        let created = store.edit_json(json!({"title": "untitled"})).unwrap();
        assert!(store.get(created.id()).is_some());

        assert!(matches!(
            store.update_json(json!({"title": "no id"})),
            Err(Error::InvalidDocument(_))
        ));
        store.update_json(json!({"_id": "A", "_rev": "1"})).unwrap();
        assert_eq!(store.stats().source_count, 2);
    }
}
