//! Replicator - keeps a store and a backend in step

use crate::{Backend, ChangeRecord, SyncConfig, SyncError};
use memsync_core::{Acknowledgement, ReconciliationStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters from one push/pull round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Edits saved and acknowledged
    pub pushed: usize,
    /// Saved edits that had a newer local edit by the time they were acknowledged
    pub superseded: usize,
    /// Saves refused because the backend holds a different revision
    pub rejected: usize,
    /// Saves that failed for any other reason
    pub failed: usize,
    /// Changes fed into the store
    pub pulled: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.pushed += other.pushed;
        self.superseded += other.superseded;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.pulled += other.pulled;
    }
}

/// Connects a [`ReconciliationStore`] to a [`Backend`]
pub struct Replicator {
    store: ReconciliationStore,
    backend: Arc<dyn Backend>,
    config: SyncConfig,
    /// Highest backend update sequence already fed into the store
    last_seq: AtomicU64,
    /// Held while changes are fetched and fed into the store, so pulls and
    /// the live feed apply records one at a time in sequence order
    feed_lock: Mutex<()>,
}

impl Replicator {
    pub fn new(store: ReconciliationStore, backend: Arc<dyn Backend>) -> Self {
        Self::with_config(store, backend, SyncConfig::default())
    }

    pub fn with_config(store: ReconciliationStore, backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
        Self {
            store,
            backend,
            config,
            last_seq: AtomicU64::new(0),
            feed_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    /// Highest backend sequence seen so far
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Save outstanding local edits and acknowledge the ones that succeed.
    ///
    /// At most `batch_size` edits are sent per call, and always at least one.
    /// Each save is acknowledged with the token of the exact edit that was
    /// sent, so edits made while the save was in flight stay pending.
    pub async fn push(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let edits = self.store.local_edits();
        let batch = self.config.batch_size.max(1);
        debug!(pending = edits.len(), batch = batch, "Pushing local edits");

        for edit in edits.into_iter().take(batch) {
            let id = edit.doc.id().clone();

            match self.backend.put(&edit.doc).await {
                Ok(rev) => {
                    report.pushed += 1;
                    let outcome = self.store.update_from_edit(&id, Some(edit.token), Some(rev));
                    if outcome == Acknowledgement::Superseded {
                        report.superseded += 1;
                    }
                    debug!(id = %id, outcome = ?outcome, "Saved local edit");
                }
                Err(SyncError::Conflict { stored, .. }) => {
                    report.rejected += 1;
                    warn!(id = %id, stored = ?stored, "Save rejected, waiting for changes feed");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %id, error = %e, "Save failed, edit stays queued");
                }
            }
        }

        Ok(report)
    }

    /// Feed every backend change newer than [`last_seq`](Self::last_seq)
    /// into the store
    pub async fn pull(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let limit = self.config.pull_limit.max(1);
        let _feed = self.feed_lock.lock().await;

        loop {
            let changes = self.backend.changes_since(self.last_seq(), limit).await?;
            let count = changes.len();
            let mut applied = 0;

            for change in changes {
                if self.apply_change(change) {
                    applied += 1;
                }
            }
            report.pulled += applied;

            if count < limit || applied == 0 {
                break;
            }
        }

        debug!(pulled = report.pulled, last_seq = self.last_seq(), "Pulled changes");
        Ok(report)
    }

    /// Feed one record into the store unless a newer one was already
    /// applied. Callers hold `feed_lock`.
    fn apply_change(&self, change: ChangeRecord) -> bool {
        if change.seq <= self.last_seq() {
            debug!(id = %change.doc.id(), seq = change.seq, "Skipping already applied change");
            return false;
        }
        self.store.update(change.doc);
        self.last_seq.store(change.seq, Ordering::SeqCst);
        true
    }

    /// Push, then pull
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let mut report = self.push().await?;
        report.merge(self.pull().await?);
        info!(
            pushed = report.pushed,
            rejected = report.rejected,
            failed = report.failed,
            pulled = report.pulled,
            "Sync round complete"
        );
        Ok(report)
    }

    /// Follow the backend's live changes feed until it closes.
    ///
    /// Changes missed while lagging are recovered with a [`pull`](Self::pull).
    pub fn watch(self: &Arc<Self>) -> JoinHandle<()> {
        let replicator = self.clone();
        let mut feed = self.backend.subscribe();

        tokio::spawn(async move {
            if let Err(e) = replicator.pull().await {
                error!(error = %e, "Initial pull failed");
            }

            loop {
                match feed.recv().await {
                    Ok(change) => {
                        let _feed = replicator.feed_lock.lock().await;
                        replicator.apply_change(change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Changes feed lagged, catching up");
                        if let Err(e) = replicator.pull().await {
                            error!(error = %e, "Catch-up pull failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            debug!("Changes feed closed");
        })
    }
}
