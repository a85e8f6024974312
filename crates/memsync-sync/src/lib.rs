//! memsync Sync - backing store plumbing
//!
//! Drives the two external paths of a [`ReconciliationStore`]:
//! - Save path: push local edits to a [`Backend`] and acknowledge them
//! - Sync path: pull the backend changes feed into the store
//!
//! Failed saves stay queued as local edits; there is no retry policy here.
//!
//! [`ReconciliationStore`]: memsync_core::ReconciliationStore

pub mod config;
pub mod memory;
pub mod replicator;

use async_trait::async_trait;
use memsync_core::{Document, DocumentId, Revision};
use tokio::sync::broadcast;

/// Backing document store
#[async_trait]
pub trait Backend: Send + Sync {
    /// Save a document. The document's revision must match the stored one
    /// (or be absent for a new document); returns the newly assigned revision.
    async fn put(&self, doc: &Document) -> Result<Revision, SyncError>;

    /// Load the latest version of a document, including tombstones
    async fn get(&self, id: &DocumentId) -> Result<Option<Document>, SyncError>;

    /// Latest change per document with a sequence above `since`, in sequence order
    async fn changes_since(&self, since: u64, limit: usize) -> Result<Vec<ChangeRecord>, SyncError>;

    /// Live changes feed
    fn subscribe(&self) -> broadcast::Receiver<ChangeRecord>;

    /// Get backend statistics
    async fn stats(&self) -> Result<BackendStats, SyncError>;
}

/// One entry of the changes feed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub seq: u64,
    pub doc: Document,
}

/// Sync error types
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Document update conflict on {id}: expected revision {expected:?}, stored {stored:?}")]
    Conflict {
        id: String,
        expected: Option<String>,
        stored: Option<String>,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Core error: {0}")]
    Core(#[from] memsync_core::Error),
}

/// Backend statistics
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub document_count: usize,
    pub deleted_count: usize,
    pub update_seq: u64,
}

pub use config::SyncConfig;
pub use memory::MemoryBackend;
pub use replicator::{Replicator, SyncReport};
