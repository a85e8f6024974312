//! Scenario scripts - one JSON operation per line

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use memsync_core::{Document, DocumentId, EditToken, LocalEdit, ReconciliationStore, Revision, VisibleDoc};
use memsync_sync::{Backend, MemoryBackend, Replicator, SyncConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// A single scripted operation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Local edit; an `_id` is generated when missing
    Edit { doc: Value },
    /// Local deletion of whatever is visible for `id`
    Delete { id: String },
    /// Source update, as a changes feed would report it
    Update { doc: Value },
    /// Save straight into the backend, as another client would
    Remote { doc: Value },
    /// Acknowledge a save of `id` as of a named checkpoint (default: now)
    Ack {
        id: String,
        #[serde(default)]
        checkpoint: Option<String>,
        #[serde(default)]
        rev: Option<String>,
    },
    /// Remember the current edit token under a name
    Checkpoint { name: String },
    Push,
    Pull,
    Sync,
    /// Print visible documents and local edits since a checkpoint
    Show {
        #[serde(default)]
        since: Option<String>,
    },
}

impl Op {
    /// Parse one script line. Blank lines and `#` comments yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let op = serde_json::from_str(line).with_context(|| format!("Invalid operation: {line}"))?;
        Ok(Some(op))
    }
}

fn visible_json(visible: &VisibleDoc) -> Value {
    let mut doc = visible.doc.to_json();
    if let (Some(conflict), Value::Object(obj)) = (&visible.conflict, &mut doc) {
        obj.insert("_conflict".into(), conflict.to_json());
    }
    doc
}

fn local_edit_json(edit: &LocalEdit) -> Value {
    json!({
        "token": edit.token.to_string(),
        "doc": edit.doc.to_json(),
        "conflict": edit.conflict.as_ref().map(|c| c.to_json()),
    })
}

/// Executes operations against a store wired to an in-memory backend
pub struct Runner {
    store: ReconciliationStore,
    backend: Arc<MemoryBackend>,
    replicator: Replicator,
    checkpoints: HashMap<String, EditToken>,
}

impl Runner {
    pub fn new(config: SyncConfig) -> Self {
        let store = ReconciliationStore::new();
        let backend = Arc::new(MemoryBackend::new());
        let replicator = Replicator::with_config(store.clone(), backend.clone(), config);

        Self {
            store,
            backend,
            replicator,
            checkpoints: HashMap::new(),
        }
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    fn checkpoint(&self, name: Option<&str>) -> Result<Option<EditToken>> {
        name.map(|name| {
            self.checkpoints
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("Unknown checkpoint: {name}"))
        })
        .transpose()
    }

    /// Apply one operation, returning output to print if it produces any
    pub async fn apply(&mut self, op: Op) -> Result<Option<Value>> {
        debug!(op = ?op, "Applying operation");

        match op {
            Op::Edit { doc } => {
                let doc = self.store.edit_json(doc)?;
                info!(id = %doc.id(), token = %self.store.current_token(), "Edited");
                Ok(None)
            }
            Op::Delete { id } => {
                let id = DocumentId::new(id)?;
                let deleted = self.store.delete(&id).is_some();
                Ok(Some(json!({ "id": id.as_str(), "deleted": deleted })))
            }
            Op::Update { doc } => {
                self.store.update_json(doc)?;
                Ok(None)
            }
            Op::Remote { doc } => {
                let doc = Document::from_json(doc)?;
                let rev = self.backend.put(&doc).await?;
                info!(id = %doc.id(), rev = %rev, "Remote save");
                Ok(None)
            }
            Op::Ack { id, checkpoint, rev } => {
                let id = DocumentId::new(id)?;
                let token = self.checkpoint(checkpoint.as_deref())?;
                let outcome = self.store.update_from_edit(&id, token, rev.map(Revision::new));
                Ok(Some(json!({ "id": id.as_str(), "ack": format!("{outcome:?}") })))
            }
            Op::Checkpoint { name } => {
                let token = self.store.current_token();
                self.checkpoints.insert(name.clone(), token);
                Ok(Some(json!({ "checkpoint": name, "token": token.to_string() })))
            }
            Op::Push => Ok(Some(report_json(self.replicator.push().await?))),
            Op::Pull => Ok(Some(report_json(self.replicator.pull().await?))),
            Op::Sync => Ok(Some(report_json(self.replicator.sync().await?))),
            Op::Show { since } => {
                let since = self.checkpoint(since.as_deref())?.unwrap_or(EditToken::ORIGIN);
                let docs: Vec<Value> = self.store.all_docs().iter().map(visible_json).collect();
                let edits: Vec<Value> = self
                    .store
                    .local_edits_since(since)
                    .iter()
                    .map(local_edit_json)
                    .collect();

                Ok(Some(json!({
                    "token": self.store.current_token().to_string(),
                    "docs": docs,
                    "local_edits": edits,
                })))
            }
        }
    }
}

fn report_json(report: memsync_sync::SyncReport) -> Value {
    json!({
        "pushed": report.pushed,
        "superseded": report.superseded,
        "rejected": report.rejected,
        "failed": report.failed,
        "pulled": report.pulled,
    })
}
