//! Basic memsync Example
//!
//! This example walks through the save path and the sync path of a
//! reconciliation store wired to an in-memory backend.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;

use memsync_core::{Document, DocumentId, ReconciliationStore};
use memsync_sync::{Backend, MemoryBackend, Replicator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("memsync Basic Example\n");

    let store = ReconciliationStore::new();
    let backend = Arc::new(MemoryBackend::new());
    let replicator = Replicator::new(store.clone(), backend.clone());

    let _subscription = store.subscribe(|change| {
        println!("  changed: {} ({:?})", change.id, change.cause);
    });

    // Example 1: local edit, then save
    println!("=== Save Path ===\n");
    let id = DocumentId::new("note:1")?;
    store.edit(Document::new(id.clone()).with_field("text", "hello"));
    println!("Pending edits: {}", store.local_edits().len());

    let report = replicator.sync().await?;
    println!("Sync: {:?}", report);
    println!("Pending edits: {}", store.local_edits().len());
    let saved = store.get(&id).ok_or("note vanished")?;
    println!("Saved revision: {:?}\n", saved.doc.rev());

    // Example 2: another client saves first, our edit now conflicts
    println!("=== Conflict ===\n");
    let base = saved.doc.rev().cloned();
    let mut theirs = Document::new(id.clone()).with_field("text", "theirs");
    theirs.set_rev(base.clone());
    backend.put(&theirs).await?;

    let mut ours = Document::new(id.clone()).with_field("text", "ours");
    ours.set_rev(base);
    store.edit(ours);

    let report = replicator.sync().await?;
    println!("Sync: {:?}", report);
    for doc in store.all_docs() {
        println!(
            "{} -> {} (conflicts with {})",
            doc.id(),
            serde_json::to_string(&doc.doc.to_json())?,
            doc.conflict
                .as_ref()
                .map(|c| c.to_json().to_string())
                .unwrap_or_else(|| "nothing".into())
        );
    }

    Ok(())
}
