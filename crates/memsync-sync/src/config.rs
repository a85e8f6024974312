//! Replication settings

use serde::{Deserialize, Serialize};

/// Tuning knobs for [`Replicator`](crate::Replicator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of local edits saved per push
    pub batch_size: usize,
    /// Maximum number of changes requested per changes-feed read
    pub pull_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pull_limit: 100,
        }
    }
}
