//! Edit-sequence counter and the tokens it hands out

use std::fmt;

/// Checkpoint on the store's edit timeline.
///
/// A token records the value of the edit-sequence counter when it was issued.
/// Tokens can only be compared with each other and handed back to the store
/// that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EditToken(u64);

impl EditToken {
    /// Position before any edit was ever recorded
    pub const ORIGIN: EditToken = EditToken(0);

    pub(crate) fn at(sequence: u64) -> Self {
        Self(sequence)
    }

    /// Whether an edit stamped with `sequence` happened after this checkpoint
    pub(crate) fn precedes(self, sequence: u64) -> bool {
        sequence > self.0
    }
}

impl Default for EditToken {
    fn default() -> Self {
        Self::ORIGIN
    }
}

impl fmt::Display for EditToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Monotonic edit-sequence counter. Only `edit` advances it.
#[derive(Debug, Default)]
pub(crate) struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    /// Allocate the next sequence value, moving "now" forward
    pub(crate) fn advance(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Token denoting "no edits recorded after this point"
    pub(crate) fn current(&self) -> EditToken {
        EditToken(self.last)
    }
}
