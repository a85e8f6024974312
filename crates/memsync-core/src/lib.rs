//! memsync Core - optimistic reconciliation store
//!
//! This crate provides the in-memory layer between an application and a
//! backing document store:
//! - Source and edit layers keyed by document identifier
//! - Revision-based conflict detection between pending edits and the source
//! - Edit tokens for "what changed locally since checkpoint T" queries
//! - Subscriptions that fire only when the visible state changes

pub mod document;
pub mod error;
pub mod store;
pub mod subscription;
pub mod token;

pub use document::{Document, DocumentId, Revision};
pub use error::{Error, Result};
pub use store::{Acknowledgement, LocalEdit, ReconciliationStore, StoreStats, VisibleDoc};
pub use subscription::{Change, ChangeCause, Subscription};
pub use token::EditToken;
