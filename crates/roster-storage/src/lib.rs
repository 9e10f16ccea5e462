//! Storage abstraction for roster.
//!
//! The membership engine never talks to a database directly. Backend crates
//! (e.g. `roster-store-memory`) implement [`EdgeStore`], a deliberately thin
//! partitioned key-value contract: point reads, partition queries with a
//! sort-key prefix, a handful of secondary indexes and size-bounded batch
//! writes. There are no joins, no foreign keys and no multi-item transactions;
//! everything graph-shaped is rebuilt on top of this in `roster-core`.

use thiserror::Error;

pub mod keys;
mod store;
mod types;

pub use keys::ItemKey;
pub use store::*;
pub use types::*;

/// Maximum number of write requests a single [`EdgeStore::batch_write`] call
/// accepts. Callers must chunk larger mutations.
pub const BATCH_LIMIT: usize = 25;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("batch contains duplicate key {0}")]
    DuplicateKey(ItemKey),
    #[error("backend error: {0}")]
    Backend(String),
}
