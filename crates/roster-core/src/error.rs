use roster_storage::{OperationId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Some batches committed before one failed for good. Committed batches
    /// are not rolled back.
    #[error(
        "operation {operation_id} partially applied: \
         {committed_batches}/{total_batches} batches committed"
    )]
    PartialWrite {
        operation_id: OperationId,
        committed_batches: usize,
        total_batches: usize,
        #[source]
        source: StoreError,
    },

    #[error("cross-reference sweep failed: {0}")]
    CrossReferenceSweep(#[source] StoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Whether the error was raised before anything was written.
    pub fn is_pre_write(&self) -> bool {
        matches!(self, CoreError::NotFound { .. } | CoreError::Validation(_))
    }
}
