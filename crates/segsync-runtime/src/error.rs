use segsync_backend::{AggregationError, StoreError};
use segsync_core::{SessionId, SyncError, VizId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failure of one server-side operation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("visualization {viz} of session {session} is not awake")]
    NotAwake { session: SessionId, viz: VizId },
}

impl RuntimeError {
    /// Contract violations signal a caller bug rather than a transient failure.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}
