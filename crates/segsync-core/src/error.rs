//! Contract-violation errors for the state model and projection layer.
//!
//! Everything in here signals a caller bug (an unresolvable view id, a split
//! index outside the canonical array, a visualization nobody loaded). These
//! are propagated with `?` and never retried.

use thiserror::Error;

use crate::model::{SplitIndex, ViewId, VizId};

/// Result alias for fallible operations in `segsync-core`.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("view id `{0}` is not present in the view maps")]
    InvalidViewId(ViewId),

    #[error("view id `{0}` resolves to an empty split list")]
    EmptyView(ViewId),

    #[error("split index {index} out of range (state has {len} splits)")]
    SplitOutOfRange { index: SplitIndex, len: usize },

    #[error("visualization {0} is not loaded")]
    UnknownVisualization(VizId),

    #[error("session is closed; no further actions are accepted")]
    SessionClosed,
}

impl SyncError {
    /// Whether this error names a view that the caller should never have
    /// produced (as opposed to a missing runtime entity).
    #[must_use]
    pub fn is_view_error(&self) -> bool {
        matches!(self, Self::InvalidViewId(_) | Self::EmptyView(_))
    }
}
