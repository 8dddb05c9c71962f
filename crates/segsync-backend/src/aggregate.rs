#![forbid(unsafe_code)]

//! Upstream aggregation boundary.
//!
//! Statistics and point layout are computed outside this workspace. The
//! batch scheduler hands an [`Aggregator`] the prior splits plus the new
//! [`PointContribution`]s and receives every split back alongside its
//! [`SplitDiff`]. Nothing here recomputes statistics.

use segsync_core::{SessionId, Split, SplitDiff, SplitIndex, VizId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::VisualizationConfig;

/// One respondent's weighted contribution to a basis split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointContribution {
    pub respondent_id: u64,
    pub basis_split_index: SplitIndex,
    pub expanded_group_index: usize,
    pub weight: f64,
}

/// Everything an aggregator may need besides the splits themselves.
#[derive(Debug, Clone, Copy)]
pub struct AggregationContext<'a> {
    pub session_id: SessionId,
    pub viz_id: &'a VizId,
    pub config: &'a VisualizationConfig,
    pub viz_width: f64,
    pub viz_height: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("aggregation failed for visualization {viz}: {reason}")]
    Failed { viz: VizId, reason: String },
}

impl AggregationError {
    #[must_use]
    pub fn failed(viz: &VizId, reason: impl Into<String>) -> Self {
        Self::Failed {
            viz: viz.clone(),
            reason: reason.into(),
        }
    }
}

/// `recomputeSplits`: new splits and their diffs in one call.
///
/// The returned vector is the complete new split array, index-aligned with
/// the canonical state.
pub trait Aggregator {
    fn recompute_splits(
        &mut self,
        prior: &[Split],
        basis_split_indices: &[SplitIndex],
        contributions: &[PointContribution],
        ctx: &AggregationContext<'_>,
    ) -> Result<Vec<(Split, SplitDiff)>, AggregationError>;
}

impl<F> Aggregator for F
where
    F: FnMut(
        &[Split],
        &[SplitIndex],
        &[PointContribution],
        &AggregationContext<'_>,
    ) -> Result<Vec<(Split, SplitDiff)>, AggregationError>,
{
    fn recompute_splits(
        &mut self,
        prior: &[Split],
        basis_split_indices: &[SplitIndex],
        contributions: &[PointContribution],
        ctx: &AggregationContext<'_>,
    ) -> Result<Vec<(Split, SplitDiff)>, AggregationError> {
        self(prior, basis_split_indices, contributions, ctx)
    }
}
