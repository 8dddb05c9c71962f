#![forbid(unsafe_code)]

//! Response batching.
//!
//! Accepting answers is a queue append; aggregation runs on a fixed tick.
//! Each tick swaps the whole queue for an empty one before touching it, so
//! responses that arrive while a batch is being processed land in the next
//! batch instead of racing the current one.
//!
//! Per `(session, visualization)` pair a tick:
//!
//! 1. wakes the session through the cache,
//! 2. transforms raw answers into [`PointContribution`]s (failures are
//!    logged and skipped),
//! 3. asks the [`Aggregator`] for the new splits and their diffs,
//! 4. writes them back with [`VisualizationCache::update_visualization`],
//! 5. broadcasts a [`PushEvent::Update`].
//!
//! A failing pair is reported and the batch moves on.
//!
//! [`PointContribution`]: segsync_backend::PointContribution

use std::collections::BTreeMap;
use std::time::Duration;

use segsync_backend::{
    AggregationContext, Aggregator, Broadcaster, Clock, PushEvent, StateStore, VisualizationUpdate,
};
use segsync_core::{SessionId, Split, SplitDiff, SyncError, VizId};
use tracing::{debug, error, info, info_span, warn};

use crate::cache::VisualizationCache;
use crate::config::BatchConfig;
use crate::error::{Result, RuntimeError};
use crate::transform::{RespondentAnswers, ResponseTransformer};

type Queue = BTreeMap<SessionId, BTreeMap<VizId, Vec<RespondentAnswers>>>;

/// Monitoring snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Sessions with at least one queued response.
    pub sessions: usize,
    pub pairs: usize,
    pub queued_responses: usize,
    pub batches_processed: u64,
    pub pairs_processed: u64,
    pub failed_pairs: u64,
    /// Responses dropped by the per-pair cap.
    pub dropped_responses: u64,
    /// Responses that failed to transform.
    pub rejected_responses: u64,
}

/// A pair that was recomputed and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairUpdate {
    pub session_id: SessionId,
    pub viz_id: VizId,
    /// Responses that made it into the recomputation.
    pub responses: usize,
    pub sequence_number: u64,
}

/// A pair whose processing failed.
#[derive(Debug)]
pub struct PairFailure {
    pub session_id: SessionId,
    pub viz_id: VizId,
    pub error: RuntimeError,
}

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub updated: Vec<PairUpdate>,
    pub failed: Vec<PairFailure>,
    /// Responses skipped because they failed to transform.
    pub rejected_responses: usize,
}

impl BatchReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.failed.is_empty() && self.rejected_responses == 0
    }
}

#[derive(Debug, Default)]
struct Counters {
    batches_processed: u64,
    pairs_processed: u64,
    failed_pairs: u64,
    dropped_responses: u64,
    rejected_responses: u64,
}

enum PairOutcome {
    Updated(PairUpdate),
    NothingToApply,
}

/// Queues responses and processes them on a fixed interval.
#[derive(Debug)]
pub struct BatchScheduler {
    interval: Duration,
    max_per_pair: usize,
    queue: Queue,
    next_tick: Duration,
    counters: Counters,
}

impl BatchScheduler {
    /// First tick fires one interval after `start`.
    #[must_use]
    pub fn new(config: &BatchConfig, start: Duration) -> Self {
        let interval = config.interval().max(Duration::from_millis(1));
        Self {
            interval,
            max_per_pair: config.max_responses_per_pair,
            queue: Queue::new(),
            next_tick: start + interval,
            counters: Counters::default(),
        }
    }

    /// Append `responses` to the queue of every visualization in `viz_ids`.
    ///
    /// Never aggregates. With a per-pair cap configured, the oldest queued
    /// responses are dropped to make room.
    pub fn queue_responses(
        &mut self,
        session: SessionId,
        viz_ids: &[VizId],
        responses: &[RespondentAnswers],
    ) {
        if viz_ids.is_empty() || responses.is_empty() {
            return;
        }
        let per_viz = self.queue.entry(session).or_default();
        for viz in viz_ids {
            let pending = per_viz.entry(viz.clone()).or_default();
            pending.extend_from_slice(responses);
            if self.max_per_pair > 0 && pending.len() > self.max_per_pair {
                let excess = pending.len() - self.max_per_pair;
                pending.drain(..excess);
                self.counters.dropped_responses += excess as u64;
                warn!(
                    session_id = %session,
                    viz_id = %viz,
                    dropped = excess,
                    cap = self.max_per_pair,
                    "response queue over capacity; dropped oldest"
                );
            }
        }
        debug!(
            session_id = %session,
            visualizations = viz_ids.len(),
            responses = responses.len(),
            "queued responses"
        );
    }

    /// Whether a tick is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: Duration) -> bool {
        now >= self.next_tick
    }

    #[must_use]
    pub fn next_tick(&self) -> Duration {
        self.next_tick
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a tick if one is due at `now`.
    ///
    /// Missed ticks collapse into one; the next tick stays aligned to the
    /// interval grid.
    pub fn poll<S, C, A, B>(
        &mut self,
        now: Duration,
        cache: &mut VisualizationCache<S, C>,
        aggregator: &mut A,
        broadcaster: &mut B,
    ) -> Option<BatchReport>
    where
        S: StateStore,
        C: Clock,
        A: Aggregator,
        B: Broadcaster,
    {
        if !self.is_due(now) {
            return None;
        }
        while self.next_tick <= now {
            self.next_tick += self.interval;
        }
        Some(self.force_process_batch(cache, aggregator, broadcaster))
    }

    /// Process everything queued right now, bypassing the timer.
    ///
    /// Runs the same path as a timer tick but leaves the tick schedule alone.
    pub fn force_process_batch<S, C, A, B>(
        &mut self,
        cache: &mut VisualizationCache<S, C>,
        aggregator: &mut A,
        broadcaster: &mut B,
    ) -> BatchReport
    where
        S: StateStore,
        C: Clock,
        A: Aggregator,
        B: Broadcaster,
    {
        let batch = std::mem::take(&mut self.queue);
        let mut report = BatchReport::default();
        if batch.is_empty() {
            debug!("batch tick with empty queue");
            return report;
        }

        let pairs: usize = batch.values().map(BTreeMap::len).sum();
        let _span = info_span!("segsync.batch", sessions = batch.len(), pairs).entered();

        for (session, per_viz) in batch {
            for (viz, responses) in per_viz {
                match process_pair(
                    cache,
                    aggregator,
                    broadcaster,
                    session,
                    &viz,
                    &responses,
                    &mut report.rejected_responses,
                ) {
                    Ok(PairOutcome::Updated(update)) => report.updated.push(update),
                    Ok(PairOutcome::NothingToApply) => {}
                    Err(error) => {
                        error!(session_id = %session, viz_id = %viz, %error, "batch pair failed");
                        report.failed.push(PairFailure {
                            session_id: session,
                            viz_id: viz,
                            error,
                        });
                    }
                }
            }
        }

        self.counters.batches_processed += 1;
        self.counters.pairs_processed += report.updated.len() as u64;
        self.counters.failed_pairs += report.failed.len() as u64;
        self.counters.rejected_responses += report.rejected_responses as u64;
        info!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            rejected_responses = report.rejected_responses,
            "batch processed"
        );
        report
    }

    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            sessions: self.queue.len(),
            pairs: self.queue.values().map(BTreeMap::len).sum(),
            queued_responses: self
                .queue
                .values()
                .flat_map(BTreeMap::values)
                .map(Vec::len)
                .sum(),
            batches_processed: self.counters.batches_processed,
            pairs_processed: self.counters.pairs_processed,
            failed_pairs: self.counters.failed_pairs,
            dropped_responses: self.counters.dropped_responses,
            rejected_responses: self.counters.rejected_responses,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

fn process_pair<S, C, A, B>(
    cache: &mut VisualizationCache<S, C>,
    aggregator: &mut A,
    broadcaster: &mut B,
    session: SessionId,
    viz: &VizId,
    responses: &[RespondentAnswers],
    rejected: &mut usize,
) -> Result<PairOutcome>
where
    S: StateStore,
    C: Clock,
    A: Aggregator,
    B: Broadcaster,
{
    let state = cache.get_visualizations_for_session(session)?;
    let entry = state
        .get(viz)
        .ok_or_else(|| SyncError::UnknownVisualization(viz.clone()))?;

    let transformer = ResponseTransformer::new(&entry.config, &entry.lookup_maps);
    let (contributions, failures) = transformer.transform_all(responses);
    for failure in &failures {
        warn!(session_id = %session, viz_id = %viz, error = %failure, "skipping response");
    }
    *rejected += failures.len();
    if contributions.is_empty() {
        debug!(session_id = %session, viz_id = %viz, "no usable responses in pair");
        return Ok(PairOutcome::NothingToApply);
    }

    let ctx = AggregationContext {
        session_id: session,
        viz_id: viz,
        config: &entry.config,
        viz_width: entry.viz_width,
        viz_height: entry.viz_height,
    };
    let recomputed = aggregator.recompute_splits(
        &entry.state.splits,
        &entry.state.basis_split_indices,
        &contributions,
        &ctx,
    )?;
    let basis_split_indices = entry.state.basis_split_indices.clone();

    let (splits, diffs): (Vec<Split>, Vec<Option<SplitDiff>>) = recomputed
        .into_iter()
        .map(|(split, diff)| {
            let diff = (!diff.is_empty()).then_some(diff);
            (split, diff)
        })
        .unzip();

    let sequence_number = cache
        .update_visualization(
            session,
            viz,
            splits.clone(),
            basis_split_indices.clone(),
        )
        .ok_or_else(|| RuntimeError::NotAwake {
            session,
            viz: viz.clone(),
        })?;

    broadcaster.broadcast(
        session,
        &PushEvent::Update(VisualizationUpdate {
            viz_id: viz.clone(),
            sequence_number,
            basis_split_indices,
            splits,
            diffs,
        }),
    );

    Ok(PairOutcome::Updated(PairUpdate {
        session_id: session,
        viz_id: viz.clone(),
        responses: contributions.len(),
        sequence_number,
    }))
}
