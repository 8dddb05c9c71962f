#![forbid(unsafe_code)]

//! Server driver.
//!
//! [`SyncServer`] owns the cache, the batch scheduler, and the two outbound
//! collaborators. The host drives it either by calling [`SyncServer::poll`]
//! from its own loop or by handing it to [`SyncServer::spawn`], which runs a
//! thread that sleeps on a [`StopSignal`] until the next deadline.
//!
//! All deadlines are read from the cache's [`Clock`], so under a
//! [`DeterministicClock`](segsync_backend::DeterministicClock) nothing fires
//! until the test advances time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ahash::AHashSet;
use segsync_backend::{
    Aggregator, Broadcaster, Clock, PushEvent, SessionSnapshot, SnapshotSource, StateStore,
    StatusChanged, StoreResult, VisualizationSnapshot,
};
use segsync_core::{DisplayMode, SessionId, ViewId, ViewPreferences, VizId};
use tracing::{debug, error, info};

use crate::batch::{BatchReport, BatchScheduler, QueueStats};
use crate::cache::{CacheStats, VisualizationCache};
use crate::config::SyncConfig;
use crate::signal::{StopSignal, StopTrigger};
use crate::transform::RespondentAnswers;

/// Upper bound on one wait of the driver thread.
pub const IDLE_WAIT: Duration = Duration::from_secs(1);

/// What one [`SyncServer::poll`] did.
#[derive(Debug, Default)]
pub struct PollReport {
    pub batch: Option<BatchReport>,
    pub slept: usize,
}

/// Cache, batch scheduler, aggregator, and broadcaster in one place.
#[derive(Debug)]
pub struct SyncServer<S, C, A, B> {
    cache: VisualizationCache<S, C>,
    batches: BatchScheduler,
    aggregator: A,
    broadcaster: B,
    closed: AHashSet<SessionId>,
}

impl<S, C, A, B> SyncServer<S, C, A, B>
where
    S: StateStore,
    C: Clock,
    A: Aggregator,
    B: Broadcaster,
{
    pub fn new(config: &SyncConfig, store: S, clock: C, aggregator: A, broadcaster: B) -> Self {
        let start = clock.now_mono();
        Self {
            cache: VisualizationCache::new(store, clock, config.cache.inactivity_timeout()),
            batches: BatchScheduler::new(&config.batch, start),
            aggregator,
            broadcaster,
            closed: AHashSet::new(),
        }
    }

    pub fn queue_responses(
        &mut self,
        session: SessionId,
        viz_ids: &[VizId],
        responses: &[RespondentAnswers],
    ) {
        self.batches.queue_responses(session, viz_ids, responses);
    }

    /// Process the queue now; see [`BatchScheduler::force_process_batch`].
    pub fn force_process_batch(&mut self) -> BatchReport {
        self.batches
            .force_process_batch(&mut self.cache, &mut self.aggregator, &mut self.broadcaster)
    }

    /// Fire everything due at the clock's current time.
    ///
    /// An inactivity deadline that falls strictly before the batch tick
    /// fires first; otherwise the batch runs first and its updates re-arm
    /// the timers of the sessions it touched.
    pub fn poll(&mut self) -> PollReport {
        let now = self.cache.clock().now_mono();
        let mut report = PollReport::default();
        let sleep_first = self
            .cache
            .next_deadline()
            .is_some_and(|deadline| deadline < self.batches.next_tick());
        if sleep_first {
            report.slept += self.cache.poll();
        }
        report.batch = self.batches.poll(
            now,
            &mut self.cache,
            &mut self.aggregator,
            &mut self.broadcaster,
        );
        report.slept += self.cache.poll();
        report
    }

    /// Earliest pending deadline (batch tick or inactivity sleep).
    #[must_use]
    pub fn next_deadline(&self) -> Duration {
        let tick = self.batches.next_tick();
        self.cache
            .next_deadline()
            .map_or(tick, |sleep| sleep.min(tick))
    }

    /// How long the driver may wait before the next [`poll`](Self::poll).
    #[must_use]
    pub fn time_until_next_deadline(&self) -> Duration {
        self.next_deadline()
            .saturating_sub(self.cache.clock().now_mono())
            .min(IDLE_WAIT)
    }

    /// Flush queued responses, then put every session to sleep.
    pub fn shutdown(&mut self) -> PollReport {
        let batch = self.force_process_batch();
        let slept = self.cache.sleep_all();
        info!(
            updated = batch.updated.len(),
            slept, "sync server shut down"
        );
        PollReport {
            batch: Some(batch),
            slept,
        }
    }

    /// Full snapshot of `session`, waking it if needed.
    pub fn snapshot_for_session(&mut self, session: SessionId) -> StoreResult<SessionSnapshot> {
        let open = !self.closed.contains(&session);
        let state = self.cache.get_visualizations_for_session(session)?;
        let visualizations = state
            .iter()
            .map(|(viz_id, entry)| VisualizationSnapshot {
                viz_id: viz_id.clone(),
                state: entry.state.clone(),
                view_maps: (*entry.view_maps).clone(),
                default_preferences: ViewPreferences::new(ViewId::base(), DisplayMode::Expanded),
            })
            .collect();
        Ok(SessionSnapshot {
            visualizations,
            open,
        })
    }

    /// Open or close `session`, broadcasting `statusChanged` on a change.
    ///
    /// Returns whether the status changed.
    pub fn set_session_open(&mut self, session: SessionId, open: bool) -> bool {
        let changed = if open {
            self.closed.remove(&session)
        } else {
            self.closed.insert(session)
        };
        if changed {
            debug!(session_id = %session, open, "session status changed");
            self.broadcaster
                .broadcast(session, &PushEvent::StatusChanged(StatusChanged { open }));
        }
        changed
    }

    #[must_use]
    pub fn is_session_open(&self, session: SessionId) -> bool {
        !self.closed.contains(&session)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.cache_stats()
    }

    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.batches.queue_stats()
    }

    #[must_use]
    pub fn cache(&self) -> &VisualizationCache<S, C> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut VisualizationCache<S, C> {
        &mut self.cache
    }

    #[must_use]
    pub fn broadcaster(&self) -> &B {
        &self.broadcaster
    }

    pub fn broadcaster_mut(&mut self) -> &mut B {
        &mut self.broadcaster
    }

    /// Drive a shared server until `stop` fires, then shut it down.
    pub fn run(server: &Mutex<Self>, stop: &StopSignal) {
        debug!("sync server loop started");
        loop {
            let wait = {
                let mut guard = lock(server);
                guard.poll();
                guard.time_until_next_deadline()
            };
            if stop.wait_timeout(wait) {
                break;
            }
        }
        lock(server).shutdown();
    }
}

impl<S, C, A, B> SyncServer<S, C, A, B>
where
    S: StateStore + Send + 'static,
    C: Clock + Send + 'static,
    A: Aggregator + Send + 'static,
    B: Broadcaster + Send + 'static,
{
    /// Run [`SyncServer::run`] on a new thread.
    pub fn spawn(server: Arc<Mutex<Self>>) -> ServerHandle {
        let (signal, trigger) = StopSignal::new();
        let thread = thread::spawn(move || Self::run(&server, &signal));
        ServerHandle {
            trigger,
            thread: Some(thread),
        }
    }
}

impl<S, C, A, B> SnapshotSource for SyncServer<S, C, A, B>
where
    S: StateStore,
    C: Clock,
    A: Aggregator,
    B: Broadcaster,
{
    fn fetch_snapshot(&mut self, session: SessionId) -> StoreResult<SessionSnapshot> {
        self.snapshot_for_session(session)
    }
}

/// Handle to a spawned driver thread.
#[derive(Debug)]
pub struct ServerHandle {
    trigger: StopTrigger,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop the loop and wait for its final shutdown.
    ///
    /// Returns `false` if the driver thread panicked.
    pub fn stop(mut self) -> bool {
        self.trigger.stop();
        let Some(handle) = self.thread.take() else {
            return true;
        };
        match handle.join() {
            Ok(()) => true,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| String::from("non-string panic payload"));
                error!(%reason, "sync server thread panicked");
                false
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.trigger.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
