#![forbid(unsafe_code)]

//! In-memory visualization cache with lazy wake and inactivity sleep.
//!
//! # State machine
//!
//! ```text
//!            get_visualizations_for_session
//!   Asleep ──────────────────────────────────▶ Awake ─┐
//!     ▲                                               │ access / update
//!     │      inactivity timer OR force_sleep          │ (re-arms timer)
//!     └───────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. A session is awake iff it has an armed inactivity timer.
//! 2. Every mutation re-arms the timer inside the same `&mut self` call, so
//!    a sleep can never fire between "update written" and "timer re-armed".
//! 3. Sleep removes the session even if persisting failed.
//! 4. A session is either fully loaded or absent; a wake that fails part
//!    way leaves nothing behind.

use std::collections::BTreeMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use segsync_backend::{
    Clock, LookupMaps, PersistRequest, PersistedVisualization, StateStore, StoreResult,
    VisualizationConfig,
};
use segsync_core::{ServerState, SessionId, Split, SplitIndex, ViewMaps, VizId};
use tracing::{debug, info_span, warn};

use crate::timer::TimerQueue;

/// One awake visualization.
#[derive(Debug, Clone)]
pub struct VisualizationEntry {
    pub state: ServerState,
    pub view_maps: Arc<ViewMaps>,
    pub lookup_maps: LookupMaps,
    pub config: VisualizationConfig,
    pub viz_width: f64,
    pub viz_height: f64,
    pub last_updated: DateTime<Utc>,
}

impl VisualizationEntry {
    fn from_row(row: PersistedVisualization) -> Self {
        let state = row.server_state();
        Self {
            state,
            view_maps: Arc::new(row.view_maps),
            lookup_maps: row.lookup_maps,
            config: row.config,
            viz_width: row.viz_width,
            viz_height: row.viz_height,
            last_updated: row.computed_at,
        }
    }
}

/// One awake session's visualizations.
#[derive(Debug, Clone)]
pub struct SessionVizState {
    session_id: SessionId,
    visualizations: BTreeMap<VizId, VisualizationEntry>,
    woke_at: Duration,
}

impl SessionVizState {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Monotonic time of the wake that loaded this state.
    #[must_use]
    pub fn woke_at(&self) -> Duration {
        self.woke_at
    }

    #[must_use]
    pub fn get(&self, viz: &VizId) -> Option<&VisualizationEntry> {
        self.visualizations.get(viz)
    }

    /// Direct access to a live entry. Mutating through this does not bump the
    /// sequence number; use [`VisualizationCache::update_visualization`] for
    /// that.
    pub fn get_mut(&mut self, viz: &VizId) -> Option<&mut VisualizationEntry> {
        self.visualizations.get_mut(viz)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VizId, &VisualizationEntry)> {
        self.visualizations.iter()
    }

    pub fn visualization_ids(&self) -> impl Iterator<Item = &VizId> {
        self.visualizations.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visualizations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visualizations.is_empty()
    }
}

/// Monitoring snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub awake_sessions: usize,
    pub visualizations: usize,
    pub wakes: u64,
    pub sleeps: u64,
    pub persist_failures: u64,
    pub updates: u64,
    /// Updates dropped because the session or visualization was not awake.
    pub rejected_updates: u64,
    pub next_eviction: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    wakes: u64,
    sleeps: u64,
    persist_failures: u64,
    updates: u64,
    rejected_updates: u64,
}

/// Holds [`SessionVizState`] for every awake session.
#[derive(Debug)]
pub struct VisualizationCache<S, C> {
    store: S,
    clock: C,
    inactivity: Duration,
    sessions: AHashMap<SessionId, SessionVizState>,
    timers: TimerQueue<SessionId>,
    counters: Counters,
}

impl<S: StateStore, C: Clock> VisualizationCache<S, C> {
    #[must_use]
    pub fn new(store: S, clock: C, inactivity: Duration) -> Self {
        Self {
            store,
            clock,
            inactivity,
            sessions: AHashMap::new(),
            timers: TimerQueue::new(),
            counters: Counters::default(),
        }
    }

    /// Wake `session` if needed and re-arm its inactivity timer.
    ///
    /// Returns the live state; callers mutate it in place.
    pub fn get_visualizations_for_session(
        &mut self,
        session: SessionId,
    ) -> StoreResult<&mut SessionVizState> {
        let now = self.clock.now_mono();
        let state = match self.sessions.entry(session) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let loaded = load_session(&self.store, session, now)?;
                self.counters.wakes += 1;
                entry.insert(loaded)
            }
        };
        self.timers.arm(session, now + self.inactivity);
        Ok(state)
    }

    /// Replace a visualization's splits and bump its sequence number.
    ///
    /// Returns the new sequence number, or `None` (logged) when the session
    /// or visualization is not awake. Callers treat `None` as "wake and retry".
    pub fn update_visualization(
        &mut self,
        session: SessionId,
        viz: &VizId,
        splits: Vec<Split>,
        basis_split_indices: Vec<SplitIndex>,
    ) -> Option<u64> {
        let Some(entry) = self
            .sessions
            .get_mut(&session)
            .and_then(|s| s.visualizations.get_mut(viz))
        else {
            warn!(session_id = %session, viz_id = %viz, "update for visualization that is not awake; ignored");
            self.counters.rejected_updates += 1;
            return None;
        };

        entry.state.splits = splits;
        entry.state.basis_split_indices = basis_split_indices;
        entry.state.sequence_number += 1;
        entry.last_updated = self.clock.now_wall();
        let sequence = entry.state.sequence_number;

        self.timers
            .arm(session, self.clock.now_mono() + self.inactivity);
        self.counters.updates += 1;
        debug!(session_id = %session, viz_id = %viz, sequence, "visualization updated");
        Some(sequence)
    }

    /// Sleep `session` now. Returns `false` if it was not awake.
    pub fn force_sleep(&mut self, session: SessionId) -> bool {
        self.timers.cancel(&session);
        self.sleep_session(session)
    }

    /// Sleep every session whose inactivity window has elapsed.
    ///
    /// Returns the number of sessions put to sleep.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now_mono();
        let expired = self.timers.pop_expired(now);
        let mut slept = 0;
        for session in expired {
            if self.sleep_session(session) {
                slept += 1;
            }
        }
        slept
    }

    /// Sleep every awake session. Returns how many were slept.
    pub fn sleep_all(&mut self) -> usize {
        let mut sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        sessions.sort_unstable();
        sessions
            .into_iter()
            .filter(|&s| self.force_sleep(s))
            .count()
    }

    fn sleep_session(&mut self, session: SessionId) -> bool {
        let Some(state) = self.sessions.remove(&session) else {
            return false;
        };
        let _span = info_span!("segsync.sleep", session_id = %session).entered();
        let mut failures = 0u64;
        for (viz, entry) in &state.visualizations {
            let request = PersistRequest {
                splits: &entry.state.splits,
                basis_split_indices: &entry.state.basis_split_indices,
                sequence_number: entry.state.sequence_number,
                computed_at: entry.last_updated,
            };
            if let Err(error) = self.store.persist_visualization(session, viz, request) {
                failures += 1;
                warn!(viz_id = %viz, %error, "persist on sleep failed; evicting anyway");
            }
        }
        self.counters.sleeps += 1;
        self.counters.persist_failures += failures;
        debug!(
            visualizations = state.visualizations.len(),
            failures, "session asleep"
        );
        true
    }

    #[must_use]
    pub fn is_awake(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    /// Read-only view of an awake session; never wakes.
    #[must_use]
    pub fn peek(&self, session: SessionId) -> Option<&SessionVizState> {
        self.sessions.get(&session)
    }

    /// Next inactivity deadline across all sessions.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    #[must_use]
    pub fn inactivity(&self) -> Duration {
        self.inactivity
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            awake_sessions: self.sessions.len(),
            visualizations: self.sessions.values().map(SessionVizState::len).sum(),
            wakes: self.counters.wakes,
            sleeps: self.counters.sleeps,
            persist_failures: self.counters.persist_failures,
            updates: self.counters.updates,
            rejected_updates: self.counters.rejected_updates,
            next_eviction: self.timers.next_deadline(),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}

fn load_session<S: StateStore>(
    store: &S,
    session: SessionId,
    now: Duration,
) -> StoreResult<SessionVizState> {
    let mut visualizations = BTreeMap::new();
    for viz in store.visualization_ids(session)? {
        let row = store.load_visualization(session, &viz)?;
        visualizations.insert(viz, VisualizationEntry::from_row(row));
    }
    debug!(
        session_id = %session,
        visualizations = visualizations.len(),
        "woke session"
    );
    Ok(SessionVizState {
        session_id: session,
        visualizations,
        woke_at: now,
    })
}
