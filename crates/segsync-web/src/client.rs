#![forbid(unsafe_code)]

//! Per-session client sync orchestrator.
//!
//! [`SessionVizClient`] keeps one [`ProjectionUpdater`] per visualization of
//! a session and routes push events to them:
//!
//! - `snapshot`: full re-seed. Missing updaters are created; existing ones
//!   are replaced wholesale, whatever their sequence number.
//! - `update`: routed by visualization id through the sequence rules of
//!   [`ProjectionUpdater::apply_server_update`] (stale ignored, successor
//!   incremental, gap full).
//! - `statusChanged`: records whether the session still accepts actions.
//!
//! Events are applied one at a time and synchronously. Subscribers receive
//! a [`ClientNotification`] after each change over an `mpsc` channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;

use segsync_backend::{
    PushEvent, SessionSnapshot, SnapshotSource, StoreError, VisualizationSnapshot,
    VisualizationUpdate,
};
use segsync_core::{
    Projection, ProjectionDiff, ProjectionUpdater, SessionId, SyncError, UpdatePath,
    ViewPreferences, VizId, diff_projections,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wire::{PushParseError, parse_push_event, payload_preview};

/// Failure to bring a client up.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to fetch snapshot: {0}")]
    Fetch(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Delivered to subscribers after every applied change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotification {
    /// An `update` advanced a visualization.
    Updated {
        viz_id: VizId,
        sequence_number: u64,
        path: UpdatePath,
        diff: ProjectionDiff,
    },
    /// A `snapshot` (re)seeded a visualization.
    Resynced {
        viz_id: VizId,
        sequence_number: u64,
        diff: ProjectionDiff,
    },
    /// A visualization vanished from a re-seed.
    Removed { viz_id: VizId },
    /// Local view preferences changed.
    ViewChanged { viz_id: VizId, diff: ProjectionDiff },
    StatusChanged { open: bool },
}

impl ClientNotification {
    /// Visualization this notification concerns, if any.
    #[must_use]
    pub fn viz_id(&self) -> Option<&VizId> {
        match self {
            Self::Updated { viz_id, .. }
            | Self::Resynced { viz_id, .. }
            | Self::Removed { viz_id }
            | Self::ViewChanged { viz_id, .. } => Some(viz_id),
            Self::StatusChanged { .. } => None,
        }
    }
}

/// Counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub events_applied: u64,
    pub dropped_malformed: u64,
    /// Well-formed events that could not be applied (unknown visualization,
    /// unresolvable view).
    pub dropped_unapplied: u64,
    pub stale_ignored: u64,
    pub resyncs: u64,
    pub incremental_updates: u64,
    pub full_updates: u64,
}

/// Client-side state of one session.
#[derive(Debug)]
pub struct SessionVizClient {
    session_id: SessionId,
    updaters: BTreeMap<VizId, ProjectionUpdater>,
    open: bool,
    subscribers: Vec<mpsc::Sender<ClientNotification>>,
    stats: ClientStats,
}

impl SessionVizClient {
    /// An empty client; fill it with [`handle_event`](Self::handle_event).
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            updaters: BTreeMap::new(),
            open: true,
            subscribers: Vec::new(),
            stats: ClientStats::default(),
        }
    }

    /// Fetch the initial snapshot from `source` and build every updater.
    pub fn connect(
        session_id: SessionId,
        source: &mut impl SnapshotSource,
    ) -> Result<Self, ClientError> {
        let snapshot = source.fetch_snapshot(session_id)?;
        let mut client = Self::new(session_id);
        client.apply_snapshot(snapshot)?;
        info!(
            session_id = %session_id,
            visualizations = client.updaters.len(),
            "client connected"
        );
        Ok(client)
    }

    /// Decode and apply one raw frame.
    ///
    /// Never fails: malformed or inapplicable frames are logged and dropped.
    /// Returns whether the frame was applied.
    pub fn handle_raw(&mut self, name: &str, payload: &str) -> bool {
        let event = match parse_push_event(name, payload) {
            Ok(event) => event,
            Err(error) => {
                self.log_dropped(name, payload, &error);
                self.stats.dropped_malformed += 1;
                return false;
            }
        };
        match self.handle_event(event) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    session_id = %self.session_id,
                    event = name,
                    payload = %payload_preview(payload),
                    %error,
                    "dropping push event that could not be applied"
                );
                self.stats.dropped_unapplied += 1;
                false
            }
        }
    }

    fn log_dropped(&self, name: &str, payload: &str, error: &PushParseError) {
        warn!(
            session_id = %self.session_id,
            event = name,
            payload = %payload_preview(payload),
            %error,
            "dropping malformed push event"
        );
    }

    /// Apply one decoded event.
    pub fn handle_event(&mut self, event: PushEvent) -> Result<(), SyncError> {
        match event {
            PushEvent::Snapshot(snapshot) => self.apply_snapshot(snapshot)?,
            PushEvent::Update(update) => self.apply_update(&update)?,
            PushEvent::StatusChanged(status) => {
                if self.open != status.open {
                    self.open = status.open;
                    debug!(session_id = %self.session_id, open = status.open, "session status changed");
                }
                self.notify(ClientNotification::StatusChanged { open: status.open });
            }
        }
        self.stats.events_applied += 1;
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: SessionSnapshot) -> Result<(), SyncError> {
        // Build everything first so a bad entry leaves the client untouched.
        let mut next = BTreeMap::new();
        let mut notes = Vec::with_capacity(snapshot.visualizations.len());
        for viz in snapshot.visualizations {
            let viz_id = viz.viz_id.clone();
            let (updater, diff) = self.reseed(viz)?;
            notes.push(ClientNotification::Resynced {
                viz_id: viz_id.clone(),
                sequence_number: updater.sequence_number(),
                diff,
            });
            next.insert(viz_id, updater);
        }

        let previous = std::mem::replace(&mut self.updaters, next);
        for viz_id in previous.into_keys() {
            if !self.updaters.contains_key(&viz_id) {
                debug!(session_id = %self.session_id, viz_id = %viz_id, "visualization dropped by snapshot");
                notes.push(ClientNotification::Removed { viz_id });
            }
        }
        self.open = snapshot.open;
        self.stats.resyncs += 1;
        for note in notes {
            self.notify(note);
        }
        Ok(())
    }

    /// A fresh updater for `viz`, plus the key diff against what was shown.
    fn reseed(&self, viz: VisualizationSnapshot) -> Result<(ProjectionUpdater, ProjectionDiff), SyncError> {
        let existing = self.updaters.get(&viz.viz_id);
        let view_maps = Arc::new(viz.view_maps);

        // Keep the viewer's preferences when they still resolve.
        let prefs = existing
            .map(|u| u.preferences().clone())
            .filter(|p| view_maps.resolve(&p.view_id).is_ok())
            .unwrap_or(viz.default_preferences);

        match existing {
            Some(current) if current.view_maps() == &view_maps && current.preferences() == &prefs => {
                let mut updater = current.clone();
                let diff = updater.resync(viz.state)?;
                Ok((updater, diff))
            }
            _ => {
                let updater = ProjectionUpdater::new(viz.state, prefs, view_maps)?;
                let empty = Projection::default();
                let shown = existing.map_or(&empty, ProjectionUpdater::projection);
                let diff = diff_projections(shown, updater.projection());
                Ok((updater, diff))
            }
        }
    }

    fn apply_update(&mut self, update: &VisualizationUpdate) -> Result<(), SyncError> {
        let updater = self
            .updaters
            .get_mut(&update.viz_id)
            .ok_or_else(|| SyncError::UnknownVisualization(update.viz_id.clone()))?;
        let outcome = updater.apply_server_update(update.server_state(), Some(&update.diffs))?;
        match outcome.path {
            UpdatePath::Stale => {
                self.stats.stale_ignored += 1;
                debug!(
                    viz_id = %update.viz_id,
                    sequence = update.sequence_number,
                    current = updater.sequence_number(),
                    "stale update ignored"
                );
                return Ok(());
            }
            UpdatePath::Incremental => self.stats.incremental_updates += 1,
            UpdatePath::Full => self.stats.full_updates += 1,
        }
        let note = ClientNotification::Updated {
            viz_id: update.viz_id.clone(),
            sequence_number: update.sequence_number,
            path: outcome.path,
            diff: outcome.diff,
        };
        self.notify(note);
        Ok(())
    }

    /// Switch one visualization's view preferences.
    ///
    /// View changes are local and remain allowed after the session closes.
    pub fn set_view_preferences(
        &mut self,
        viz_id: &VizId,
        prefs: ViewPreferences,
    ) -> Result<ProjectionDiff, SyncError> {
        let updater = self
            .updaters
            .get_mut(viz_id)
            .ok_or_else(|| SyncError::UnknownVisualization(viz_id.clone()))?;
        let diff = updater.apply_view_change(prefs)?;
        self.notify(ClientNotification::ViewChanged {
            viz_id: viz_id.clone(),
            diff: diff.clone(),
        });
        Ok(diff)
    }

    /// Gate for actions that would mutate server state.
    pub fn ensure_accepting_actions(&self) -> Result<(), SyncError> {
        if self.open {
            Ok(())
        } else {
            Err(SyncError::SessionClosed)
        }
    }

    /// Receive every future [`ClientNotification`].
    pub fn subscribe(&mut self) -> mpsc::Receiver<ClientNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, note: ClientNotification) {
        self.subscribers.retain(|tx| tx.send(note.clone()).is_ok());
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn projection(&self, viz_id: &VizId) -> Option<&Projection> {
        self.updaters.get(viz_id).map(ProjectionUpdater::projection)
    }

    #[must_use]
    pub fn updater(&self, viz_id: &VizId) -> Option<&ProjectionUpdater> {
        self.updaters.get(viz_id)
    }

    pub fn visualization_ids(&self) -> impl Iterator<Item = &VizId> {
        self.updaters.keys()
    }

    #[must_use]
    pub fn stats(&self) -> ClientStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segsync_backend::StatusChanged;
    use segsync_core::{
        DisplayMode, PlacedPoint, PointKey, Rect, ResponseGroup, ServerState, Split, ViewId,
    };

    fn split(points: u32) -> Split {
        let mut s = Split {
            basis_split_indices: vec![0],
            ..Split::default()
        };
        let group = ResponseGroup {
            bounds: Rect {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            points: (0..points)
                .map(|i| PlacedPoint {
                    key: PointKey::new(0, 0, i),
                    x: f64::from(i),
                    y: 0.0,
                })
                .collect(),
            ..ResponseGroup::default()
        };
        s.response_groups.expanded = vec![group.clone()];
        s.response_groups.collapsed = vec![group];
        s
    }

    fn snapshot(sequence: u64, points: u32) -> SessionSnapshot {
        SessionSnapshot {
            visualizations: vec![VisualizationSnapshot {
                viz_id: VizId::from("v"),
                state: ServerState::new(vec![split(points)], vec![0], sequence),
                view_maps: [(ViewId::base(), vec![0])].into_iter().collect(),
                default_preferences: ViewPreferences::default(),
            }],
            open: true,
        }
    }

    struct Fixed(SessionSnapshot);

    impl SnapshotSource for Fixed {
        fn fetch_snapshot(&mut self, _: SessionId) -> Result<SessionSnapshot, StoreError> {
            Ok(self.0.clone())
        }
    }

    // ── Connect ─────────────────────────────────────────────────────

    #[test]
    fn connect_builds_one_updater_per_visualization() {
        let client = SessionVizClient::connect(SessionId(1), &mut Fixed(snapshot(4, 3))).unwrap();
        assert_eq!(client.projection(&VizId::from("v")).unwrap().len(), 3);
        assert_eq!(client.updater(&VizId::from("v")).unwrap().sequence_number(), 4);
        assert!(client.is_open());
    }

    // ── Events ──────────────────────────────────────────────────────

    #[test]
    fn lower_sequence_snapshot_still_reseeds() {
        let mut client = SessionVizClient::connect(SessionId(1), &mut Fixed(snapshot(9, 3))).unwrap();
        let rx = client.subscribe();
        client.handle_event(PushEvent::Snapshot(snapshot(2, 5))).unwrap();
        assert_eq!(client.updater(&VizId::from("v")).unwrap().sequence_number(), 2);
        assert_eq!(client.projection(&VizId::from("v")).unwrap().len(), 5);
        match rx.try_recv().unwrap() {
            ClientNotification::Resynced { diff, .. } => assert_eq!(diff.added.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.stats().resyncs, 2);
    }

    #[test]
    fn update_for_unknown_visualization_is_dropped() {
        let mut client = SessionVizClient::connect(SessionId(1), &mut Fixed(snapshot(1, 1))).unwrap();
        let payload = r#"{"vizId":"nope","sequenceNumber":2,"basisSplitIndices":[],"splits":[],"diffs":[]}"#;
        assert!(!client.handle_raw("update", payload));
        assert_eq!(client.stats().dropped_unapplied, 1);
    }

    #[test]
    fn malformed_frames_are_counted_not_fatal() {
        let mut client = SessionVizClient::connect(SessionId(1), &mut Fixed(snapshot(1, 1))).unwrap();
        assert!(!client.handle_raw("update", "{not json"));
        assert!(!client.handle_raw("mystery", "{}"));
        assert_eq!(client.stats().dropped_malformed, 2);
        assert!(client.handle_raw("statusChanged", r#"{"open":true}"#));
    }

    #[test]
    fn closed_session_rejects_actions() {
        let mut client = SessionVizClient::connect(SessionId(1), &mut Fixed(snapshot(1, 1))).unwrap();
        assert!(client.ensure_accepting_actions().is_ok());
        client
            .handle_event(PushEvent::StatusChanged(StatusChanged { open: false }))
            .unwrap();
        assert_eq!(client.ensure_accepting_actions(), Err(SyncError::SessionClosed));

        // Local view control still works.
        let prefs = ViewPreferences::new(ViewId::base(), DisplayMode::Collapsed);
        assert!(client.set_view_preferences(&VizId::from("v"), prefs).is_ok());
    }

    #[test]
    fn bad_view_is_a_contract_violation() {
        let mut client = SessionVizClient::connect(SessionId(1), &mut Fixed(snapshot(1, 1))).unwrap();
        let prefs = ViewPreferences::new(ViewId::new("0,1"), DisplayMode::Expanded);
        let err = client
            .set_view_preferences(&VizId::from("v"), prefs)
            .unwrap_err();
        assert!(err.is_view_error());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut client = SessionVizClient::new(SessionId(1));
        drop(client.subscribe());
        let rx = client.subscribe();
        client
            .handle_event(PushEvent::StatusChanged(StatusChanged { open: false }))
            .unwrap();
        assert_eq!(client.subscribers.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), ClientNotification::StatusChanged { open: false });
    }
}
