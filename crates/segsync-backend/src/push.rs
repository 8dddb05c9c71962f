#![forbid(unsafe_code)]

//! Push-transport payloads and the broadcaster boundary.
//!
//! The transport carries an event *name* next to a JSON *payload* (SSE
//! `event:` / `data:` framing is handled elsewhere). Three names exist:
//!
//! | name | payload | meaning |
//! |------|---------|---------|
//! | `snapshot` | [`SessionSnapshot`] | full per-session re-seed |
//! | `update` | [`VisualizationUpdate`] | one visualization advanced a sequence number |
//! | `statusChanged` | [`StatusChanged`] | session opened or closed |

use segsync_core::{
    ServerState, SessionId, Split, SplitDiff, SplitIndex, ViewMaps, ViewPreferences, VizId,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::store::StoreResult;

pub const SNAPSHOT_EVENT: &str = "snapshot";
pub const UPDATE_EVENT: &str = "update";
pub const STATUS_CHANGED_EVENT: &str = "statusChanged";

/// Full state of one visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSnapshot {
    pub viz_id: VizId,
    pub state: ServerState,
    pub view_maps: ViewMaps,
    #[serde(default)]
    pub default_preferences: ViewPreferences,
}

/// Payload of a `snapshot` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub visualizations: Vec<VisualizationSnapshot>,
    pub open: bool,
}

/// Payload of an `update` event.
///
/// Carries the successor splits along with their diffs so a client holding
/// the predecessor can apply the diffs and keep the new state for later view
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationUpdate {
    pub viz_id: VizId,
    pub sequence_number: u64,
    pub basis_split_indices: Vec<SplitIndex>,
    pub splits: Vec<Split>,
    /// Index-aligned with `splits`; `None` for unchanged splits.
    pub diffs: Vec<Option<SplitDiff>>,
}

impl VisualizationUpdate {
    /// The successor state this update describes.
    #[must_use]
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.splits.clone(),
            self.basis_split_indices.clone(),
            self.sequence_number,
        )
    }
}

/// Payload of a `statusChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub open: bool,
}

/// A decoded push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Snapshot(SessionSnapshot),
    Update(VisualizationUpdate),
    StatusChanged(StatusChanged),
}

impl PushEvent {
    /// Transport event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => SNAPSHOT_EVENT,
            Self::Update(_) => UPDATE_EVENT,
            Self::StatusChanged(_) => STATUS_CHANGED_EVENT,
        }
    }

    /// Serialize the payload half of the frame.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Snapshot(p) => serde_json::to_string(p),
            Self::Update(p) => serde_json::to_string(p),
            Self::StatusChanged(p) => serde_json::to_string(p),
        }
    }
}

/// Outbound push transport.
pub trait Broadcaster {
    /// Deliver `event` to every subscriber of `session`.
    fn broadcast(&mut self, session: SessionId, event: &PushEvent);
}

/// Broadcaster that keeps every event, in order.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    events: Vec<(SessionId, PushEvent)>,
}

impl RecordingBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[(SessionId, PushEvent)] {
        &self.events
    }

    /// Take every recorded event, leaving the log empty.
    pub fn drain(&mut self) -> Vec<(SessionId, PushEvent)> {
        std::mem::take(&mut self.events)
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&mut self, session: SessionId, event: &PushEvent) {
        trace!(session_id = %session, event = event.name(), "recorded push event");
        self.events.push((session, event.clone()));
    }
}

/// Where a client fetches its initial per-session snapshot.
pub trait SnapshotSource {
    fn fetch_snapshot(&mut self, session: SessionId) -> StoreResult<SessionSnapshot>;
}
