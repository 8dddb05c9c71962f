#![forbid(unsafe_code)]

//! Animation glue for one rendered visualization.
//!
//! The client owns logical state; a [`VizViewer`] owns what is drawn. Feed
//! it the client's notifications and it retargets its
//! [`AnimationExecutor`] at the client's current projection, starting from
//! whatever is on screen at that moment.

use std::time::Duration;

use segsync_core::animation::{
    AnimationExecutor, FrameHandle, FrameOutcome, FrameScheduler, TransitionCause,
    TransitionConfig, VisualState,
};
use segsync_core::{Projection, VizId};
use tracing::trace;

use crate::client::{ClientNotification, SessionVizClient};

#[derive(Debug)]
pub struct VizViewer {
    viz_id: VizId,
    executor: AnimationExecutor,
}

impl VizViewer {
    /// Start with `initial` drawn at rest.
    #[must_use]
    pub fn new(viz_id: VizId, config: TransitionConfig, initial: &Projection) -> Self {
        Self {
            viz_id,
            executor: AnimationExecutor::with_initial(config, initial),
        }
    }

    /// Attach to a visualization already loaded in `client`.
    #[must_use]
    pub fn attach(client: &SessionVizClient, viz_id: VizId, config: TransitionConfig) -> Option<Self> {
        let projection = client.projection(&viz_id)?;
        Some(Self::new(viz_id.clone(), config, projection))
    }

    /// React to one client notification.
    ///
    /// Returns the planned transition length when the notification concerns
    /// this visualization and changed something, `None` otherwise.
    pub fn observe(
        &mut self,
        note: &ClientNotification,
        client: &SessionVizClient,
        now: Duration,
        scheduler: &mut dyn FrameScheduler,
    ) -> Option<Duration> {
        if note.viz_id() != Some(&self.viz_id) {
            return None;
        }
        let cause = match note {
            ClientNotification::Updated { diff, .. } | ClientNotification::Resynced { diff, .. }
                if !diff.is_empty() =>
            {
                TransitionCause::ServerUpdate
            }
            ClientNotification::ViewChanged { diff, .. } if !diff.is_empty() => {
                TransitionCause::ViewChange
            }
            ClientNotification::Removed { .. } => TransitionCause::ServerUpdate,
            _ => return None,
        };
        let empty = Projection::default();
        let target = client.projection(&self.viz_id).unwrap_or(&empty);
        let total = self.executor.transition_to(target, cause, now, scheduler);
        trace!(viz_id = %self.viz_id, ?cause, total_ms = total.as_millis() as u64, "viewer retargeted");
        Some(total)
    }

    /// Host frame callback.
    pub fn on_frame(
        &mut self,
        handle: FrameHandle,
        now: Duration,
        scheduler: &mut dyn FrameScheduler,
    ) -> FrameOutcome {
        self.executor.on_frame(handle, now, scheduler)
    }

    #[must_use]
    pub fn viz_id(&self) -> &VizId {
        &self.viz_id
    }

    #[must_use]
    pub fn visual(&self) -> &VisualState {
        self.executor.visual()
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.executor.is_animating()
    }

    #[must_use]
    pub fn executor(&self) -> &AnimationExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut AnimationExecutor {
        &mut self.executor
    }
}
