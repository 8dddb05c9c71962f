#![forbid(unsafe_code)]

//! Frame-driven playback of a [`TransitionPlan`].
//!
//! The executor owns the visual state. Each frame samples the active plan at
//! `now - started_at`; once the schedule has elapsed it performs an exact
//! sync to the plan's target so no interpolation residue survives.
//!
//! A new logical target during playback does not queue: the executor samples
//! the in-flight plan at `now`, cancels its frame, and plans from whatever is
//! currently drawn.

use std::time::Duration;

use tracing::trace;

use super::frame::{FrameHandle, FrameScheduler};
use super::planner::{
    TransitionCause, TransitionConfig, TransitionPlan, VisualState, plan_transition, settled_state,
};
use crate::projection::Projection;

/// What a frame callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The handle was stale or nothing is animating.
    Ignored,
    /// Sampled; another frame was requested.
    Running,
    /// The transition completed and the visual state was synced.
    Finished,
}

#[derive(Debug)]
struct ActiveTransition {
    plan: TransitionPlan,
    started_at: Duration,
    handle: FrameHandle,
}

/// Drives transitions between successive projections.
#[derive(Debug)]
pub struct AnimationExecutor {
    config: TransitionConfig,
    visual: VisualState,
    active: Option<ActiveTransition>,
    completed: u64,
    superseded: u64,
}

impl AnimationExecutor {
    /// Start with nothing drawn.
    #[must_use]
    pub fn new(config: TransitionConfig) -> Self {
        Self {
            config,
            visual: VisualState::new(),
            active: None,
            completed: 0,
            superseded: 0,
        }
    }

    /// Start with `projection` drawn at rest.
    #[must_use]
    pub fn with_initial(config: TransitionConfig, projection: &Projection) -> Self {
        Self {
            visual: settled_state(projection),
            ..Self::new(config)
        }
    }

    /// Begin animating towards `target`.
    ///
    /// Returns the planned duration; zero means the visual state was synced
    /// immediately and no frame was requested.
    pub fn transition_to(
        &mut self,
        target: &Projection,
        cause: TransitionCause,
        now: Duration,
        scheduler: &mut dyn FrameScheduler,
    ) -> Duration {
        if let Some(active) = self.active.take() {
            let elapsed = now.saturating_sub(active.started_at);
            active.plan.apply_at(elapsed, &mut self.visual);
            scheduler.cancel_frame(active.handle);
            self.superseded += 1;
        }

        let plan = plan_transition(&self.visual, target, cause, &self.config);
        if plan.is_empty() {
            self.visual = plan.target;
            return Duration::ZERO;
        }

        plan.prime(&mut self.visual);
        let total = plan.schedule.total;
        trace!(
            removing = plan.removing.len(),
            adding = plan.adding.len(),
            moving = plan.moving.len(),
            image_changing = plan.image_changing.len(),
            total_ms = total.as_millis() as u64,
            "transition planned"
        );
        let handle = scheduler.request_frame();
        self.active = Some(ActiveTransition {
            plan,
            started_at: now,
            handle,
        });
        total
    }

    /// Host frame callback.
    pub fn on_frame(
        &mut self,
        handle: FrameHandle,
        now: Duration,
        scheduler: &mut dyn FrameScheduler,
    ) -> FrameOutcome {
        let Some(active) = self.active.as_mut() else {
            return FrameOutcome::Ignored;
        };
        if active.handle != handle {
            return FrameOutcome::Ignored;
        }

        let elapsed = now.saturating_sub(active.started_at);
        if elapsed >= active.plan.schedule.total {
            self.finish();
            return FrameOutcome::Finished;
        }
        active.plan.apply_at(elapsed, &mut self.visual);
        active.handle = scheduler.request_frame();
        FrameOutcome::Running
    }

    /// Jump to the end of the active transition.
    pub fn skip_to_end(&mut self, scheduler: &mut dyn FrameScheduler) {
        if let Some(active) = self.active.as_ref() {
            scheduler.cancel_frame(active.handle);
            self.finish();
        }
    }

    fn finish(&mut self) {
        if let Some(active) = self.active.take() {
            self.visual = active.plan.target;
            self.completed += 1;
        }
    }

    #[must_use]
    pub fn visual(&self) -> &VisualState {
        &self.visual
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.active.is_some()
    }

    /// The plan currently playing, if any.
    #[must_use]
    pub fn active_plan(&self) -> Option<&TransitionPlan> {
        self.active.as_ref().map(|a| &a.plan)
    }

    #[must_use]
    pub fn config(&self) -> &TransitionConfig {
        &self.config
    }

    /// Applies to the next transition.
    pub fn set_config(&mut self, config: TransitionConfig) {
        self.config = config;
    }

    /// Transitions that ran to completion.
    #[must_use]
    pub fn completed_total(&self) -> u64 {
        self.completed
    }

    /// Transitions interrupted by a newer target.
    #[must_use]
    pub fn superseded_total(&self) -> u64 {
        self.superseded
    }
}
