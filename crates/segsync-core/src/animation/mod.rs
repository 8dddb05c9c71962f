#![forbid(unsafe_code)]

//! Transition animation for projected points.
//!
//! Logical state (a [`Projection`](crate::projection::Projection)) jumps
//! from one value to the next; visual state glides. This module turns the
//! jump into motion:
//!
//! - [`plan_transition`] classifies every key of `visual ∪ target` into
//!   removing / adding / moving / image-changing and lays the phases out on
//!   a [`PhaseSchedule`] (disappear → move ∥ image change → appear).
//! - [`AnimationExecutor`] samples the plan on every frame and performs an
//!   exact final sync once the schedule has elapsed.
//! - [`FrameScheduler`] abstracts the host's render-loop callback so the
//!   executor runs headless under [`ManualFrameScheduler`].
//!
//! Visual state is never written back into logical state.

mod executor;
mod frame;
mod planner;

pub use executor::{AnimationExecutor, FrameOutcome};
pub use frame::{FrameHandle, FrameScheduler, ManualFrameScheduler};
pub use planner::{
    Adding, ImageChanging, Moving, PhaseSchedule, PhaseSpan, Removing, TransitionCause,
    TransitionConfig, TransitionPlan, VisualPoint, VisualState, plan_transition,
};

/// An easing curve over `t ∈ [0, 1]`.
pub type EasingFn = fn(f64) -> f64;

/// Identity curve.
#[inline]
#[must_use]
pub fn linear(t: f64) -> f64 {
    t.clamp(0.0, 1.0)
}

/// Quadratic ease-in: slow start.
#[inline]
#[must_use]
pub fn ease_in(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t
}

/// Quadratic ease-out: slow finish.
#[inline]
#[must_use]
pub fn ease_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

/// Quadratic ease-in-out.
#[inline]
#[must_use]
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}
