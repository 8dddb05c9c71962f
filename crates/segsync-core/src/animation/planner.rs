#![forbid(unsafe_code)]

//! Transition planning: classify keys and lay phases out in time.
//!
//! # Classification
//!
//! Every key in `visual ∪ target` lands in at most one membership class
//! and may additionally be moving and/or image-changing:
//!
//! | visual | target | class |
//! |--------|--------|-------|
//! | yes | no | removing (fade out from current opacity) |
//! | no | yes | adding (opacity 0, placed at target so it pops in at rest) |
//! | yes, opacity < 1 | yes | adding (resume fade-in from current opacity) |
//! | yes, different position | yes | moving |
//! | yes, different icon | yes | image-changing (view changes only) |
//!
//! # Schedule
//!
//! ```text
//!   |-- disappear --|-- move ∥ image change --|-- appear --|
//! ```
//!
//! A phase with no participants occupies zero time, so the schedule skips
//! straight to the next populated phase. The movement phase lasts as long as
//! the longer of its two sub-animations.

use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::{ease_in, ease_in_out, ease_out};
use crate::model::{PointKey, Position};
use crate::projection::{ProjectedPoint, Projection};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Per-phase durations, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub disappear_ms: u64,
    pub move_ms: u64,
    pub image_change_ms: u64,
    pub appear_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            disappear_ms: 150,
            move_ms: 400,
            image_change_ms: 400,
            appear_ms: 200,
        }
    }
}

impl TransitionConfig {
    #[must_use]
    pub fn disappear(&self) -> Duration {
        Duration::from_millis(self.disappear_ms)
    }

    #[must_use]
    pub fn movement(&self) -> Duration {
        Duration::from_millis(self.move_ms)
    }

    #[must_use]
    pub fn image_change(&self) -> Duration {
        Duration::from_millis(self.image_change_ms)
    }

    #[must_use]
    pub fn appear(&self) -> Duration {
        Duration::from_millis(self.appear_ms)
    }
}

// ---------------------------------------------------------------------------
// Visual state
// ---------------------------------------------------------------------------

/// What is currently drawn for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualPoint {
    pub position: Position,
    pub opacity: f64,
    pub image: Option<String>,
    /// Icon being faded out while `crossfade < 1`.
    pub previous_image: Option<String>,
    /// Cross-fade progress from `previous_image` to `image`.
    pub crossfade: f64,
}

impl VisualPoint {
    /// Fully visible, at rest, at the projected position.
    #[must_use]
    pub fn settled(point: &ProjectedPoint) -> Self {
        Self {
            position: point.position(),
            opacity: 1.0,
            image: point.image.clone(),
            previous_image: None,
            crossfade: 1.0,
        }
    }
}

/// Drawn state of every key.
pub type VisualState = AHashMap<PointKey, VisualPoint>;

/// Settled visual state for a projection.
#[must_use]
pub(crate) fn settled_state(projection: &Projection) -> VisualState {
    projection
        .iter()
        .map(|(key, point)| (*key, VisualPoint::settled(point)))
        .collect()
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Why the logical state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// New server data. Icons never cross-fade.
    ServerUpdate,
    /// The viewer switched view or display mode.
    ViewChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Removing {
    pub key: PointKey,
    pub from: VisualPoint,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adding {
    pub key: PointKey,
    pub from_opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moving {
    pub key: PointKey,
    pub from: Position,
    pub to: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageChanging {
    pub key: PointKey,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Cross-fade progress already drawn when the plan was made.
    pub from_crossfade: f64,
}

/// A window on the transition clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpan {
    pub start: Duration,
    pub duration: Duration,
}

impl PhaseSpan {
    #[must_use]
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    /// Linear progress through the span at `elapsed`, in `[0, 1]`.
    #[must_use]
    pub fn progress(&self, elapsed: Duration) -> f64 {
        if elapsed < self.start {
            return 0.0;
        }
        if self.duration.is_zero() {
            return 1.0;
        }
        let into = elapsed - self.start;
        (into.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}

fn progress_of(span: Option<PhaseSpan>, elapsed: Duration) -> f64 {
    span.map_or(1.0, |s| s.progress(elapsed))
}

/// Phase placement for one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseSchedule {
    pub disappear: Option<PhaseSpan>,
    pub movement: Option<PhaseSpan>,
    pub image_change: Option<PhaseSpan>,
    pub appear: Option<PhaseSpan>,
    pub total: Duration,
}

impl PhaseSchedule {
    /// Lay out populated phases back to back.
    #[must_use]
    pub fn new(
        config: &TransitionConfig,
        removing: bool,
        moving: bool,
        image_changing: bool,
        adding: bool,
    ) -> Self {
        let mut cursor = Duration::ZERO;
        let mut schedule = Self::default();

        if removing {
            let span = PhaseSpan {
                start: cursor,
                duration: config.disappear(),
            };
            cursor = span.end();
            schedule.disappear = Some(span);
        }

        let mut movement_end = cursor;
        if moving {
            let span = PhaseSpan {
                start: cursor,
                duration: config.movement(),
            };
            movement_end = movement_end.max(span.end());
            schedule.movement = Some(span);
        }
        if image_changing {
            let span = PhaseSpan {
                start: cursor,
                duration: config.image_change(),
            };
            movement_end = movement_end.max(span.end());
            schedule.image_change = Some(span);
        }
        cursor = movement_end;

        if adding {
            let span = PhaseSpan {
                start: cursor,
                duration: config.appear(),
            };
            cursor = span.end();
            schedule.appear = Some(span);
        }

        schedule.total = cursor;
        schedule
    }
}

/// A complete, time-sequenced plan from the current visual state to a
/// logical target.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub cause: TransitionCause,
    pub removing: Vec<Removing>,
    pub adding: Vec<Adding>,
    pub moving: Vec<Moving>,
    pub image_changing: Vec<ImageChanging>,
    pub schedule: PhaseSchedule,
    /// Exact visual state once the plan has run.
    pub target: VisualState,
}

impl TransitionPlan {
    /// Whether no key needs animating.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removing.is_empty()
            && self.adding.is_empty()
            && self.moving.is_empty()
            && self.image_changing.is_empty()
    }

    /// Insert keys that are not drawn yet, invisible at their target.
    pub fn prime(&self, visual: &mut VisualState) {
        for add in &self.adding {
            if visual.contains_key(&add.key) {
                continue;
            }
            if let Some(target) = self.target.get(&add.key) {
                visual.insert(
                    add.key,
                    VisualPoint {
                        opacity: add.from_opacity,
                        ..target.clone()
                    },
                );
            }
        }
    }

    /// Write the interpolated state at `elapsed` into `visual`.
    pub fn apply_at(&self, elapsed: Duration, visual: &mut VisualState) {
        let fade_out = ease_in(progress_of(self.schedule.disappear, elapsed));
        for r in &self.removing {
            if let Some(v) = visual.get_mut(&r.key) {
                v.opacity = r.from.opacity * (1.0 - fade_out);
            }
        }

        let travel = ease_in_out(progress_of(self.schedule.movement, elapsed));
        for m in &self.moving {
            if let Some(v) = visual.get_mut(&m.key) {
                v.position = m.from.lerp(m.to, travel);
            }
        }

        let blend = ease_in_out(progress_of(self.schedule.image_change, elapsed));
        for c in &self.image_changing {
            if let Some(v) = visual.get_mut(&c.key) {
                v.previous_image.clone_from(&c.from);
                v.image.clone_from(&c.to);
                v.crossfade = c.from_crossfade + (1.0 - c.from_crossfade) * blend;
            }
        }

        let fade_in = ease_out(progress_of(self.schedule.appear, elapsed));
        for a in &self.adding {
            if let Some(v) = visual.get_mut(&a.key) {
                v.opacity = a.from_opacity + (1.0 - a.from_opacity) * fade_in;
            }
        }
    }
}

/// Plan a transition from what is drawn (`visual`) to `target`.
///
/// New image changes are only planned for [`TransitionCause::ViewChange`].
/// A cross-fade already in flight is resumed whatever the cause. Keys that
/// are no longer in `target` and already invisible get no disappear phase.
#[must_use]
pub fn plan_transition(
    visual: &VisualState,
    target: &Projection,
    cause: TransitionCause,
    config: &TransitionConfig,
) -> TransitionPlan {
    let mut removing = Vec::new();
    let mut adding = Vec::new();
    let mut moving = Vec::new();
    let mut image_changing = Vec::new();

    for (key, drawn) in visual {
        if !target.contains(key) && drawn.opacity > 0.0 {
            removing.push(Removing {
                key: *key,
                from: drawn.clone(),
            });
        }
    }

    for (key, point) in target.iter() {
        let Some(drawn) = visual.get(key) else {
            adding.push(Adding {
                key: *key,
                from_opacity: 0.0,
            });
            continue;
        };
        let to = point.position();
        if drawn.position != to {
            moving.push(Moving {
                key: *key,
                from: drawn.position,
                to,
            });
        }
        if let Some(change) = image_change(*key, drawn, point.image.as_ref(), cause) {
            image_changing.push(change);
        }
        if drawn.opacity < 1.0 {
            adding.push(Adding {
                key: *key,
                from_opacity: drawn.opacity,
            });
        }
    }

    removing.sort_unstable_by_key(|r| r.key);
    adding.sort_unstable_by_key(|a| a.key);
    moving.sort_unstable_by_key(|m| m.key);
    image_changing.sort_unstable_by_key(|c| c.key);

    let schedule = PhaseSchedule::new(
        config,
        !removing.is_empty(),
        !moving.is_empty(),
        !image_changing.is_empty(),
        !adding.is_empty(),
    );

    TransitionPlan {
        cause,
        removing,
        adding,
        moving,
        image_changing,
        schedule,
        target: settled_state(target),
    }
}

fn image_change(
    key: PointKey,
    drawn: &VisualPoint,
    to: Option<&String>,
    cause: TransitionCause,
) -> Option<ImageChanging> {
    let fading = drawn.crossfade < 1.0;
    if drawn.image.as_ref() == to {
        // Finish a fade that was interrupted on its way to this icon.
        return fading.then(|| ImageChanging {
            key,
            from: drawn.previous_image.clone(),
            to: to.cloned(),
            from_crossfade: drawn.crossfade,
        });
    }
    if fading && drawn.previous_image.as_ref() == to {
        // Heading back to the icon being faded out.
        return Some(ImageChanging {
            key,
            from: drawn.image.clone(),
            to: to.cloned(),
            from_crossfade: 1.0 - drawn.crossfade,
        });
    }
    (fading || cause == TransitionCause::ViewChange).then(|| ImageChanging {
        key,
        from: drawn.image.clone(),
        to: to.cloned(),
        from_crossfade: 0.0,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
