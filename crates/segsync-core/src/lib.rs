#![forbid(unsafe_code)]

//! Core: canonical state model, view projection, split diffs, and transition
//! animation.
//!
//! # Role in segsync
//! `segsync-core` is pure data and pure functions. It owns the shapes that
//! travel between server and client (splits, diffs, view maps) and the
//! client-side machinery that turns them into drawn points. Nothing in here
//! does I/O or reads a clock; time is always passed in.
//!
//! # Primary responsibilities
//! - **Model**: [`ServerState`], [`Split`], [`PointKey`], [`ViewMaps`].
//! - **Diffs**: [`SplitDiff`] and [`diff_splits`], shipped with every update.
//! - **Projection**: [`project`] and the two update axes (server data and view
//!   preference), wrapped by [`ProjectionUpdater`].
//! - **Animation**: [`animation::plan_transition`] and
//!   [`animation::AnimationExecutor`], driven by a host
//!   [`animation::FrameScheduler`].
//!
//! # How it fits in the system
//! `segsync-backend` persists and aggregates splits, `segsync-runtime` owns the
//! server-side cache and batching loop, and `segsync-web` consumes push events
//! and feeds this crate's projection and animation layers.

pub mod animation;
pub mod diff;
pub mod error;
pub mod model;
pub mod projection;

pub use diff::{GroupChange, MembershipDiff, PointChange, PositionChange, SplitDiff, diff_splits};
pub use error::{Result, SyncError};
pub use model::{
    ByDisplayMode, DisplayMode, GroupStats, Offset, PlacedPoint, Placement, PointKey, Position, Rect,
    ResponseGroup, ResponseGroups, ServerState, SessionId, Split, SplitIndex, ViewId, ViewMaps,
    ViewPreferences, VizId,
};
pub use projection::{
    ProjectedPoint, Projection, ProjectionDiff, ProjectionUpdater, UpdateOutcome, UpdatePath,
    apply_server_update, apply_view_change, diff_projections, project, replace_with_full,
};
