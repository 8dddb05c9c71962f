#![forbid(unsafe_code)]

//! segsync public facade.
//!
//! Re-exports the types most hosts need from the member crates and a
//! [`prelude`] for day-to-day use. Reach into [`core`], [`backend`],
//! [`runtime`] or [`web`] for everything else.

use thiserror::Error;

// --- Core re-exports -------------------------------------------------------

pub use segsync_core::animation::{
    AnimationExecutor, FrameHandle, FrameOutcome, FrameScheduler, ManualFrameScheduler,
    TransitionCause, TransitionConfig, VisualPoint, VisualState,
};
pub use segsync_core::{
    DisplayMode, PointKey, Projection, ProjectionDiff, ProjectionUpdater, ServerState, SessionId,
    Split, SplitDiff, SyncError, UpdatePath, ViewId, ViewMaps, ViewPreferences, VizId,
};

// --- Backend re-exports ----------------------------------------------------

pub use segsync_backend::{
    Aggregator, Broadcaster, Clock, FileStore, MemoryStore, PushEvent, SnapshotSource, StateStore,
    StoreError, SystemClock,
};

// --- Runtime re-exports ----------------------------------------------------

pub use segsync_runtime::{
    ConfigError, RespondentAnswers, RuntimeError, ServerHandle, StopSignal, SyncConfig, SyncServer,
    init_tracing,
};

// --- Client re-exports -----------------------------------------------------

pub use segsync_web::{
    ClientError, ClientNotification, PushParseError, SessionVizClient, VizViewer,
};

// --- Errors ---------------------------------------------------------------

/// Any failure surfaced through the facade.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Push(#[from] PushParseError),
}

/// Standard result type for facade APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ClientNotification, DisplayMode, Error, PushEvent, RespondentAnswers, Result, SessionId,
        SessionVizClient, SyncConfig, SyncServer, ViewId, ViewPreferences, VizId, VizViewer,
    };

    pub use crate::{backend, core, runtime, web};
}

pub use segsync_backend as backend;
pub use segsync_core as core;
pub use segsync_runtime as runtime;
pub use segsync_web as web;
