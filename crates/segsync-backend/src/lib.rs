#![forbid(unsafe_code)]

//! Collaborator boundary for segsync.
//!
//! Everything the engine consumes but does not own lives behind a trait
//! here:
//!
//! - [`Clock`]: monotonic + wall time ([`SystemClock`], [`DeterministicClock`]).
//! - [`StateStore`]: durable visualization rows ([`MemoryStore`], [`FileStore`]).
//! - [`Aggregator`]: the upstream `recomputeSplits` function.
//! - [`Broadcaster`] / [`SnapshotSource`]: the push transport.
//!
//! Production deployments plug in their own database and transport.

pub mod aggregate;
pub mod clock;
pub mod push;
pub mod store;

pub use aggregate::{AggregationContext, AggregationError, Aggregator, PointContribution};
pub use clock::{Clock, DeterministicClock, SystemClock};
pub use push::{
    Broadcaster, PushEvent, RecordingBroadcaster, STATUS_CHANGED_EVENT, SNAPSHOT_EVENT,
    SessionSnapshot, SnapshotSource, StatusChanged, UPDATE_EVENT, VisualizationSnapshot,
    VisualizationUpdate,
};
pub use store::{
    FileStore, LookupMaps, MemoryStore, PersistRequest, PersistedVisualization, StateStore,
    StoreError, StoreResult, VisualizationConfig,
};
