#![forbid(unsafe_code)]

//! Server-side runtime: the visualization cache, response batching, and the
//! driver that ties them to a clock.
//!
//! # Role in segsync
//! Canonical [`ServerState`](segsync_core::ServerState) lives here while a
//! session is active. Respondents' answers enter through
//! [`BatchScheduler::queue_responses`]; every tick recomputes the affected
//! visualizations, bumps their sequence numbers in the
//! [`VisualizationCache`], and pushes an `update` event.
//!
//! # Time
//! Nothing here reads the wall clock directly. The cache asks its
//! [`Clock`](segsync_backend::Clock) and the batch scheduler is handed `now`,
//! so every deadline can be driven from a test by advancing a
//! [`DeterministicClock`](segsync_backend::DeterministicClock).

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod signal;
pub mod timer;
pub mod transform;

pub use batch::{BatchReport, BatchScheduler, PairFailure, PairUpdate, QueueStats};
pub use cache::{CacheStats, SessionVizState, VisualizationCache, VisualizationEntry};
pub use config::{BatchConfig, CacheConfig, ConfigError, SyncConfig};
pub use error::{Result, RuntimeError};
pub use logging::{LoggingConfig, init_tracing};
pub use server::{PollReport, ServerHandle, SyncServer};
pub use signal::{StopSignal, StopTrigger};
pub use timer::TimerQueue;
pub use transform::{RespondentAnswers, ResponseTransformer, TransformError};
