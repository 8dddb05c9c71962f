#![forbid(unsafe_code)]

//! Time sources.
//!
//! Monotonic time drives timers and animation; wall time only stamps
//! persisted rows. Both come from the same [`Clock`] so a test can pin them
//! together with [`DeterministicClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use web_time::Instant;

/// Monotonic and wall-clock time.
pub trait Clock {
    /// Elapsed time since an unspecified epoch, monotonically increasing.
    fn now_mono(&self) -> Duration;

    /// Current wall-clock time.
    fn now_wall(&self) -> DateTime<Utc>;
}

/// Real time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_mono(&self) -> Duration {
        self.start.elapsed()
    }

    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
///
/// Clones share the same time, so a test can hand one clone to the system
/// under test and advance another.
#[derive(Debug, Clone)]
pub struct DeterministicClock {
    nanos: Arc<AtomicU64>,
    wall_origin: DateTime<Utc>,
}

impl DeterministicClock {
    /// Create a clock at `0`, with wall time starting at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::with_wall_origin(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Create a clock at `0` whose wall time starts at `origin`.
    #[must_use]
    pub fn with_wall_origin(origin: DateTime<Utc>) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            wall_origin: origin,
        }
    }

    /// Set current monotonic time.
    pub fn set(&self, now: Duration) {
        self.nanos.store(saturating_nanos(now), Ordering::SeqCst);
    }

    /// Advance monotonic time by `dt`.
    pub fn advance(&self, dt: Duration) {
        let dt = saturating_nanos(dt);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_add(dt))
            });
    }
}

impl Default for DeterministicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for DeterministicClock {
    fn now_mono(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn now_wall(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.now_mono())
            .map_or(self.wall_origin, |offset| self.wall_origin + offset)
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_clock_clones_share_time() {
        let clock = DeterministicClock::new();
        let handle = clock.clone();
        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now_mono(), Duration::from_millis(250));
        clock.set(Duration::from_secs(2));
        assert_eq!(handle.now_mono(), Duration::from_secs(2));
    }

    #[test]
    fn deterministic_wall_time_tracks_mono() {
        let clock = DeterministicClock::new();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now_wall().timestamp(), 90);
    }

    #[test]
    fn advance_saturates() {
        let clock = DeterministicClock::new();
        clock.set(Duration::from_nanos(u64::MAX - 1));
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now_mono(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_mono();
        let b = clock.now_mono();
        assert!(b >= a);
    }
}
