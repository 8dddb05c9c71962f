#![forbid(unsafe_code)]

//! Cooperative stop signal for the driver thread.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

type Shared = Arc<(Mutex<bool>, Condvar)>;

/// Observed by the driver loop; set through the paired [`StopTrigger`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Shared,
}

impl StopSignal {
    /// Create a new `(signal, trigger)` pair.
    #[must_use]
    pub fn new() -> (Self, StopTrigger) {
        let inner: Shared = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Self {
            inner: Arc::clone(&inner),
        };
        (signal, StopTrigger { inner })
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Wait for either the stop signal or a timeout.
    ///
    /// Returns `true` if stopped, `false` if timed out.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (mutex, cvar) = &*self.inner;
        let stopped = lock(mutex);
        if *stopped {
            return true;
        }
        let (stopped, _) = cvar
            .wait_timeout_while(stopped, duration, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped
    }
}

/// Sets the paired [`StopSignal`].
#[derive(Debug, Clone)]
pub struct StopTrigger {
    inner: Shared,
}

impl StopTrigger {
    pub fn stop(&self) {
        let (mutex, cvar) = &*self.inner;
        *lock(mutex) = true;
        cvar.notify_all();
    }
}

fn lock(mutex: &Mutex<bool>) -> MutexGuard<'_, bool> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn new_signal_is_not_stopped() {
        let (signal, _trigger) = StopSignal::new();
        assert!(!signal.is_stopped());
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn trigger_wakes_waiter() {
        let (signal, trigger) = StopSignal::new();
        let waiter = thread::spawn(move || signal.wait_timeout(Duration::from_secs(30)));
        trigger.stop();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn stop_is_sticky() {
        let (signal, trigger) = StopSignal::new();
        trigger.stop();
        assert!(signal.is_stopped());
        assert!(signal.wait_timeout(Duration::ZERO));
    }
}
