#![forbid(unsafe_code)]

//! Virtual-time timer queue.
//!
//! One deadline per key. Re-arming a key replaces its deadline. Expired keys
//! pop in deadline order, ties broken by arm order, so a driver that calls
//! [`TimerQueue::pop_expired`] with the same `now` sequence always observes
//! the same firing order.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::Duration;

use ahash::AHashMap;

#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    by_deadline: BTreeMap<(Duration, u64), K>,
    by_key: AHashMap<K, (Duration, u64)>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> TimerQueue<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_deadline: BTreeMap::new(),
            by_key: AHashMap::new(),
            next_seq: 0,
        }
    }

    /// Arm `key` to fire at `deadline`, returning the deadline it replaced.
    pub fn arm(&mut self, key: K, deadline: Duration) -> Option<Duration> {
        let previous = self.cancel(&key);
        let slot = (deadline, self.next_seq);
        self.next_seq += 1;
        self.by_deadline.insert(slot, key.clone());
        self.by_key.insert(key, slot);
        previous
    }

    /// Disarm `key`, returning its deadline if it was armed.
    pub fn cancel(&mut self, key: &K) -> Option<Duration> {
        let slot = self.by_key.remove(key)?;
        self.by_deadline.remove(&slot);
        Some(slot.0)
    }

    #[must_use]
    pub fn deadline(&self, key: &K) -> Option<Duration> {
        self.by_key.get(key).map(|slot| slot.0)
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.by_deadline.keys().next().map(|slot| slot.0)
    }

    /// Remove and return every key whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Duration) -> Vec<K> {
        let mut fired = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.by_key.remove(&key);
            fired.push(key);
        }
        fired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn rearm_replaces_deadline() {
        let mut q = TimerQueue::new();
        assert_eq!(q.arm("a", ms(100)), None);
        assert_eq!(q.arm("a", ms(300)), Some(ms(100)));
        assert_eq!(q.len(), 1);
        assert!(q.pop_expired(ms(200)).is_empty());
        assert_eq!(q.pop_expired(ms(300)), vec!["a"]);
        assert!(q.is_empty());
    }

    #[test]
    fn ties_fire_in_arm_order() {
        let mut q = TimerQueue::new();
        q.arm(3, ms(50));
        q.arm(1, ms(50));
        q.arm(2, ms(10));
        assert_eq!(q.next_deadline(), Some(ms(10)));
        assert_eq!(q.pop_expired(ms(50)), vec![2, 3, 1]);
    }

    #[test]
    fn cancel_disarms() {
        let mut q = TimerQueue::new();
        q.arm('x', ms(5));
        assert_eq!(q.cancel(&'x'), Some(ms(5)));
        assert_eq!(q.cancel(&'x'), None);
        assert_eq!(q.next_deadline(), None);
    }
}
