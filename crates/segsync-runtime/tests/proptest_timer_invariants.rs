//! Property-based invariant tests for the virtual-time timer queue.
//!
//! 1. At most one deadline per key; `len` equals the number of armed keys
//! 2. `pop_expired(now)` returns exactly the keys with deadline `<= now`
//! 3. Fired keys come out sorted by deadline, ties in arm order
//! 4. `next_deadline` is the minimum armed deadline
//! 5. Determinism: the same operations yield the same firing order

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;
use segsync_runtime::TimerQueue;

// ── Strategies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Arm(u8, u16),
    Cancel(u8),
    Pop(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..16, 0u16..1000).prop_map(|(k, d)| Op::Arm(k, d)),
        1 => (0u8..16).prop_map(Op::Cancel),
        1 => (0u16..1000).prop_map(Op::Pop),
    ]
}

fn ms(v: u16) -> Duration {
    Duration::from_millis(u64::from(v))
}

/// Reference model: key -> (deadline, arm order).
fn run(ops: &[Op]) -> (Vec<Vec<u8>>, TimerQueue<u8>, BTreeMap<u8, (u16, u64)>) {
    let mut queue = TimerQueue::new();
    let mut model: BTreeMap<u8, (u16, u64)> = BTreeMap::new();
    let mut seq = 0u64;
    let mut fired = Vec::new();
    for op in ops {
        match *op {
            Op::Arm(k, d) => {
                queue.arm(k, ms(d));
                model.insert(k, (d, seq));
                seq += 1;
            }
            Op::Cancel(k) => {
                let expected = model.remove(&k).map(|(d, _)| ms(d));
                assert_eq!(queue.cancel(&k), expected);
            }
            Op::Pop(now) => {
                let mut due: Vec<(u16, u64, u8)> = model
                    .iter()
                    .filter(|(_, (d, _))| *d <= now)
                    .map(|(&k, &(d, s))| (d, s, k))
                    .collect();
                due.sort_unstable();
                for (_, _, k) in &due {
                    model.remove(k);
                }
                let got = queue.pop_expired(ms(now));
                let want: Vec<u8> = due.into_iter().map(|(_, _, k)| k).collect();
                assert_eq!(got, want);
                fired.push(got);
            }
        }
    }
    (fired, queue, model)
}

// ═════════════════════════════════════════════════════════════════════════
// 1–4. Queue agrees with the reference model
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn queue_matches_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let (_, queue, model) = run(&ops);
        prop_assert_eq!(queue.len(), model.len());
        prop_assert_eq!(
            queue.next_deadline(),
            model.values().map(|(d, _)| ms(*d)).min()
        );
        for (k, (d, _)) in &model {
            prop_assert_eq!(queue.deadline(k), Some(ms(*d)));
        }
    }

    #[test]
    fn draining_everything_empties_the_queue(
        ops in proptest::collection::vec(op_strategy(), 0..100)
    ) {
        let (_, mut queue, model) = run(&ops);
        let drained = queue.pop_expired(Duration::MAX);
        prop_assert_eq!(drained.len(), model.len());
        prop_assert!(queue.is_empty());
        prop_assert_eq!(queue.next_deadline(), None);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Determinism
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn same_ops_same_firing_order(ops in proptest::collection::vec(op_strategy(), 0..150)) {
        let (a, _, _) = run(&ops);
        let (b, _, _) = run(&ops);
        prop_assert_eq!(a, b);
    }
}
