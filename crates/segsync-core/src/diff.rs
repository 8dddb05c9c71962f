#![forbid(unsafe_code)]

//! Split diffs: how one split changed between two consecutive sequence
//! numbers.
//!
//! A [`SplitDiff`] carries two independent kinds of change:
//!
//! - **Membership** ([`MembershipDiff`]): keys that entered or left the
//!   split. Only meaningful on basis splits, where identity lives.
//! - **Positions** ([`PositionChange`] per display mode): every key whose
//!   split-relative position differs, tagged with a [`PointChange`].
//!
//! Position changes are expressed in split-relative coordinates, so the
//! delta `to - from` is the same number a client obtains by subtracting two
//! independently projected positions. The segment-group and segment origins
//! cancel, which lets clients apply deltas without re-deriving absolute
//! coordinates.
//!
//! Diffs are computed with [`SplitDiff::between`] and [`diff_splits`].
//! Unchanged splits produce `None` so an update payload only carries the
//! splits that moved.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::model::{
    ByDisplayMode, DisplayMode, GroupStats, PointKey, Position, Rect, ResponseGroup, Split,
};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What happened to one point's position in one display mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointChange {
    /// The point is new; it is placed by membership, not by delta.
    Added { at: Position },
    /// The point left the split.
    Removed,
    /// The point moved between two split-relative positions.
    Moved { from: Position, to: Position },
}

/// A [`PointChange`] for a specific key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionChange {
    pub key: PointKey,
    pub change: PointChange,
}

/// Keys that entered or left a split.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MembershipDiff {
    pub added: Vec<PointKey>,
    pub removed: Vec<PointKey>,
}

impl MembershipDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A response group whose statistics or segment bounds changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChange {
    pub display_mode: DisplayMode,
    pub group_index: usize,
    pub stats: GroupStats,
    pub bounds: Rect,
}

/// Minimal description of how one split changed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitDiff {
    pub points: MembershipDiff,
    #[serde(default)]
    pub groups: Vec<GroupChange>,
    /// New segment-group bounds, when they changed.
    #[serde(default)]
    pub segment_group_bounds: Option<Rect>,
    pub point_positions: ByDisplayMode<Vec<PositionChange>>,
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

impl SplitDiff {
    /// Diff two revisions of the same split.
    ///
    /// Output lists are sorted by key.
    #[must_use]
    pub fn between(old: &Split, new: &Split) -> Self {
        let points = membership(old, new);
        let groups = group_changes(old, new);
        let segment_group_bounds =
            (old.segment_group_bounds != new.segment_group_bounds).then_some(new.segment_group_bounds);
        let point_positions = ByDisplayMode {
            expanded: position_changes(old, new, DisplayMode::Expanded),
            collapsed: position_changes(old, new, DisplayMode::Collapsed),
        };
        Self {
            points,
            groups,
            segment_group_bounds,
            point_positions,
        }
    }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
            && self.groups.is_empty()
            && self.segment_group_bounds.is_none()
            && self.point_positions.expanded.is_empty()
            && self.point_positions.collapsed.is_empty()
    }

    /// Position changes for `mode`.
    #[must_use]
    pub fn positions(&self, mode: DisplayMode) -> &[PositionChange] {
        self.point_positions.get(mode)
    }
}

/// Diff two split arrays index by index.
///
/// Splits present only in `new` are diffed against an empty split; splits
/// present only in `old` are diffed against an empty one too, so their points
/// show up as removed. Unchanged splits yield `None`.
#[must_use]
pub fn diff_splits(old: &[Split], new: &[Split]) -> Vec<Option<SplitDiff>> {
    let empty = Split::default();
    let len = old.len().max(new.len());
    (0..len)
        .map(|i| {
            let diff = SplitDiff::between(old.get(i).unwrap_or(&empty), new.get(i).unwrap_or(&empty));
            (!diff.is_empty()).then_some(diff)
        })
        .collect()
}

fn membership(old: &Split, new: &Split) -> MembershipDiff {
    let old_keys: ahash::AHashSet<PointKey> = old.point_keys().collect();
    let new_keys: ahash::AHashSet<PointKey> = new.point_keys().collect();
    let mut added: Vec<PointKey> = new_keys.difference(&old_keys).copied().collect();
    let mut removed: Vec<PointKey> = old_keys.difference(&new_keys).copied().collect();
    added.sort_unstable();
    removed.sort_unstable();
    MembershipDiff { added, removed }
}

fn group_changes(old: &Split, new: &Split) -> Vec<GroupChange> {
    let mut changes = Vec::new();
    for mode in DisplayMode::ALL {
        let old_groups: &[ResponseGroup] = old.response_groups.get(mode);
        for (group_index, group) in new.response_groups.get(mode).iter().enumerate() {
            let unchanged = old_groups
                .get(group_index)
                .is_some_and(|prev| prev.stats == group.stats && prev.bounds == group.bounds);
            if !unchanged {
                changes.push(GroupChange {
                    display_mode: mode,
                    group_index,
                    stats: group.stats,
                    bounds: group.bounds,
                });
            }
        }
    }
    changes
}

fn position_changes(old: &Split, new: &Split, mode: DisplayMode) -> Vec<PositionChange> {
    let before: AHashMap<PointKey, Position> =
        old.placements(mode).map(|p| (p.key, p.position)).collect();
    let mut changes = Vec::new();
    let mut seen = ahash::AHashSet::with_capacity(before.len());

    for placement in new.placements(mode) {
        seen.insert(placement.key);
        let change = match before.get(&placement.key) {
            None => PointChange::Added {
                at: placement.position,
            },
            Some(&from) if from != placement.position => PointChange::Moved {
                from,
                to: placement.position,
            },
            Some(_) => continue,
        };
        changes.push(PositionChange {
            key: placement.key,
            change,
        });
    }
    for (&key, _) in before.iter().filter(|(k, _)| !seen.contains(*k)) {
        changes.push(PositionChange {
            key,
            change: PointChange::Removed,
        });
    }

    changes.sort_unstable_by_key(|c| c.key);
    changes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlacedPoint, ResponseGroups};

    fn split_with(points: &[(u32, f64)], sg_x: f64) -> Split {
        Split {
            basis_split_indices: vec![0],
            segment_group_bounds: Rect::new(sg_x, 0.0, 100.0, 100.0),
            response_groups: ResponseGroups {
                expanded: vec![ResponseGroup {
                    stats: GroupStats {
                        count: points.len() as u32,
                        total_weight: points.len() as f64,
                        proportion: 1.0,
                    },
                    points: points
                        .iter()
                        .map(|&(id, x)| PlacedPoint {
                            key: PointKey::new(0, 0, id),
                            x,
                            y: 0.0,
                        })
                        .collect(),
                    ..ResponseGroup::default()
                }],
                collapsed: vec![],
            },
        }
    }

    #[test]
    fn identical_splits_produce_empty_diff() {
        let s = split_with(&[(1, 1.0), (2, 2.0)], 0.0);
        assert!(SplitDiff::between(&s, &s).is_empty());
        assert_eq!(diff_splits(&[s.clone()], &[s]), vec![None]);
    }

    #[test]
    fn membership_and_positions_are_tagged() {
        let old = split_with(&[(1, 1.0), (2, 2.0)], 0.0);
        let new = split_with(&[(2, 4.0), (3, 6.0)], 0.0);
        let diff = SplitDiff::between(&old, &new);

        assert_eq!(diff.points.added, vec![PointKey::new(0, 0, 3)]);
        assert_eq!(diff.points.removed, vec![PointKey::new(0, 0, 1)]);
        assert_eq!(
            diff.positions(DisplayMode::Expanded),
            &[
                PositionChange {
                    key: PointKey::new(0, 0, 1),
                    change: PointChange::Removed,
                },
                PositionChange {
                    key: PointKey::new(0, 0, 2),
                    change: PointChange::Moved {
                        from: Position::new(2.0, 0.0),
                        to: Position::new(4.0, 0.0),
                    },
                },
                PositionChange {
                    key: PointKey::new(0, 0, 3),
                    change: PointChange::Added {
                        at: Position::new(6.0, 0.0)
                    },
                },
            ]
        );
        assert_eq!(diff.groups.len(), 0, "count unchanged (2 -> 2)");
    }

    #[test]
    fn segment_group_shift_moves_every_point() {
        let old = split_with(&[(1, 1.0)], 0.0);
        let new = split_with(&[(1, 1.0)], 10.0);
        let diff = SplitDiff::between(&old, &new);
        assert_eq!(diff.segment_group_bounds, Some(new.segment_group_bounds));
        assert!(diff.points.is_empty());
        assert_eq!(diff.positions(DisplayMode::Expanded).len(), 1);
    }

    #[test]
    fn stats_change_is_reported_per_group() {
        let old = split_with(&[(1, 1.0)], 0.0);
        let new = split_with(&[(1, 1.0), (2, 2.0)], 0.0);
        let diff = SplitDiff::between(&old, &new);
        assert_eq!(diff.groups.len(), 1);
        assert_eq!(diff.groups[0].stats.count, 2);
        assert_eq!(diff.groups[0].display_mode, DisplayMode::Expanded);
    }

    #[test]
    fn diff_splits_handles_length_changes() {
        let a = split_with(&[(1, 1.0)], 0.0);
        let diffs = diff_splits(&[a.clone()], &[a.clone(), a.clone()]);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].is_none());
        assert_eq!(diffs[1].as_ref().unwrap().points.added.len(), 1);

        let shrink = diff_splits(&[a.clone(), a], &[split_with(&[(1, 1.0)], 0.0)]);
        assert_eq!(shrink[1].as_ref().unwrap().points.removed.len(), 1);
    }

    #[test]
    fn point_change_serializes_with_kind_tag() {
        let json = serde_json::to_string(&PointChange::Moved {
            from: Position::new(0.0, 0.0),
            to: Position::new(1.0, 2.0),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"kind":"moved","from":{"x":0.0,"y":0.0},"to":{"x":1.0,"y":2.0}}"#
        );
    }
}
