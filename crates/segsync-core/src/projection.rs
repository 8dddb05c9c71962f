#![forbid(unsafe_code)]

//! Per-viewer projection of canonical state into visible points.
//!
//! # Overview
//!
//! A [`Projection`] maps every point identity in the basis splits to its
//! split-relative position under the viewer's current view. Identity comes
//! from basis splits only; view splits only ever contribute geometry. This is
//! what lets a point keep its key while the viewer toggles grouping questions.
//!
//! Three operations maintain it:
//!
//! - [`project`]: full computation from scratch.
//! - [`apply_server_update`]: incremental update along the server-data axis.
//!   Uses split diffs when the update is the immediate successor of the
//!   projection's sequence number, otherwise falls back to a full projection
//!   followed by a key-set comparison.
//! - [`apply_view_change`]: re-derives positions for all current keys under a
//!   new view or display mode. Keys never change on this axis.
//!
//! All three mutate the projection in place. None of them copy the map.
//!
//! # Invariants
//!
//! 1. `projection.keys() ⊆ identity universe` of the state it was computed from.
//! 2. For a fixed state, the key set is identical for every view.
//! 3. An update whose sequence number is not newer than the projection's is a
//!    no-op with an empty diff.
//! 4. Diff lists are sorted by key.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use tracing::{debug, trace, trace_span};

use crate::diff::{PointChange, SplitDiff};
use crate::error::Result;
use crate::model::{
    DisplayMode, Offset, PointKey, Position, ServerState, SplitIndex, ViewMaps, ViewPreferences,
};

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// One visible point.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedPoint {
    pub point: PointKey,
    pub x: f64,
    pub y: f64,
    /// Icon of the response group that currently contains the point.
    pub image: Option<String>,
}

impl ProjectedPoint {
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Owned `PointKey -> ProjectedPoint` map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    points: AHashMap<PointKey, ProjectedPoint>,
}

impl Projection {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: AHashMap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn get(&self, key: &PointKey) -> Option<&ProjectedPoint> {
        self.points.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &PointKey) -> bool {
        self.points.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PointKey> {
        self.points.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PointKey, &ProjectedPoint)> {
        self.points.iter()
    }

    /// Keys in sorted order.
    #[must_use]
    pub fn sorted_keys(&self) -> Vec<PointKey> {
        let mut keys: Vec<PointKey> = self.points.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    fn insert(&mut self, point: ProjectedPoint) {
        self.points.insert(point.point, point);
    }
}

/// Which keys a projection operation touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionDiff {
    pub added: Vec<PointKey>,
    pub removed: Vec<PointKey>,
    pub moved: Vec<PointKey>,
    /// Keys whose icon changed. Only populated by view changes.
    pub image_changed: Vec<PointKey>,
}

impl ProjectionDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.moved.is_empty()
            && self.image_changed.is_empty()
    }

    /// Number of touched keys, counting a key once per list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.moved.len() + self.image_changed.len()
    }

    fn sort(&mut self) {
        self.added.sort_unstable();
        self.removed.sort_unstable();
        self.moved.sort_unstable();
        self.image_changed.sort_unstable();
    }
}

/// How a server update was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePath {
    /// Sequence number not newer than the current one; nothing applied.
    Stale,
    /// Immediate successor with diffs; applied incrementally.
    Incremental,
    /// Sequence gap, missing diffs, or an unplaceable point; full recompute.
    Full,
}

/// Result of [`apply_server_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub path: UpdatePath,
    pub diff: ProjectionDiff,
}

// ---------------------------------------------------------------------------
// Full projection
// ---------------------------------------------------------------------------

/// Project `state` under `prefs`.
///
/// Fails with [`SyncError::InvalidViewId`](crate::SyncError::InvalidViewId)
/// if the view id does not resolve. Points found in view splits but absent
/// from every basis split are dropped.
pub fn project(state: &ServerState, prefs: &ViewPreferences, view_maps: &ViewMaps) -> Result<Projection> {
    let _span = trace_span!("segsync.project", sequence = state.sequence_number).entered();
    let universe = state.identity_universe()?;
    let view_splits = view_maps.resolve(&prefs.view_id)?;
    let mut projection = Projection::with_capacity(universe.len());
    let mut stragglers = 0usize;

    for &index in view_splits {
        for placement in state.split(index)?.placements(prefs.display_mode) {
            if !universe.contains(&placement.key) {
                stragglers += 1;
                continue;
            }
            projection.insert(ProjectedPoint {
                point: placement.key,
                x: placement.position.x,
                y: placement.position.y,
                image: placement.image.map(str::to_owned),
            });
        }
    }

    trace!(
        view_id = %prefs.view_id,
        mode = prefs.display_mode.as_str(),
        points = projection.len(),
        stragglers,
        "projected server state"
    );
    Ok(projection)
}

/// Compare two complete projections by key set and position.
#[must_use]
pub fn diff_projections(old: &Projection, new: &Projection) -> ProjectionDiff {
    let mut diff = ProjectionDiff::default();
    for (key, point) in new.iter() {
        match old.get(key) {
            None => diff.added.push(*key),
            Some(prev) => {
                if prev.x != point.x || prev.y != point.y {
                    diff.moved.push(*key);
                }
                if prev.image != point.image {
                    diff.image_changed.push(*key);
                }
            }
        }
    }
    diff.removed = old.keys().filter(|k| !new.contains(k)).copied().collect();
    diff.sort();
    diff
}

// ---------------------------------------------------------------------------
// Server-data axis
// ---------------------------------------------------------------------------

/// Apply a new server state to `projection`, which currently reflects
/// `current_sequence`.
///
/// `diffs` is indexed by split index and is only used when
/// `new_state.sequence_number == current_sequence + 1`. An empty list for a
/// non-empty split array counts as no diffs at all.
pub fn apply_server_update(
    projection: &mut Projection,
    current_sequence: u64,
    new_state: &ServerState,
    diffs: Option<&[Option<SplitDiff>]>,
    prefs: &ViewPreferences,
    view_maps: &ViewMaps,
) -> Result<UpdateOutcome> {
    let to_sequence = new_state.sequence_number;
    if to_sequence <= current_sequence {
        debug!(
            current_sequence,
            to_sequence, "ignoring server update that is not newer than the projection"
        );
        return Ok(UpdateOutcome {
            path: UpdatePath::Stale,
            diff: ProjectionDiff::default(),
        });
    }

    let diffs = diffs.filter(|d| !d.is_empty() || new_state.splits.is_empty());
    if to_sequence == current_sequence + 1
        && let Some(diffs) = diffs
    {
        if let Some(plan) = plan_incremental(projection, new_state, diffs, prefs, view_maps)? {
            return Ok(UpdateOutcome {
                path: UpdatePath::Incremental,
                diff: plan.commit(projection),
            });
        }
        debug!(
            to_sequence,
            "incremental update could not place every added point; recomputing"
        );
    }

    let diff = replace_with_full(projection, new_state, prefs, view_maps)?;
    Ok(UpdateOutcome {
        path: UpdatePath::Full,
        diff,
    })
}

/// Replace `projection` with a fresh projection of `state`, returning the
/// key-set diff. Ignores sequence numbers.
pub fn replace_with_full(
    projection: &mut Projection,
    state: &ServerState,
    prefs: &ViewPreferences,
    view_maps: &ViewMaps,
) -> Result<ProjectionDiff> {
    let fresh = project(state, prefs, view_maps)?;
    let diff = diff_projections(projection, &fresh);
    *projection = fresh;
    Ok(diff)
}

/// Pending incremental changes, collected before any mutation so a failed
/// placement can fall back to the full path with the projection untouched.
struct IncrementalPlan {
    removals: Vec<PointKey>,
    insertions: Vec<ProjectedPoint>,
    moves: Vec<(PointKey, Offset)>,
}

impl IncrementalPlan {
    fn commit(self, projection: &mut Projection) -> ProjectionDiff {
        let mut diff = ProjectionDiff::default();
        for key in self.removals {
            if projection.points.remove(&key).is_some() {
                diff.removed.push(key);
            }
        }
        let mut added = AHashSet::with_capacity(self.insertions.len());
        for point in self.insertions {
            added.insert(point.point);
            diff.added.push(point.point);
            projection.insert(point);
        }
        for (key, delta) in self.moves {
            if added.contains(&key) || delta.is_zero() {
                continue;
            }
            if let Some(point) = projection.points.get_mut(&key) {
                point.x += delta.dx;
                point.y += delta.dy;
                diff.moved.push(key);
            }
        }
        diff.sort();
        diff.moved.dedup();
        diff
    }
}

fn plan_incremental(
    projection: &Projection,
    new_state: &ServerState,
    diffs: &[Option<SplitDiff>],
    prefs: &ViewPreferences,
    view_maps: &ViewMaps,
) -> Result<Option<IncrementalPlan>> {
    let view_splits = view_maps.resolve(&prefs.view_id)?;
    let mode = prefs.display_mode;
    let mut plan = IncrementalPlan {
        removals: Vec::new(),
        insertions: Vec::new(),
        moves: Vec::new(),
    };

    // Identity pass over basis split diffs.
    let mut located: AHashMap<SplitIndex, AHashMap<PointKey, ProjectedPoint>> = AHashMap::new();
    for &basis in &new_state.basis_split_indices {
        let Some(Some(diff)) = diffs.get(basis) else {
            continue;
        };
        plan.removals.extend(diff.points.removed.iter().copied());
        if diff.points.added.is_empty() {
            continue;
        }

        let mut host = None;
        for &view_index in view_splits {
            if new_state.split(view_index)?.covers_basis(basis) {
                host = Some(view_index);
                break;
            }
        }
        let Some(host) = host else {
            return Ok(None);
        };
        if !located.contains_key(&host) {
            located.insert(host, locate_points(new_state, host, mode)?);
        }
        let index = &located[&host];
        for key in &diff.points.added {
            if projection.contains(key) {
                continue;
            }
            let Some(point) = index.get(key) else {
                return Ok(None);
            };
            plan.insertions.push(point.clone());
        }
    }

    // Position pass over view split diffs. Added entries were placed above.
    for &view_index in view_splits {
        let Some(Some(diff)) = diffs.get(view_index) else {
            continue;
        };
        for change in diff.positions(mode) {
            if let PointChange::Moved { from, to } = change.change {
                plan.moves.push((change.key, to - from));
            }
        }
    }

    Ok(Some(plan))
}

fn locate_points(
    state: &ServerState,
    split_index: SplitIndex,
    mode: DisplayMode,
) -> Result<AHashMap<PointKey, ProjectedPoint>> {
    Ok(state
        .split(split_index)?
        .placements(mode)
        .map(|p| {
            (
                p.key,
                ProjectedPoint {
                    point: p.key,
                    x: p.position.x,
                    y: p.position.y,
                    image: p.image.map(str::to_owned),
                },
            )
        })
        .collect())
}

// ---------------------------------------------------------------------------
// View-preference axis
// ---------------------------------------------------------------------------

/// Re-derive every current key's position under `new_prefs`.
///
/// Keys are never added or removed here. Keys whose position is unchanged
/// are left untouched.
pub fn apply_view_change(
    projection: &mut Projection,
    state: &ServerState,
    new_prefs: &ViewPreferences,
    view_maps: &ViewMaps,
) -> Result<ProjectionDiff> {
    let view_splits = view_maps.resolve(&new_prefs.view_id)?;
    let mut diff = ProjectionDiff::default();

    for &index in view_splits {
        for placement in state.split(index)?.placements(new_prefs.display_mode) {
            let Some(point) = projection.points.get_mut(&placement.key) else {
                continue;
            };
            if point.x != placement.position.x || point.y != placement.position.y {
                point.x = placement.position.x;
                point.y = placement.position.y;
                diff.moved.push(placement.key);
            }
            if point.image.as_deref() != placement.image {
                point.image = placement.image.map(str::to_owned);
                diff.image_changed.push(placement.key);
            }
        }
    }

    diff.sort();
    debug!(
        view_id = %new_prefs.view_id,
        mode = new_prefs.display_mode.as_str(),
        moved = diff.moved.len(),
        image_changed = diff.image_changed.len(),
        "applied view change"
    );
    Ok(diff)
}

// ---------------------------------------------------------------------------
// ProjectionUpdater
// ---------------------------------------------------------------------------

/// Stateful wrapper owning one visualization's logical projection.
///
/// Holds the latest server state (needed to re-derive positions on view
/// changes), the viewer's preferences, and the immutable view maps.
#[derive(Debug, Clone)]
pub struct ProjectionUpdater {
    state: ServerState,
    prefs: ViewPreferences,
    view_maps: Arc<ViewMaps>,
    projection: Projection,
}

impl ProjectionUpdater {
    /// Build the initial projection.
    pub fn new(state: ServerState, prefs: ViewPreferences, view_maps: Arc<ViewMaps>) -> Result<Self> {
        let projection = project(&state, &prefs, &view_maps)?;
        Ok(Self {
            state,
            prefs,
            view_maps,
            projection,
        })
    }

    /// Apply an `update` carrying the successor state and its split diffs.
    pub fn apply_server_update(
        &mut self,
        new_state: ServerState,
        diffs: Option<&[Option<SplitDiff>]>,
    ) -> Result<UpdateOutcome> {
        let outcome = apply_server_update(
            &mut self.projection,
            self.state.sequence_number,
            &new_state,
            diffs,
            &self.prefs,
            &self.view_maps,
        )?;
        if outcome.path != UpdatePath::Stale {
            self.state = new_state;
        }
        Ok(outcome)
    }

    /// Replace the state wholesale (snapshot resync), regardless of sequence.
    pub fn resync(&mut self, new_state: ServerState) -> Result<ProjectionDiff> {
        let diff = replace_with_full(&mut self.projection, &new_state, &self.prefs, &self.view_maps)?;
        self.state = new_state;
        Ok(diff)
    }

    /// Switch to new view preferences.
    pub fn apply_view_change(&mut self, prefs: ViewPreferences) -> Result<ProjectionDiff> {
        let diff = apply_view_change(&mut self.projection, &self.state, &prefs, &self.view_maps)?;
        self.prefs = prefs;
        Ok(diff)
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[must_use]
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.state.sequence_number
    }

    #[must_use]
    pub fn preferences(&self) -> &ViewPreferences {
        &self.prefs
    }

    #[must_use]
    pub fn view_maps(&self) -> &Arc<ViewMaps> {
        &self.view_maps
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_splits;
    use crate::error::SyncError;
    use crate::model::{
        GroupStats, PlacedPoint, Rect, ResponseGroup, ResponseGroups, Split, ViewId,
    };

    // Two basis splits (0, 1) and one aggregate view split (2).
    // View "" shows split 2; view "0" shows splits 0 and 1.
    fn group(points: Vec<PlacedPoint>, x: f64, image: &str) -> ResponseGroup {
        ResponseGroup {
            label: String::new(),
            stats: GroupStats {
                count: points.len() as u32,
                total_weight: points.len() as f64,
                proportion: 1.0,
            },
            bounds: Rect::new(x, 0.0, 10.0, 10.0),
            image: Some(image.to_owned()),
            points,
        }
    }

    fn pt(split: usize, id: u32, x: f64, y: f64) -> PlacedPoint {
        PlacedPoint {
            key: PointKey::new(split, 0, id),
            x,
            y,
        }
    }

    fn basis(index: usize, ids: &[u32], sg_x: f64) -> Split {
        let points: Vec<_> = ids.iter().map(|&id| pt(index, id, id as f64, 1.0)).collect();
        Split {
            basis_split_indices: vec![index],
            segment_group_bounds: Rect::new(sg_x, 0.0, 50.0, 50.0),
            response_groups: ResponseGroups {
                expanded: vec![group(points.clone(), 2.0, "dot")],
                collapsed: vec![group(points, 0.0, "square")],
            },
        }
    }

    fn aggregate(a: &[u32], b: &[u32]) -> Split {
        let mut points: Vec<_> = a.iter().map(|&id| pt(0, id, id as f64, 2.0)).collect();
        points.extend(b.iter().map(|&id| pt(1, id, 20.0 + id as f64, 2.0)));
        Split {
            basis_split_indices: vec![0, 1],
            segment_group_bounds: Rect::new(200.0, 0.0, 100.0, 50.0),
            response_groups: ResponseGroups {
                expanded: vec![group(points.clone(), 4.0, "dot")],
                collapsed: vec![group(points, 0.0, "square")],
            },
        }
    }

    fn state(a: &[u32], b: &[u32], seq: u64) -> ServerState {
        ServerState::new(
            vec![basis(0, a, 0.0), basis(1, b, 100.0), aggregate(a, b)],
            vec![0, 1],
            seq,
        )
    }

    fn maps() -> ViewMaps {
        [(ViewId::base(), vec![2]), (ViewId::new("0"), vec![0, 1])]
            .into_iter()
            .collect()
    }

    fn base_prefs() -> ViewPreferences {
        ViewPreferences::new(ViewId::base(), DisplayMode::Expanded)
    }

    // ── project ─────────────────────────────────────────────────────

    #[test]
    fn project_uses_view_geometry_and_basis_identity() {
        let s = state(&[1, 2], &[3], 1);
        let p = project(&s, &base_prefs(), &maps()).unwrap();
        assert_eq!(p.len(), 3);
        let point = p.get(&PointKey::new(0, 0, 1)).unwrap();
        // 200 (segment group) + 4 (segment) + 1 (point)
        assert_eq!((point.x, point.y), (205.0, 2.0));
        assert_eq!(point.image.as_deref(), Some("dot"));
    }

    #[test]
    fn project_rejects_unknown_view() {
        let s = state(&[1], &[], 1);
        let prefs = ViewPreferences::new(ViewId::new("9"), DisplayMode::Expanded);
        assert_eq!(
            project(&s, &prefs, &maps()),
            Err(SyncError::InvalidViewId(ViewId::new("9")))
        );
    }

    #[test]
    fn project_drops_stragglers_outside_identity_universe() {
        let mut s = state(&[1], &[], 1);
        s.splits[2].response_groups.expanded[0]
            .points
            .push(pt(7, 7, 0.0, 0.0));
        let p = project(&s, &base_prefs(), &maps()).unwrap();
        assert_eq!(p.sorted_keys(), vec![PointKey::new(0, 0, 1)]);
    }

    // ── apply_server_update ─────────────────────────────────────────

    #[test]
    fn stale_update_is_a_no_op() {
        let s = state(&[1, 2], &[3], 5);
        let mut p = project(&s, &base_prefs(), &maps()).unwrap();
        let before = p.clone();
        for seq in [3, 5] {
            let older = state(&[9], &[], seq);
            let outcome =
                apply_server_update(&mut p, 5, &older, None, &base_prefs(), &maps()).unwrap();
            assert_eq!(outcome.path, UpdatePath::Stale);
            assert!(outcome.diff.is_empty());
        }
        assert_eq!(p, before);
    }

    #[test]
    fn incremental_update_matches_full_projection() {
        let old = state(&[1, 2], &[3], 1);
        let new = state(&[2, 4], &[3, 5], 2);
        let diffs = diff_splits(&old.splits, &new.splits);

        let mut p = project(&old, &base_prefs(), &maps()).unwrap();
        let outcome =
            apply_server_update(&mut p, 1, &new, Some(&diffs), &base_prefs(), &maps()).unwrap();

        assert_eq!(outcome.path, UpdatePath::Incremental);
        assert_eq!(
            outcome.diff.added,
            vec![PointKey::new(0, 0, 4), PointKey::new(1, 0, 5)]
        );
        assert_eq!(outcome.diff.removed, vec![PointKey::new(0, 0, 1)]);
        assert_eq!(p, project(&new, &base_prefs(), &maps()).unwrap());
    }

    #[test]
    fn sequence_gap_takes_full_path() {
        let old = state(&[1], &[], 1);
        let new = state(&[1, 2], &[], 4);
        let diffs = diff_splits(&old.splits, &new.splits);
        let mut p = project(&old, &base_prefs(), &maps()).unwrap();
        let outcome =
            apply_server_update(&mut p, 1, &new, Some(&diffs), &base_prefs(), &maps()).unwrap();
        assert_eq!(outcome.path, UpdatePath::Full);
        assert_eq!(outcome.diff.added, vec![PointKey::new(0, 0, 2)]);
    }

    #[test]
    fn missing_diff_takes_full_path() {
        let old = state(&[1], &[], 1);
        let new = state(&[1, 2], &[], 2);
        let mut p = project(&old, &base_prefs(), &maps()).unwrap();
        let outcome = apply_server_update(&mut p, 1, &new, None, &base_prefs(), &maps()).unwrap();
        assert_eq!(outcome.path, UpdatePath::Full);
        assert_eq!(p, project(&new, &base_prefs(), &maps()).unwrap());
    }

    #[test]
    fn empty_diff_list_takes_full_path() {
        let old = state(&[1], &[], 1);
        let new = state(&[1, 2], &[], 2);
        let mut p = project(&old, &base_prefs(), &maps()).unwrap();
        let outcome =
            apply_server_update(&mut p, 1, &new, Some(&[][..]), &base_prefs(), &maps()).unwrap();
        assert_eq!(outcome.path, UpdatePath::Full);
        assert_eq!(outcome.diff.added, vec![PointKey::new(0, 0, 2)]);
        assert_eq!(p, project(&new, &base_prefs(), &maps()).unwrap());
    }

    #[test]
    fn unplaceable_added_point_falls_back_without_partial_mutation() {
        let old = state(&[1], &[], 1);
        let mut new = state(&[1, 2], &[], 2);
        let diffs = diff_splits(&old.splits, &new.splits);
        // The aggregate view split forgot point 2; the full path drops it too.
        new.splits[2].response_groups.expanded[0]
            .points
            .retain(|p| p.key.local_id != 2);

        let mut p = project(&old, &base_prefs(), &maps()).unwrap();
        let outcome =
            apply_server_update(&mut p, 1, &new, Some(&diffs), &base_prefs(), &maps()).unwrap();
        assert_eq!(outcome.path, UpdatePath::Full);
        assert!(outcome.diff.added.is_empty());
    }

    // ── apply_view_change ───────────────────────────────────────────

    #[test]
    fn view_change_keeps_keys_and_moves_points() {
        let s = state(&[1, 2], &[3], 1);
        let mut p = project(&s, &base_prefs(), &maps()).unwrap();
        let keys = p.sorted_keys();

        let grouped = ViewPreferences::new(ViewId::new("0"), DisplayMode::Expanded);
        let diff = apply_view_change(&mut p, &s, &grouped, &maps()).unwrap();
        assert_eq!(p.sorted_keys(), keys);
        assert_eq!(diff.moved.len(), 3);
        assert!(diff.added.is_empty() && diff.removed.is_empty());
        assert_eq!(p, project(&s, &grouped, &maps()).unwrap());
    }

    #[test]
    fn display_mode_change_reports_image_changes() {
        let s = state(&[1], &[], 1);
        let mut p = project(&s, &base_prefs(), &maps()).unwrap();
        let collapsed = ViewPreferences::new(ViewId::base(), DisplayMode::Collapsed);
        let diff = apply_view_change(&mut p, &s, &collapsed, &maps()).unwrap();
        assert_eq!(diff.image_changed, vec![PointKey::new(0, 0, 1)]);
        assert_eq!(
            p.get(&PointKey::new(0, 0, 1)).unwrap().image.as_deref(),
            Some("square")
        );
    }

    #[test]
    fn repeated_view_change_is_empty() {
        let s = state(&[1, 2], &[], 1);
        let mut p = project(&s, &base_prefs(), &maps()).unwrap();
        let diff = apply_view_change(&mut p, &s, &base_prefs(), &maps()).unwrap();
        assert!(diff.is_empty());
    }

    // ── ProjectionUpdater ───────────────────────────────────────────

    #[test]
    fn updater_tracks_sequence_and_preferences() {
        let maps = Arc::new(maps());
        let mut updater = ProjectionUpdater::new(state(&[1], &[], 1), base_prefs(), maps).unwrap();
        let next = state(&[1, 2], &[], 2);
        let diffs = diff_splits(&updater.state().splits, &next.splits);
        let outcome = updater.apply_server_update(next, Some(&diffs)).unwrap();
        assert_eq!(outcome.path, UpdatePath::Incremental);
        assert_eq!(updater.sequence_number(), 2);

        let stale = updater.apply_server_update(state(&[], &[], 2), None).unwrap();
        assert_eq!(stale.path, UpdatePath::Stale);
        assert_eq!(updater.projection().len(), 2);

        let prefs = ViewPreferences::new(ViewId::new("0"), DisplayMode::Collapsed);
        updater.apply_view_change(prefs.clone()).unwrap();
        assert_eq!(updater.preferences(), &prefs);
    }

    #[test]
    fn updater_resync_ignores_sequence_regression() {
        let maps = Arc::new(maps());
        let mut updater = ProjectionUpdater::new(state(&[1], &[], 8), base_prefs(), maps).unwrap();
        let diff = updater.resync(state(&[4], &[], 0)).unwrap();
        assert_eq!(diff.added, vec![PointKey::new(0, 0, 4)]);
        assert_eq!(diff.removed, vec![PointKey::new(0, 0, 1)]);
        assert_eq!(updater.sequence_number(), 0);
    }
}
