#![forbid(unsafe_code)]

//! Canonical data model: point identity, splits, server state, and views.
//!
//! # Coordinate spaces
//!
//! Geometry is resolution independent. Each [`Split`] carries the bounds of
//! its segment group; each [`ResponseGroup`] carries segment bounds relative
//! to that segment group; each [`PlacedPoint`] is relative to its segment.
//! The *split-relative* position of a point is therefore
//!
//! ```text
//! x = segment_group_bounds.x + segment.bounds.x + point.x
//! y = segment_group_bounds.y + segment.bounds.y + point.y
//! ```
//!
//! and that is the only coordinate space the projection layer ever stores.
//!
//! # Invariants
//!
//! 1. A [`PointKey`] is immutable and unique within one visualization's
//!    canonical state. Its `split_index` names the *basis* split that owns it.
//! 2. View splits reference the same keys as the basis splits they aggregate;
//!    they never mint new identities.
//! 3. [`ViewMaps`] is fixed for a visualization's lifetime and every entry
//!    must resolve to a non-empty split list.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Sub};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Index into [`ServerState::splits`].
pub type SplitIndex = usize;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Poll session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visualization identifier, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VizId(pub String);

impl VizId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VizId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VizId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Canonical encoding of which grouping questions are active.
///
/// The encoding is the sorted, de-duplicated list of active question indices
/// joined by `,`. The empty string is the base view (no grouping question
/// active).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(String);

impl ViewId {
    /// Wrap an already-canonical view id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The base view: no grouping question active.
    #[must_use]
    pub fn base() -> Self {
        Self(String::new())
    }

    /// Build the canonical id for a set of active grouping questions.
    ///
    /// Order and duplicates in `active` do not matter.
    #[must_use]
    pub fn from_active_questions(active: &[usize]) -> Self {
        let mut sorted = active.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let parts: Vec<String> = sorted.iter().map(usize::to_string).collect();
        Self(parts.join(","))
    }

    /// Parse the active question indices back out of the id.
    ///
    /// Returns `None` if any component is not an unsigned integer.
    #[must_use]
    pub fn active_questions(&self) -> Option<Vec<usize>> {
        if self.0.is_empty() {
            return Some(Vec::new());
        }
        self.0.split(',').map(|part| part.parse().ok()).collect()
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Point identity and geometry
// ---------------------------------------------------------------------------

/// Stable identity of one respondent-contributed point.
///
/// Ordered by `(split_index, expanded_group_index, local_id)` so diff lists
/// can be emitted in a deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointKey {
    /// Basis split that owns the point.
    pub split_index: SplitIndex,
    /// Response group index in expanded display mode.
    pub expanded_group_index: usize,
    /// Identifier local to `(split_index, expanded_group_index)`.
    pub local_id: u32,
}

impl PointKey {
    #[must_use]
    pub const fn new(split_index: SplitIndex, expanded_group_index: usize, local_id: u32) -> Self {
        Self {
            split_index,
            expanded_group_index,
            local_id,
        }
    }
}

/// Composite identity string, `split-group-local`.
impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.split_index, self.expanded_group_index, self.local_id
        )
    }
}

/// A point in abstract, resolution-independent units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Linear interpolation towards `to`; `t` is not clamped.
    #[must_use]
    pub fn lerp(self, to: Self, t: f64) -> Self {
        Self {
            x: self.x + (to.x - self.x) * t,
            y: self.y + (to.y - self.y) * t,
        }
    }
}

/// Displacement between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

impl Offset {
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

impl Sub for Position {
    type Output = Offset;

    fn sub(self, rhs: Self) -> Offset {
        Offset {
            dx: self.x - rhs.x,
            dy: self.y - rhs.y,
        }
    }
}

impl Add<Offset> for Position {
    type Output = Position;

    fn add(self, rhs: Offset) -> Position {
        Position {
            x: self.x + rhs.dx,
            y: self.y + rhs.dy,
        }
    }
}

/// Axis-aligned rectangle in abstract units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

// ---------------------------------------------------------------------------
// Display mode
// ---------------------------------------------------------------------------

/// Whether response groups are shown individually or merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Expanded,
    Collapsed,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 2] = [DisplayMode::Expanded, DisplayMode::Collapsed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expanded => "expanded",
            Self::Collapsed => "collapsed",
        }
    }
}

/// One value per [`DisplayMode`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ByDisplayMode<T> {
    pub expanded: T,
    pub collapsed: T,
}

impl<T> ByDisplayMode<T> {
    #[must_use]
    pub fn get(&self, mode: DisplayMode) -> &T {
        match mode {
            DisplayMode::Expanded => &self.expanded,
            DisplayMode::Collapsed => &self.collapsed,
        }
    }

    pub fn get_mut(&mut self, mode: DisplayMode) -> &mut T {
        match mode {
            DisplayMode::Expanded => &mut self.expanded,
            DisplayMode::Collapsed => &mut self.collapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// Splits
// ---------------------------------------------------------------------------

/// Aggregate statistics of one response group.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub count: u32,
    pub total_weight: f64,
    pub proportion: f64,
}

/// A point with its position relative to the enclosing segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacedPoint {
    pub key: PointKey,
    pub x: f64,
    pub y: f64,
}

/// A response group (one segment) within a split.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseGroup {
    #[serde(default)]
    pub label: String,
    pub stats: GroupStats,
    /// Segment bounds relative to the split's segment group.
    pub bounds: Rect,
    /// Icon drawn for this group's points, if any.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub points: Vec<PlacedPoint>,
}

/// Response groups for both display modes.
pub type ResponseGroups = ByDisplayMode<Vec<ResponseGroup>>;

/// One grouping-question combination.
///
/// A basis split lists only itself in `basis_split_indices`; a view split
/// lists every basis split it aggregates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub basis_split_indices: Vec<SplitIndex>,
    pub segment_group_bounds: Rect,
    pub response_groups: ResponseGroups,
}

/// A point resolved to split-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement<'a> {
    pub key: PointKey,
    pub position: Position,
    pub group_index: usize,
    pub image: Option<&'a str>,
}

impl Split {
    /// Whether this split aggregates `basis`.
    #[must_use]
    pub fn covers_basis(&self, basis: SplitIndex) -> bool {
        self.basis_split_indices.contains(&basis)
    }

    /// Every point in `mode`, transformed to split-relative coordinates.
    pub fn placements(&self, mode: DisplayMode) -> impl Iterator<Item = Placement<'_>> + '_ {
        let origin = self.segment_group_bounds;
        self.response_groups
            .get(mode)
            .iter()
            .enumerate()
            .flat_map(move |(group_index, group)| {
                group.points.iter().map(move |p| Placement {
                    key: p.key,
                    position: Position {
                        x: origin.x + group.bounds.x + p.x,
                        y: origin.y + group.bounds.y + p.y,
                    },
                    group_index,
                    image: group.image.as_deref(),
                })
            })
    }

    /// Keys owned by this split, read from the expanded groups.
    pub fn point_keys(&self) -> impl Iterator<Item = PointKey> + '_ {
        self.response_groups
            .expanded
            .iter()
            .flat_map(|g| g.points.iter().map(|p| p.key))
    }

    /// Total number of points in expanded mode.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.response_groups
            .expanded
            .iter()
            .map(|g| g.points.len())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

/// The canonical aggregate of one visualization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    pub splits: Vec<Split>,
    pub basis_split_indices: Vec<SplitIndex>,
    pub sequence_number: u64,
}

impl ServerState {
    #[must_use]
    pub fn new(splits: Vec<Split>, basis_split_indices: Vec<SplitIndex>, sequence_number: u64) -> Self {
        Self {
            splits,
            basis_split_indices,
            sequence_number,
        }
    }

    /// Split at `index`, or a contract violation.
    pub fn split(&self, index: SplitIndex) -> Result<&Split> {
        self.splits.get(index).ok_or(SyncError::SplitOutOfRange {
            index,
            len: self.splits.len(),
        })
    }

    /// The identity universe: every point key in every basis split.
    pub fn identity_universe(&self) -> Result<AHashSet<PointKey>> {
        let mut keys = AHashSet::new();
        for &basis in &self.basis_split_indices {
            keys.extend(self.split(basis)?.point_keys());
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A viewer's chosen view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPreferences {
    pub view_id: ViewId,
    pub display_mode: DisplayMode,
}

impl ViewPreferences {
    #[must_use]
    pub fn new(view_id: ViewId, display_mode: DisplayMode) -> Self {
        Self {
            view_id,
            display_mode,
        }
    }
}

/// Precomputed `view id -> view split indices` lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewMaps(HashMap<ViewId, Vec<SplitIndex>>);

impl ViewMaps {
    #[must_use]
    pub fn new(entries: HashMap<ViewId, Vec<SplitIndex>>) -> Self {
        Self(entries)
    }

    /// Resolve a view id to its split indices.
    ///
    /// Absent or empty entries are contract violations.
    pub fn resolve(&self, view_id: &ViewId) -> Result<&[SplitIndex]> {
        match self.0.get(view_id) {
            None => Err(SyncError::InvalidViewId(view_id.clone())),
            Some(splits) if splits.is_empty() => Err(SyncError::EmptyView(view_id.clone())),
            Some(splits) => Ok(splits),
        }
    }

    /// Check that every entry is non-empty and indexes into `split_count`.
    pub fn validate(&self, split_count: usize) -> Result<()> {
        for (view_id, splits) in &self.0 {
            if splits.is_empty() {
                return Err(SyncError::EmptyView(view_id.clone()));
            }
            if let Some(&index) = splits.iter().find(|&&i| i >= split_count) {
                return Err(SyncError::SplitOutOfRange {
                    index,
                    len: split_count,
                });
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, view_id: ViewId, splits: Vec<SplitIndex>) {
        self.0.insert(view_id, splits);
    }

    pub fn view_ids(&self) -> impl Iterator<Item = &ViewId> {
        self.0.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ViewId, Vec<SplitIndex>)> for ViewMaps {
    fn from_iter<I: IntoIterator<Item = (ViewId, Vec<SplitIndex>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn group(bounds: Rect, points: &[(PointKey, f64, f64)]) -> ResponseGroup {
        ResponseGroup {
            bounds,
            points: points
                .iter()
                .map(|&(key, x, y)| PlacedPoint { key, x, y })
                .collect(),
            ..ResponseGroup::default()
        }
    }

    // ── ViewId ──────────────────────────────────────────────────────

    #[test]
    fn view_id_is_canonical() {
        assert_eq!(ViewId::from_active_questions(&[3, 0, 1, 3]).as_str(), "0,1,3");
        assert!(ViewId::from_active_questions(&[]).is_base());
        assert_eq!(ViewId::from_active_questions(&[]), ViewId::base());
    }

    #[test]
    fn view_id_round_trips_active_questions() {
        let id = ViewId::from_active_questions(&[2, 5]);
        assert_eq!(id.active_questions(), Some(vec![2, 5]));
        assert_eq!(ViewId::base().active_questions(), Some(vec![]));
        assert_eq!(ViewId::new("1,x").active_questions(), None);
    }

    // ── PointKey ────────────────────────────────────────────────────

    #[test]
    fn point_key_display_is_composite() {
        assert_eq!(PointKey::new(4, 1, 17).to_string(), "4-1-17");
    }

    #[test]
    fn point_key_orders_by_split_then_group_then_id() {
        let mut keys = vec![
            PointKey::new(1, 0, 0),
            PointKey::new(0, 1, 0),
            PointKey::new(0, 0, 5),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PointKey::new(0, 0, 5),
                PointKey::new(0, 1, 0),
                PointKey::new(1, 0, 0)
            ]
        );
    }

    // ── Geometry ────────────────────────────────────────────────────

    #[test]
    fn placements_add_segment_group_and_segment_origins() {
        let key = PointKey::new(0, 0, 1);
        let split = Split {
            basis_split_indices: vec![0],
            segment_group_bounds: Rect::new(100.0, 10.0, 50.0, 50.0),
            response_groups: ResponseGroups {
                expanded: vec![group(Rect::new(5.0, 2.0, 10.0, 10.0), &[(key, 1.0, 3.0)])],
                collapsed: vec![],
            },
        };
        let placed: Vec<_> = split.placements(DisplayMode::Expanded).collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].position, Position::new(106.0, 15.0));
        assert_eq!(split.placements(DisplayMode::Collapsed).count(), 0);
    }

    #[test]
    fn position_offset_arithmetic() {
        let a = Position::new(1.0, 2.0);
        let b = Position::new(4.0, 8.0);
        let d = b - a;
        assert_eq!(d, Offset { dx: 3.0, dy: 6.0 });
        assert_eq!(a + d, b);
        assert_eq!(a.lerp(b, 0.5), Position::new(2.5, 5.0));
    }

    // ── ServerState / ViewMaps ──────────────────────────────────────

    #[test]
    fn identity_universe_reads_basis_splits_only() {
        let basis = Split {
            basis_split_indices: vec![0],
            response_groups: ResponseGroups {
                expanded: vec![group(Rect::default(), &[(PointKey::new(0, 0, 0), 0.0, 0.0)])],
                collapsed: vec![],
            },
            ..Split::default()
        };
        let mut view = basis.clone();
        view.response_groups.expanded[0]
            .points
            .push(PlacedPoint {
                key: PointKey::new(9, 9, 9),
                x: 0.0,
                y: 0.0,
            });
        let state = ServerState::new(vec![basis, view], vec![0], 1);
        let universe = state.identity_universe().unwrap();
        assert_eq!(universe.len(), 1);
        assert!(universe.contains(&PointKey::new(0, 0, 0)));
    }

    #[test]
    fn split_out_of_range_is_contract_violation() {
        let state = ServerState::new(vec![], vec![3], 0);
        assert_eq!(
            state.identity_universe(),
            Err(SyncError::SplitOutOfRange { index: 3, len: 0 })
        );
    }

    #[test]
    fn view_maps_resolve_and_validate() {
        let maps: ViewMaps = [
            (ViewId::base(), vec![0]),
            (ViewId::new("0"), vec![1, 2]),
            (ViewId::new("1"), vec![]),
        ]
        .into_iter()
        .collect();

        assert_eq!(maps.resolve(&ViewId::new("0")).unwrap(), &[1, 2]);
        assert_eq!(
            maps.resolve(&ViewId::new("7")),
            Err(SyncError::InvalidViewId(ViewId::new("7")))
        );
        assert_eq!(
            maps.resolve(&ViewId::new("1")),
            Err(SyncError::EmptyView(ViewId::new("1")))
        );
        assert!(maps.validate(3).is_err());
    }

    #[test]
    fn view_maps_validate_catches_out_of_range() {
        let maps: ViewMaps = [(ViewId::base(), vec![0, 4])].into_iter().collect();
        assert_eq!(
            maps.validate(2),
            Err(SyncError::SplitOutOfRange { index: 4, len: 2 })
        );
        assert!(maps.validate(5).is_ok());
    }
}
