#![forbid(unsafe_code)]

//! Durable visualization state.
//!
//! The cache loads a [`PersistedVisualization`] per visualization when a
//! session wakes and writes the live splits back through
//! [`StateStore::persist_visualization`] when it sleeps. The store owns the
//! row; the cache only ever replaces `splits`, `basis_split_indices`,
//! `sequence_number`, and `computed_at`.
//!
//! Two implementations ship here:
//!
//! - [`MemoryStore`]: a mutex-guarded map with call counters and persist
//!   failure injection.
//! - [`FileStore`]: one pretty-printed JSON document per
//!   `(session, visualization)` under a root directory, replaced atomically
//!   via write-then-rename.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use segsync_core::{ServerState, SessionId, Split, SplitIndex, ViewMaps, VizId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} has no stored visualizations")]
    UnknownSession(SessionId),

    #[error("visualization {viz} not found for session {session}")]
    NotFound { session: SessionId, viz: VizId },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Row shape
// ---------------------------------------------------------------------------

/// Lookups used to turn raw answers into aggregation inputs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupMaps {
    /// Primary-question answer index to expanded response group index.
    pub response_index_to_group_index: BTreeMap<usize, usize>,
    /// Grouping-question profile (answer indices joined by `,`) to basis split.
    pub profile_to_split_index: BTreeMap<String, SplitIndex>,
}

/// Which questions a visualization is built from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationConfig {
    pub primary_question: String,
    #[serde(default)]
    pub grouping_questions: Vec<String>,
}

/// One stored visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedVisualization {
    pub basis_split_indices: Vec<SplitIndex>,
    pub splits: Vec<Split>,
    pub view_maps: ViewMaps,
    pub lookup_maps: LookupMaps,
    pub viz_width: f64,
    pub viz_height: f64,
    pub computed_at: DateTime<Utc>,
    /// Rows written before sequence numbers were stored wake at 0.
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub config: VisualizationConfig,
}

impl PersistedVisualization {
    /// The canonical state this row restores to.
    #[must_use]
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.splits.clone(),
            self.basis_split_indices.clone(),
            self.sequence_number,
        )
    }
}

/// Fields rewritten when a session sleeps.
#[derive(Debug, Clone, Copy)]
pub struct PersistRequest<'a> {
    pub splits: &'a [Split],
    pub basis_split_indices: &'a [SplitIndex],
    pub sequence_number: u64,
    pub computed_at: DateTime<Utc>,
}

impl PersistRequest<'_> {
    fn apply_to(&self, row: &mut PersistedVisualization) {
        row.splits = self.splits.to_vec();
        row.basis_split_indices = self.basis_split_indices.to_vec();
        row.sequence_number = self.sequence_number;
        row.computed_at = self.computed_at;
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable store for visualization rows.
pub trait StateStore {
    /// Every visualization stored for `session`, in id order.
    fn visualization_ids(&self, session: SessionId) -> StoreResult<Vec<VizId>>;

    fn load_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
    ) -> StoreResult<PersistedVisualization>;

    fn persist_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
        request: PersistRequest<'_>,
    ) -> StoreResult<()>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn visualization_ids(&self, session: SessionId) -> StoreResult<Vec<VizId>> {
        (**self).visualization_ids(session)
    }

    fn load_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
    ) -> StoreResult<PersistedVisualization> {
        (**self).load_visualization(session, viz)
    }

    fn persist_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
        request: PersistRequest<'_>,
    ) -> StoreResult<()> {
        (**self).persist_visualization(session, viz, request)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    rows: BTreeMap<(SessionId, VizId), PersistedVisualization>,
    loads: u64,
    persists: u64,
    fail_persists: bool,
}

/// In-memory store with call counters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed or overwrite a row.
    pub fn insert(&self, session: SessionId, viz: VizId, row: PersistedVisualization) {
        self.lock().rows.insert((session, viz), row);
    }

    /// Current row, if stored.
    #[must_use]
    pub fn row(&self, session: SessionId, viz: &VizId) -> Option<PersistedVisualization> {
        self.lock().rows.get(&(session, viz.clone())).cloned()
    }

    /// Number of `load_visualization` calls so far.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.lock().loads
    }

    /// Number of `persist_visualization` calls so far, failed ones included.
    #[must_use]
    pub fn persist_count(&self) -> u64 {
        self.lock().persists
    }

    /// Make every subsequent persist fail with [`StoreError::Backend`].
    pub fn set_fail_persists(&self, fail: bool) {
        self.lock().fail_persists = fail;
    }
}

impl StateStore for MemoryStore {
    fn visualization_ids(&self, session: SessionId) -> StoreResult<Vec<VizId>> {
        let inner = self.lock();
        let ids: Vec<VizId> = inner
            .rows
            .keys()
            .filter(|(s, _)| *s == session)
            .map(|(_, v)| v.clone())
            .collect();
        if ids.is_empty() {
            return Err(StoreError::UnknownSession(session));
        }
        Ok(ids)
    }

    fn load_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
    ) -> StoreResult<PersistedVisualization> {
        let mut inner = self.lock();
        inner.loads += 1;
        inner
            .rows
            .get(&(session, viz.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                session,
                viz: viz.clone(),
            })
    }

    fn persist_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
        request: PersistRequest<'_>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.persists += 1;
        if inner.fail_persists {
            return Err(StoreError::Backend(String::from("persist failure injected")));
        }
        let row = inner
            .rows
            .get_mut(&(session, viz.clone()))
            .ok_or_else(|| StoreError::NotFound {
                session,
                viz: viz.clone(),
            })?;
        request.apply_to(row);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// JSON documents at `<root>/<session>/<viz>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session: SessionId) -> PathBuf {
        self.root.join(session.to_string())
    }

    fn row_path(&self, session: SessionId, viz: &VizId) -> PathBuf {
        self.session_dir(session)
            .join(format!("{}.json", encode_file_stem(viz.as_str())))
    }

    /// Write a full row, creating directories as needed.
    pub fn save(
        &self,
        session: SessionId,
        viz: &VizId,
        row: &PersistedVisualization,
    ) -> StoreResult<()> {
        let dir = self.session_dir(session);
        fs::create_dir_all(&dir)?;
        let path = self.row_path(session, viz);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(row)?)?;
        fs::rename(&tmp, &path)?;
        debug!(session_id = %session, viz_id = %viz, path = %path.display(), "wrote visualization row");
        Ok(())
    }
}

impl StateStore for FileStore {
    fn visualization_ids(&self, session: SessionId) -> StoreResult<Vec<VizId>> {
        let entries = match fs::read_dir(self.session_dir(session)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::UnknownSession(session));
            }
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(id) = decode_file_stem(stem) {
                ids.push(VizId::new(id));
            }
        }
        if ids.is_empty() {
            return Err(StoreError::UnknownSession(session));
        }
        ids.sort();
        Ok(ids)
    }

    fn load_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
    ) -> StoreResult<PersistedVisualization> {
        let bytes = match fs::read(self.row_path(session, viz)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    session,
                    viz: viz.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn persist_visualization(
        &self,
        session: SessionId,
        viz: &VizId,
        request: PersistRequest<'_>,
    ) -> StoreResult<()> {
        let mut row = self.load_visualization(session, viz)?;
        request.apply_to(&mut row);
        self.save(session, viz, &row)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]`.
fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_file_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use segsync_core::ViewId;

    fn row(seq: u64) -> PersistedVisualization {
        PersistedVisualization {
            basis_split_indices: vec![0],
            splits: vec![Split {
                basis_split_indices: vec![0],
                ..Split::default()
            }],
            view_maps: [(ViewId::base(), vec![0])].into_iter().collect(),
            lookup_maps: LookupMaps::default(),
            viz_width: 800.0,
            viz_height: 600.0,
            computed_at: DateTime::<Utc>::UNIX_EPOCH,
            sequence_number: seq,
            config: VisualizationConfig::default(),
        }
    }

    // ── Row shape ───────────────────────────────────────────────────

    #[test]
    fn row_uses_camel_case_and_defaults_sequence() {
        let json = serde_json::to_value(row(3)).unwrap();
        assert!(json.get("basisSplitIndices").is_some());
        assert!(json.get("lookupMaps").unwrap().get("profileToSplitIndex").is_some());
        assert_eq!(json["sequenceNumber"], 3);

        let mut legacy = json;
        let obj = legacy.as_object_mut().unwrap();
        obj.remove("sequenceNumber");
        obj.remove("config");
        let parsed: PersistedVisualization = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.sequence_number, 0);
        assert_eq!(parsed.server_state().sequence_number, 0);
    }

    // ── MemoryStore ─────────────────────────────────────────────────

    #[test]
    fn memory_store_counts_calls() {
        let store = MemoryStore::new();
        let viz = VizId::from("v1");
        store.insert(SessionId(1), viz.clone(), row(0));

        assert_eq!(store.visualization_ids(SessionId(1)).unwrap(), vec![viz.clone()]);
        store.load_visualization(SessionId(1), &viz).unwrap();
        assert_eq!(store.load_count(), 1);

        let splits = vec![Split::default(), Split::default()];
        store
            .persist_visualization(
                SessionId(1),
                &viz,
                PersistRequest {
                    splits: &splits,
                    basis_split_indices: &[0, 1],
                    sequence_number: 9,
                    computed_at: DateTime::<Utc>::UNIX_EPOCH,
                },
            )
            .unwrap();
        assert_eq!(store.persist_count(), 1);
        let stored = store.row(SessionId(1), &viz).unwrap();
        assert_eq!(stored.splits.len(), 2);
        assert_eq!(stored.sequence_number, 9);
        assert_eq!(stored.viz_width, 800.0, "untouched fields survive");
    }

    #[test]
    fn memory_store_unknown_session_and_injected_failure() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.visualization_ids(SessionId(4)),
            Err(StoreError::UnknownSession(SessionId(4)))
        ));

        let viz = VizId::from("v");
        store.insert(SessionId(4), viz.clone(), row(0));
        store.set_fail_persists(true);
        let err = store
            .persist_visualization(
                SessionId(4),
                &viz,
                PersistRequest {
                    splits: &[],
                    basis_split_indices: &[],
                    sequence_number: 1,
                    computed_at: DateTime::<Utc>::UNIX_EPOCH,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.row(SessionId(4), &viz).unwrap().sequence_number, 0);
    }

    // ── File names ──────────────────────────────────────────────────

    #[test]
    fn file_stems_round_trip() {
        for id in ["plain", "with space", "a/b", "ümlaut", "x%y"] {
            let stem = encode_file_stem(id);
            assert!(!stem.contains('/'));
            assert_eq!(decode_file_stem(&stem).as_deref(), Some(id));
        }
        assert_eq!(decode_file_stem("bad%Z"), None);
    }
}
