#![forbid(unsafe_code)]

//! Push-event decoding.
//!
//! A frame arrives as an event name plus a JSON payload. Decoding is two
//! steps: serde for shape, then [`validate_event`] for the cross-field rules
//! serde cannot express (indices in range, diff alignment, view maps that
//! resolve). Anything that fails either step is a [`PushParseError`]; the
//! caller logs it and drops the frame.

use std::collections::BTreeSet;

use segsync_backend::{
    PushEvent, STATUS_CHANGED_EVENT, SNAPSHOT_EVENT, SessionSnapshot, StatusChanged, UPDATE_EVENT,
    VisualizationSnapshot, VisualizationUpdate,
};
use segsync_core::{ServerState, SplitIndex};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Longest payload prefix quoted in diagnostics, in characters.
pub const PAYLOAD_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushParseError {
    #[error("unknown push event `{0}`")]
    UnknownEvent(String),

    #[error("malformed JSON at line {line}, column {column}: {message}")]
    Json {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl PushParseError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PushParseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json {
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        }
    }
}

/// Decode and validate one push frame.
pub fn parse_push_event(name: &str, payload: &str) -> Result<PushEvent, PushParseError> {
    let event = match name {
        SNAPSHOT_EVENT => PushEvent::Snapshot(decode::<SessionSnapshot>(payload)?),
        UPDATE_EVENT => PushEvent::Update(decode::<VisualizationUpdate>(payload)?),
        STATUS_CHANGED_EVENT => PushEvent::StatusChanged(decode::<StatusChanged>(payload)?),
        other => return Err(PushParseError::UnknownEvent(other.to_string())),
    };
    validate_event(&event)?;
    Ok(event)
}

fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, PushParseError> {
    Ok(serde_json::from_str(payload)?)
}

/// Cross-field checks on an already-decoded event.
pub fn validate_event(event: &PushEvent) -> Result<(), PushParseError> {
    match event {
        PushEvent::Snapshot(snapshot) => {
            let mut seen = BTreeSet::new();
            for (i, viz) in snapshot.visualizations.iter().enumerate() {
                if !seen.insert(&viz.viz_id) {
                    return Err(PushParseError::invalid(
                        format!("visualizations[{i}].vizId"),
                        format!("duplicate visualization {}", viz.viz_id),
                    ));
                }
                validate_snapshot_entry(i, viz)?;
            }
            Ok(())
        }
        PushEvent::Update(update) => validate_update(update),
        PushEvent::StatusChanged(_) => Ok(()),
    }
}

fn validate_snapshot_entry(i: usize, viz: &VisualizationSnapshot) -> Result<(), PushParseError> {
    let prefix = format!("visualizations[{i}]");
    validate_state(&prefix, &viz.state)?;
    viz.view_maps
        .validate(viz.state.splits.len())
        .map_err(|e| PushParseError::invalid(format!("{prefix}.viewMaps"), e.to_string()))?;
    viz.view_maps
        .resolve(&viz.default_preferences.view_id)
        .map_err(|e| {
            PushParseError::invalid(format!("{prefix}.defaultPreferences.viewId"), e.to_string())
        })?;
    Ok(())
}

fn validate_state(prefix: &str, state: &ServerState) -> Result<(), PushParseError> {
    check_basis(prefix, &state.basis_split_indices, state.splits.len())
}

fn validate_update(update: &VisualizationUpdate) -> Result<(), PushParseError> {
    if update.sequence_number == 0 {
        return Err(PushParseError::invalid(
            "sequenceNumber",
            "an update always advances past the initial sequence number 0",
        ));
    }
    check_basis("", &update.basis_split_indices, update.splits.len())?;
    if update.diffs.len() > update.splits.len() {
        return Err(PushParseError::invalid(
            "diffs",
            format!(
                "{} diffs for {} splits",
                update.diffs.len(),
                update.splits.len()
            ),
        ));
    }
    Ok(())
}

fn check_basis(prefix: &str, basis: &[SplitIndex], split_count: usize) -> Result<(), PushParseError> {
    if let Some(&index) = basis.iter().find(|&&i| i >= split_count) {
        let field = if prefix.is_empty() {
            String::from("basisSplitIndices")
        } else {
            format!("{prefix}.state.basisSplitIndices")
        };
        return Err(PushParseError::invalid(
            field,
            format!("split index {index} out of range ({split_count} splits)"),
        ));
    }
    Ok(())
}

/// At most [`PAYLOAD_PREVIEW_CHARS`] characters of `payload`, marked when cut.
#[must_use]
pub fn payload_preview(payload: &str) -> String {
    match payload.char_indices().nth(PAYLOAD_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &payload[..cut]),
        None => payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segsync_core::{Split, ViewId, ViewMaps, ViewPreferences, VizId};

    fn update_json(sequence: u64, basis: &str, diffs: &str) -> String {
        format!(
            r#"{{"vizId":"v","sequenceNumber":{sequence},"basisSplitIndices":{basis},
                "splits":[{{"basisSplitIndices":[0],"segmentGroupBounds":{{"x":0,"y":0,"width":1,"height":1}},
                "responseGroups":{{"expanded":[],"collapsed":[]}}}}],"diffs":{diffs}}}"#
        )
    }

    // ── Decoding ────────────────────────────────────────────────────

    #[test]
    fn status_changed_decodes() {
        assert_eq!(
            parse_push_event("statusChanged", r#"{"open":false}"#).unwrap(),
            PushEvent::StatusChanged(StatusChanged { open: false })
        );
    }

    #[test]
    fn update_decodes_with_null_diffs() {
        let event = parse_push_event("update", &update_json(3, "[0]", "[null]")).unwrap();
        let PushEvent::Update(update) = event else {
            panic!("expected update");
        };
        assert_eq!(update.viz_id, VizId::from("v"));
        assert_eq!(update.diffs, vec![None]);
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        assert_eq!(
            parse_push_event("ping", "{}"),
            Err(PushParseError::UnknownEvent(String::from("ping")))
        );
    }

    #[test]
    fn json_errors_carry_position() {
        let err = parse_push_event("statusChanged", "{\n  \"open\": tru").unwrap_err();
        let PushParseError::Json { line, column, .. } = err else {
            panic!("expected JSON error, got {err:?}");
        };
        assert_eq!(line, 2);
        assert!(column > 0);
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn out_of_range_basis_is_invalid() {
        let err = parse_push_event("update", &update_json(3, "[4]", "[]")).unwrap_err();
        assert!(matches!(err, PushParseError::Invalid { ref field, .. } if field == "basisSplitIndices"));
    }

    #[test]
    fn surplus_diffs_are_invalid() {
        let err = parse_push_event("update", &update_json(3, "[0]", "[null,null]")).unwrap_err();
        assert!(matches!(err, PushParseError::Invalid { ref field, .. } if field == "diffs"));
    }

    #[test]
    fn zero_sequence_update_is_invalid() {
        let err = parse_push_event("update", &update_json(0, "[0]", "[]")).unwrap_err();
        assert!(matches!(err, PushParseError::Invalid { ref field, .. } if field == "sequenceNumber"));
    }

    #[test]
    fn snapshot_default_view_must_resolve() {
        let viz = VisualizationSnapshot {
            viz_id: VizId::from("v"),
            state: ServerState::new(vec![Split::default()], vec![0], 1),
            view_maps: [(ViewId::base(), vec![0])].into_iter().collect::<ViewMaps>(),
            default_preferences: ViewPreferences::new(ViewId::new("2"), Default::default()),
        };
        let event = PushEvent::Snapshot(SessionSnapshot {
            visualizations: vec![viz.clone()],
            open: true,
        });
        let err = validate_event(&event).unwrap_err();
        assert!(err.to_string().contains("defaultPreferences.viewId"), "{err}");

        let duplicate = PushEvent::Snapshot(SessionSnapshot {
            visualizations: vec![
                VisualizationSnapshot {
                    default_preferences: ViewPreferences::default(),
                    ..viz
                };
                2
            ],
            open: true,
        });
        let err = validate_event(&duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate visualization v"), "{err}");
    }

    // ── Preview ─────────────────────────────────────────────────────

    #[test]
    fn preview_cuts_on_char_boundary() {
        let long = "é".repeat(PAYLOAD_PREVIEW_CHARS + 10);
        let preview = payload_preview(&long);
        assert_eq!(preview.chars().count(), PAYLOAD_PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));
        assert_eq!(payload_preview("short"), "short");
    }
}
