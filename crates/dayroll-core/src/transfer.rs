//! Manual snapshot export and import.
//!
//! An export wraps the whole local snapshot as `{version, exportedAt, data}`.
//! An import is parsed and validated completely before anything is applied,
//! so a malformed file never touches local state.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::TransferError;
use crate::state::AppState;
use crate::task::{
    BacklogOrder, BacklogTask, Category, DayStart, DoneRecord, RecurringTask, TodayTask,
    default_categories,
};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument<'a> {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub data: &'a AppState,
}

pub fn export_document(state: &AppState, now: DateTime<Utc>) -> ExportDocument<'_> {
    ExportDocument {
        version: EXPORT_VERSION,
        exported_at: now,
        data: state,
    }
}

/// Written to a temp file next to `path` and renamed into place, so a
/// failed export never leaves a truncated file.
#[tracing::instrument(skip(doc))]
pub fn write_export(path: &Path, doc: &ExportDocument<'_>) -> Result<(), TransferError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, doc).map_err(std::io::Error::from)?;
    writeln!(temp)?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    info!(
        file = %path.display(),
        today = doc.data.today.len(),
        backlog = doc.data.backlog.len(),
        recurring = doc.data.recurring.len(),
        done = doc.data.done.len(),
        "exported snapshot"
    );
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportEnvelope {
    version: u32,
    #[serde(default)]
    exported_at: Option<DateTime<Utc>>,
    data: ImportData,
}

// Collections are required; a file missing one is rejected outright.
#[derive(Debug, Deserialize)]
struct ImportData {
    today: Vec<TodayTask>,
    backlog: Vec<BacklogTask>,
    recurring: Vec<RecurringTask>,
    done: Vec<DoneRecord>,
    #[serde(default)]
    settings: Option<SettingsOverlay>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsOverlay {
    #[serde(default)]
    day_start: Option<DayStart>,
    #[serde(default)]
    last_day_reset: Option<DateTime<Utc>>,
    #[serde(default)]
    categories: Option<Vec<Category>>,
    #[serde(default)]
    backlog_sort_by: Option<BacklogOrder>,
}

/// A validated import, ready to be applied inside a store commit.
#[derive(Debug)]
pub struct ImportPlan {
    pub version: u32,
    pub exported_at: Option<DateTime<Utc>>,
    data: ImportData,
}

pub fn parse_import(raw: &str) -> Result<ImportPlan, TransferError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| TransferError::MalformedImport(format!("not a JSON document: {err}")))?;
    for field in ["version", "data"] {
        if value.get(field).is_none() {
            return Err(TransferError::MalformedImport(format!(
                "missing top-level field `{field}`"
            )));
        }
    }

    let envelope: ImportEnvelope = serde_json::from_value(value)
        .map_err(|err| TransferError::MalformedImport(err.to_string()))?;
    if envelope.version != EXPORT_VERSION {
        warn!(version = envelope.version, expected = EXPORT_VERSION, "importing a different export version");
    }

    Ok(ImportPlan {
        version: envelope.version,
        exported_at: envelope.exported_at,
        data: envelope.data,
    })
}

pub fn read_import(path: &Path) -> Result<ImportPlan, TransferError> {
    let raw = fs::read_to_string(path)?;
    parse_import(&raw)
}

impl ImportPlan {
    /// Replace the four collections and overlay the imported settings on
    /// the current ones. Missing categories fall back to the defaults.
    pub fn apply(self, state: &mut AppState) {
        let ImportData {
            today,
            backlog,
            recurring,
            done,
            settings,
        } = self.data;
        state.today = today;
        state.backlog = backlog;
        state.recurring = recurring;
        state.done = done;

        let overlay = settings.unwrap_or_default();
        if let Some(day_start) = overlay.day_start {
            state.settings.day_start = day_start;
        }
        // never moves backwards, or the next tick would roll over again
        if let Some(last) = overlay.last_day_reset {
            state.settings.last_day_reset = state.settings.last_day_reset.max(Some(last));
        }
        if let Some(order) = overlay.backlog_sort_by {
            state.settings.backlog_sort_by = order;
        }
        state.settings.categories = overlay.categories.unwrap_or_else(default_categories);

        let duplicates = state.duplicate_ids();
        if !duplicates.is_empty() {
            warn!(?duplicates, "imported snapshot holds ids in more than one collection");
        }
        info!(
            today = state.today.len(),
            backlog = state.backlog.len(),
            recurring = state.recurring.len(),
            done = state.done.len(),
            "imported snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn export_then_import_restores_collections() {
        let mut state = AppState::default();
        state.add_today("one", now()).unwrap();
        state.add_backlog("two", now()).unwrap();
        state.settings.backlog_sort_by = BacklogOrder::Oldest;

        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("export.json");
        write_export(&path, &export_document(&state, now())).expect("write");

        let plan = read_import(&path).expect("parse");
        assert_eq!(plan.version, EXPORT_VERSION);
        assert_eq!(plan.exported_at, Some(now()));

        let mut target = AppState::default();
        plan.apply(&mut target);
        assert_eq!(target, state);
    }

    #[test]
    fn missing_top_level_fields_are_rejected() {
        for doc in [json!({"data": {}}), json!({"version": 1}), json!([])] {
            let err = parse_import(&doc.to_string()).unwrap_err();
            assert!(matches!(err, TransferError::MalformedImport(_)), "{doc}");
        }
        let err = parse_import("{ not json").unwrap_err();
        assert!(matches!(err, TransferError::MalformedImport(_)));
    }

    #[test]
    fn missing_collection_is_rejected() {
        let doc = json!({
            "version": 1,
            "data": { "today": [], "backlog": [], "recurring": [] }
        });
        let err = parse_import(&doc.to_string()).unwrap_err();
        assert!(matches!(err, TransferError::MalformedImport(msg) if msg.contains("done")));
    }

    #[test]
    fn settings_merge_over_current_and_default_categories() {
        let mut state = AppState::default();
        state.settings.day_start = "07:30".parse().unwrap();
        state.add_category("errands", "#ff8800").unwrap();
        state.add_today("to be replaced", now()).unwrap();

        let doc = json!({
            "version": 1,
            "exportedAt": "2026-05-01T10:00:00Z",
            "data": {
                "today": [], "backlog": [], "recurring": [], "done": [],
                "settings": { "backlogSortBy": "postponed" }
            }
        });
        parse_import(&doc.to_string()).expect("parse").apply(&mut state);

        assert!(state.today.is_empty());
        assert_eq!(state.settings.day_start.to_string(), "07:30");
        assert_eq!(state.settings.backlog_sort_by, BacklogOrder::Postponed);
        assert_eq!(state.settings.categories, default_categories());
    }

    #[test]
    fn import_never_moves_the_day_reset_backwards() {
        let mut state = AppState::default();
        state.settings.last_day_reset = Some(Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap());

        let doc = json!({
            "version": 1,
            "data": {
                "today": [], "backlog": [], "recurring": [], "done": [],
                "settings": { "lastDayReset": "2020-01-01T00:00:00Z" }
            }
        });
        parse_import(&doc.to_string()).expect("parse").apply(&mut state);
        assert_eq!(
            state.settings.last_day_reset,
            Some(Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap())
        );

        let later = json!({
            "version": 1,
            "data": {
                "today": [], "backlog": [], "recurring": [], "done": [],
                "settings": { "lastDayReset": "2026-03-05T06:00:00Z" }
            }
        });
        parse_import(&later.to_string()).expect("parse").apply(&mut state);
        assert_eq!(
            state.settings.last_day_reset,
            Some(Utc.with_ymd_and_hms(2026, 3, 5, 6, 0, 0).unwrap())
        );
    }

    #[test]
    fn export_replaces_an_existing_file_whole() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("export.json");
        fs::write(&path, "stale contents that are much longer than nothing at all").expect("seed");

        let state = AppState::default();
        write_export(&path, &export_document(&state, now())).expect("write");

        let plan = read_import(&path).expect("parse");
        assert_eq!(plan.exported_at, Some(now()));
        let leftovers: Vec<_> = fs::read_dir(temp.path()).expect("read dir").collect();
        assert_eq!(leftovers.len(), 1);
    }
}
