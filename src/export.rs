//! Structured export of a single run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_dirs::AppDirs;
use crate::error::{Error, Result};
use crate::history::{EndReason, RunSummary};
use crate::timeline::{ActivityRecord, FailureEvent, JournalEntry, MilestoneEvent, TimelineState};

pub const EXPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub schema_version: u32,
    /// Host clock at export time.
    pub exported_at: f64,
    pub level: u32,
    pub variant_id: u32,
    pub start_timestamp: f64,
    pub total_allotted_seconds: f64,
    pub death_count: usize,
    pub milestones: Vec<MilestoneEvent>,
    pub failures: Vec<FailureEvent>,
    pub journal: Vec<JournalEntry>,
    /// Absent while the run is still live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

impl ExportRecord {
    pub fn from_timeline(key: &ActivityRecord, timeline: &TimelineState, now: f64) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: now,
            level: key.level,
            variant_id: key.variant_id,
            start_timestamp: key.start_timestamp,
            total_allotted_seconds: timeline.total_allotted_seconds,
            death_count: timeline.failure_count(),
            milestones: timeline.milestone_events.clone(),
            failures: timeline.failure_events.clone(),
            journal: timeline.journal.clone(),
            end_reason: None,
        }
    }

    /// Export a finished run from the history. Runs without a key have no
    /// identifiers to export.
    pub fn from_summary(summary: &RunSummary, now: f64) -> Option<Self> {
        let key = summary.key.as_ref()?;
        Some(Self {
            end_reason: Some(summary.stats.end_reason),
            ..Self::from_timeline(key, &summary.timeline, now)
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let found = value
            .get("schemaVersion")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        if found != EXPORT_SCHEMA_VERSION {
            return Err(Error::UnsupportedSchema {
                found,
                expected: EXPORT_SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn milestone_count(&self) -> usize {
        self.milestones.len()
    }

    pub fn default_file_name(&self) -> String {
        format!(
            "keyline-{}-{}-{}.json",
            self.level,
            self.variant_id,
            self.start_timestamp.max(0.0).floor() as u64
        )
    }

    /// Write to `path`, or to the exports directory when `None`.
    /// Returns where the file went.
    pub fn write_to(&self, path: Option<&Path>) -> Result<PathBuf> {
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => AppDirs::state_dir()
                .map(|dir| dir.join("exports"))
                .unwrap_or_default()
                .join(self.default_file_name()),
        };

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, self.to_json()?)?;
        tracing::info!(path = %target.display(), deaths = self.death_count, "Exported run");
        Ok(target)
    }
}
