//! Live state of the tracked run and its append-only event log.

use serde::{Deserialize, Serialize};

use crate::error::Rejected;
use crate::timer::TimerModel;

/// Identity of one tracked run. Replaced, never edited, when a new run starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub level: u32,
    pub variant_id: u32,
    pub start_timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub timestamp: f64,
    pub label: String,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneEvent {
    pub label: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalKind {
    Start,
    End,
    Failure,
    Milestone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub kind: JournalKind,
    pub description: String,
    /// Seconds into the run.
    pub occurs_at: f64,
    /// Host clock when the entry was written.
    pub logged_at: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineState {
    pub start_timestamp: f64,
    /// `0.0` when the activity carries no timer.
    pub total_allotted_seconds: f64,
    pub failure_events: Vec<FailureEvent>,
    pub milestone_events: Vec<MilestoneEvent>,
    pub journal: Vec<JournalEntry>,
    pub is_active: bool,
}

impl TimelineState {
    /// Fresh state for a run that starts now.
    pub fn begin(start_timestamp: f64, total_allotted_seconds: f64) -> Self {
        Self {
            start_timestamp,
            total_allotted_seconds,
            is_active: true,
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn elapsed_seconds(&self, now: f64) -> f64 {
        self.timer_model(0.0).elapsed(now)
    }

    pub fn timer_model(&self, penalty_per_failure: f64) -> TimerModel {
        TimerModel::new(
            self.start_timestamp,
            self.total_allotted_seconds,
            penalty_per_failure,
        )
    }

    pub fn failure_count(&self) -> usize {
        self.failure_events.len()
    }

    pub fn milestone_labels(&self) -> Vec<String> {
        self.milestone_events
            .iter()
            .map(|milestone| milestone.label.clone())
            .collect()
    }

    /// Appends a failure and returns its display ordinal.
    pub fn record_failure(&mut self, reason: &str, now: f64) -> Result<u32, Rejected> {
        self.ensure_active()?;

        let timestamp = clamp_after(now, self.failure_events.last().map(|e| e.timestamp));
        let sequence_number = self
            .failure_events
            .last()
            .map(|e| e.sequence_number + 1)
            .unwrap_or(1);

        let label = if reason.trim().is_empty() {
            "Death".to_string()
        } else {
            reason.trim().to_string()
        };

        let occurs_at = self.elapsed_seconds(timestamp);
        self.record_journal_entry(
            JournalKind::Failure,
            &format!("#{sequence_number} {label}"),
            occurs_at,
            timestamp,
        )?;
        self.failure_events.push(FailureEvent {
            timestamp,
            label,
            sequence_number,
        });
        Ok(sequence_number)
    }

    pub fn record_milestone(&mut self, label: &str, now: f64) -> Result<(), Rejected> {
        self.ensure_active()?;

        let timestamp = clamp_after(now, self.milestone_events.last().map(|e| e.timestamp));
        let occurs_at = self.elapsed_seconds(timestamp);
        self.record_journal_entry(JournalKind::Milestone, label, occurs_at, timestamp)?;
        self.milestone_events.push(MilestoneEvent {
            label: label.to_string(),
            timestamp,
        });
        Ok(())
    }

    pub fn record_journal_entry(
        &mut self,
        kind: JournalKind,
        description: &str,
        occurs_at: f64,
        now: f64,
    ) -> Result<(), Rejected> {
        self.ensure_active()?;

        let logged_at = clamp_after(now, self.journal.last().map(|e| e.logged_at));
        self.journal.push(JournalEntry {
            kind,
            description: description.to_string(),
            occurs_at: occurs_at.max(0.0),
            logged_at,
        });
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), Rejected> {
        if self.is_active {
            Ok(())
        } else {
            Err(Rejected::NotTracking)
        }
    }
}

/// Keeps sequences non-decreasing when the host clock steps backwards.
fn clamp_after(now: f64, previous: Option<f64>) -> f64 {
    match previous {
        Some(previous) if now < previous => previous,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn records_are_rejected_while_inactive() {
        let mut timeline = TimelineState::default();
        assert_matches!(timeline.record_failure("x", 1.0), Err(Rejected::NotTracking));
        assert_matches!(timeline.record_milestone("Boss", 1.0), Err(Rejected::NotTracking));
        assert_matches!(
            timeline.record_journal_entry(JournalKind::Start, "s", 0.0, 1.0),
            Err(Rejected::NotTracking)
        );
        assert_eq!(timeline, TimelineState::default());
    }

    #[test]
    fn failures_are_numbered_in_append_order() {
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        for i in 0..5 {
            timeline.record_failure("Tank", 110.0 + i as f64).unwrap();
        }
        let numbers: Vec<u32> = timeline
            .failure_events
            .iter()
            .map(|f| f.sequence_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn double_fired_events_are_counted_twice() {
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        timeline.record_failure("Healer", 120.0).unwrap();
        timeline.record_failure("Healer", 120.0).unwrap();
        assert_eq!(timeline.failure_count(), 2);
    }

    #[test]
    fn journal_and_events_stay_non_decreasing() {
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        timeline.record_failure("a", 150.0).unwrap();
        timeline.record_failure("b", 140.0).unwrap();
        timeline.record_milestone("Boss", 130.0).unwrap();

        assert_eq!(timeline.failure_events[1].timestamp, 150.0);
        let logged: Vec<f64> = timeline.journal.iter().map(|e| e.logged_at).collect();
        assert!(logged.windows(2).all(|w| w[0] <= w[1]), "{logged:?}");
    }

    #[test]
    fn milestone_is_journaled_with_run_offset() {
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        timeline.record_milestone("BossA", 400.0).unwrap();
        let entry = timeline.journal.last().unwrap();
        assert_eq!(entry.kind, JournalKind::Milestone);
        assert_eq!(entry.description, "BossA");
        assert_eq!(entry.occurs_at, 300.0);
        assert_eq!(timeline.milestone_labels(), vec!["BossA".to_string()]);
    }

    #[test]
    fn blank_failure_reason_gets_a_label() {
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        assert_eq!(timeline.record_failure("  ", 101.0), Ok(1));
        assert_eq!(timeline.failure_events[0].label, "Death");
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        timeline.record_failure("x", 120.0).unwrap();
        timeline.clear();
        assert_eq!(timeline, TimelineState::default());
        assert!(!timeline.is_active);
    }
}
