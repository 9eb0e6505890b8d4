//! Run history and the cumulative statistics folded from it.

use std::collections::VecDeque;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::timeline::{ActivityRecord, TimelineState};
use crate::timer::Remaining;
use crate::verdict::Verdict;

/// Why a tracked run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum EndReason {
    Completed,
    Abandoned,
    Reset,
    #[strum(serialize = "left activity")]
    LeftActivity,
    Replaced,
}

/// Computed figures for one run, frozen at the moment it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub elapsed_seconds: f64,
    pub death_count: usize,
    pub penalty_seconds: f64,
    pub remaining: Remaining,
    pub verdict: Verdict,
    pub milestones: Vec<String>,
    pub end_reason: EndReason,
}

impl RunStats {
    pub fn completed(&self) -> bool {
        self.end_reason == EndReason::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Host clock when the run was folded.
    pub timestamp: f64,
    pub key: Option<ActivityRecord>,
    pub timeline: TimelineState,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatistics {
    pub total_runs: u64,
    pub total_failures: u64,
    pub average_failures: f64,
    /// `0.0` until a timed run completes.
    pub best_time_seconds: f64,
}

impl AggregateStatistics {
    pub fn apply(&mut self, stats: &RunStats, timed: bool) {
        self.total_runs += 1;
        self.total_failures += stats.death_count as u64;
        self.average_failures = if self.total_runs == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_runs as f64
        };

        if stats.completed() && timed {
            let time = stats.elapsed_seconds;
            if self.best_time_seconds == 0.0 || time < self.best_time_seconds {
                self.best_time_seconds = time;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunHistory {
    stats: AggregateStatistics,
    runs: VecDeque<RunSummary>,
    limit: usize,
}

impl RunHistory {
    pub fn new(limit: usize) -> Self {
        Self::with_contents(AggregateStatistics::default(), Vec::new(), limit)
    }

    /// Rebuild from persisted state, oldest run first.
    pub fn with_contents(stats: AggregateStatistics, runs: Vec<RunSummary>, limit: usize) -> Self {
        let mut history = Self {
            stats,
            runs: runs.into(),
            limit: limit.max(1),
        };
        history.enforce_limit();
        history
    }

    pub fn stats(&self) -> &AggregateStatistics {
        &self.stats
    }

    pub fn runs(&self) -> impl Iterator<Item = &RunSummary> {
        self.runs.iter()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Fold an ended run into the history.
    ///
    /// Does nothing unless `timeline` is still marked active; the timeline is
    /// marked inactive here, so folding the same run twice counts it once.
    pub fn fold_completed_run(
        &mut self,
        timeline: &mut TimelineState,
        key: Option<&ActivityRecord>,
        stats: RunStats,
        now: f64,
    ) -> Option<&RunSummary> {
        if !timeline.is_active {
            tracing::debug!("Skipping fold: run already folded or never started");
            return None;
        }
        timeline.is_active = false;

        self.stats
            .apply(&stats, timeline.total_allotted_seconds > 0.0);

        self.runs.push_back(RunSummary {
            timestamp: now,
            key: key.copied(),
            timeline: timeline.clone(),
            stats,
        });
        self.enforce_limit();
        self.runs.back()
    }

    fn enforce_limit(&mut self) {
        while self.runs.len() > self.limit {
            self.runs.pop_front();
        }
    }

    /// One CSV row per run, oldest first.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "timestamp",
            "level",
            "variant_id",
            "elapsed_seconds",
            "deaths",
            "penalty_seconds",
            "milestones",
            "verdict",
            "end_reason",
        ])?;

        for run in &self.runs {
            let (level, variant) = run
                .key
                .map(|key| (key.level.to_string(), key.variant_id.to_string()))
                .unwrap_or_default();
            csv_writer.write_record([
                format!("{:.3}", run.timestamp),
                level,
                variant,
                format!("{:.1}", run.stats.elapsed_seconds),
                run.stats.death_count.to_string(),
                format!("{:.1}", run.stats.penalty_seconds),
                run.stats.milestones.join("|"),
                run.stats.verdict.to_string(),
                run.stats.end_reason.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(deaths: usize, elapsed: f64, reason: EndReason) -> RunStats {
        RunStats {
            elapsed_seconds: elapsed,
            death_count: deaths,
            penalty_seconds: deaths as f64 * 5.0,
            remaining: Remaining::Seconds(100.0),
            verdict: Verdict::Timeable,
            milestones: vec![],
            end_reason: reason,
        }
    }

    fn key() -> ActivityRecord {
        ActivityRecord {
            level: 15,
            variant_id: 1,
            start_timestamp: 100.0,
        }
    }

    #[test]
    fn averages_guard_against_zero_runs() {
        let history = RunHistory::new(10);
        assert_eq!(history.stats().average_failures, 0.0);
        assert_eq!(history.stats().total_runs, 0);
    }

    #[test]
    fn fold_updates_aggregates() {
        let mut history = RunHistory::new(10);

        let mut first = TimelineState::begin(100.0, 1800.0);
        history.fold_completed_run(&mut first, Some(&key()), stats(3, 1500.0, EndReason::Completed), 1600.0);
        let mut second = TimelineState::begin(2000.0, 1800.0);
        history.fold_completed_run(&mut second, Some(&key()), stats(0, 1400.0, EndReason::Completed), 3400.0);

        let aggregate = history.stats();
        assert_eq!(aggregate.total_runs, 2);
        assert_eq!(aggregate.total_failures, 3);
        assert_eq!(aggregate.average_failures, 1.5);
        assert_eq!(aggregate.best_time_seconds, 1400.0);
    }

    #[test]
    fn folding_twice_counts_once() {
        let mut history = RunHistory::new(10);
        let mut timeline = TimelineState::begin(100.0, 1800.0);

        assert!(history
            .fold_completed_run(&mut timeline, Some(&key()), stats(1, 900.0, EndReason::Completed), 1000.0)
            .is_some());
        assert!(history
            .fold_completed_run(&mut timeline, Some(&key()), stats(1, 900.0, EndReason::Completed), 1000.0)
            .is_none());
        assert_eq!(history.stats().total_runs, 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn abandoned_runs_do_not_set_best_time() {
        let mut history = RunHistory::new(10);
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        history.fold_completed_run(&mut timeline, None, stats(9, 300.0, EndReason::Abandoned), 400.0);
        assert_eq!(history.stats().best_time_seconds, 0.0);
        assert_eq!(history.stats().total_runs, 1);
    }

    #[test]
    fn untimed_completions_do_not_set_best_time() {
        let mut history = RunHistory::new(10);
        let mut timeline = TimelineState::begin(100.0, 0.0);
        history.fold_completed_run(&mut timeline, None, stats(0, 300.0, EndReason::Completed), 400.0);
        assert_eq!(history.stats().best_time_seconds, 0.0);
    }

    #[test]
    fn retention_drops_oldest_runs() {
        let mut history = RunHistory::new(2);
        for i in 0..3 {
            let mut timeline = TimelineState::begin(100.0 + i as f64, 1800.0);
            history.fold_completed_run(&mut timeline, None, stats(i, 1000.0, EndReason::Completed), 2000.0 + i as f64);
        }
        let timestamps: Vec<f64> = history.runs().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![2001.0, 2002.0]);
        assert_eq!(history.stats().total_runs, 3);
    }

    #[test]
    fn csv_has_header_and_one_row_per_run() {
        let mut history = RunHistory::new(10);
        let mut timeline = TimelineState::begin(100.0, 1800.0);
        let mut run_stats = stats(2, 1500.0, EndReason::Completed);
        run_stats.milestones = vec!["BossA".into(), "BossB".into()];
        history.fold_completed_run(&mut timeline, Some(&key()), run_stats, 1600.0);

        let mut out = Vec::new();
        history.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,level"));
        assert!(lines[1].contains("BossA|BossB"));
        assert!(lines[1].contains("completed"));
    }

    #[test]
    fn end_reason_labels() {
        assert_eq!(EndReason::LeftActivity.to_string(), "left activity");
        assert_eq!(EndReason::Abandoned.to_string(), "abandoned");
    }
}
