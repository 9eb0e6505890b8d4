//! Run lifecycle: idle → active → ended → idle, plus recovery after a restart.
//!
//! All mutation happens on the caller's thread in the order signals arrive.
//! Signals that make no sense in the current phase are logged and dropped.

use serde::Serialize;

use crate::config::Settings;
use crate::error::{Rejected, Result};
use crate::history::{AggregateStatistics, EndReason, RunHistory, RunStats, RunSummary};
use crate::host::{Host, HostSignal};
use crate::store::{InflightSnapshot, RunStore};
use crate::timeline::{ActivityRecord, JournalKind, TimelineState};
use crate::timer::{resolve_allotted_seconds, Remaining};
use crate::verdict::{evaluate, Verdict, VerdictMonitor, VerdictTransition};

/// How far the host's start time may sit from a saved run's start for the
/// two to count as the same run.
const RECOVERY_START_TOLERANCE_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Idle,
    Active,
    /// Only observed while a run is being folded; the tracker is idle again
    /// by the time `end_run` returns.
    Ended,
}

/// Derived view of the live run, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub phase: Phase,
    pub key: Option<ActivityRecord>,
    pub elapsed_seconds: f64,
    pub total_allotted_seconds: f64,
    pub penalty_seconds: f64,
    pub remaining: Remaining,
    pub progress: Option<f64>,
    pub verdict: Verdict,
    pub death_count: usize,
    pub milestones: Vec<String>,
}

pub struct Tracker<H: Host, S: RunStore> {
    host: H,
    store: S,
    settings: Settings,
    history: RunHistory,
    phase: Phase,
    key: Option<ActivityRecord>,
    timeline: TimelineState,
    monitor: VerdictMonitor,
}

impl<H: Host, S: RunStore> Tracker<H, S> {
    /// Wire up a tracker and load the persisted history. Does not attempt
    /// recovery; call [`Tracker::recover`] once the host context is known.
    pub fn new(host: H, store: S, settings: Settings) -> Result<Self> {
        let limit = settings.history_limit;
        let history = RunHistory::with_contents(store.load_stats()?, store.load_history(limit)?, limit);

        Ok(Self {
            host,
            store,
            settings,
            history,
            phase: Phase::Idle,
            key: None,
            timeline: TimelineState::default(),
            monitor: VerdictMonitor::default(),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_tracking(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn key(&self) -> Option<&ActivityRecord> {
        self.key.as_ref()
    }

    pub fn timeline(&self) -> &TimelineState {
        &self.timeline
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn aggregate(&self) -> &AggregateStatistics {
        self.history.stats()
    }

    pub fn verdict_transitions(&self) -> &[VerdictTransition] {
        self.monitor.transitions()
    }

    pub fn status(&self) -> Status {
        let now = self.host.now();
        let model = self.timeline.timer_model(self.settings.penalty_seconds);
        let failures = self.timeline.failure_count();
        let active = self.timeline.is_active;

        Status {
            phase: self.phase,
            key: self.key,
            elapsed_seconds: model.elapsed(now),
            total_allotted_seconds: self.timeline.total_allotted_seconds,
            penalty_seconds: model.penalty(failures),
            remaining: model.remaining(now, failures),
            progress: model.progress(now, failures),
            verdict: evaluate(active, &model, now, failures, self.settings.thresholds()),
            death_count: failures,
            milestones: self.timeline.milestone_labels(),
        }
    }

    /// Display tick: recompute the derived status and note verdict changes.
    pub fn tick(&mut self) -> Status {
        let status = self.status();
        if status.phase == Phase::Active {
            self.monitor.observe(status.verdict, self.host.now());
        }
        status
    }

    /// Persistence tick: keep the recovery snapshot at most one tick stale.
    /// Write failures are logged; the next tick simply tries again.
    pub fn persist_tick(&mut self) {
        let outcome = match (self.phase, self.key) {
            (Phase::Active, Some(key)) => self.store.save_inflight(&InflightSnapshot {
                key,
                timeline: self.timeline.clone(),
                saved_at: self.host.now(),
            }),
            _ => self.store.clear_inflight(),
        };

        if let Err(error) = outcome {
            tracing::warn!(store_error = %error, "Failed to persist in-flight run");
        }
    }

    pub fn handle_signal(&mut self, signal: HostSignal) {
        tracing::debug!(%signal, phase = %self.phase, "Host signal");

        match signal {
            HostSignal::ActivityStarted { level, variant_id } => {
                if self.is_tracking() {
                    tracing::info!("New activity started while tracking; closing previous run");
                    self.end_run(EndReason::Replaced);
                }
                self.begin_run(level, variant_id);
            }
            HostSignal::ActivityCompleted => {
                if self.is_tracking() {
                    self.end_run(EndReason::Completed);
                } else {
                    tracing::warn!("Ignoring activity completion while not tracking");
                }
            }
            HostSignal::ActivityReset => {
                if self.is_tracking() {
                    self.end_run(EndReason::Reset);
                } else {
                    tracing::debug!("Ignoring activity reset while not tracking");
                }
            }
            HostSignal::ParticipantDeath { reason } => {
                let _ = self.record_failure(&reason);
            }
            HostSignal::MilestoneCompleted { name } => {
                let _ = self.record_milestone(&name);
            }
            HostSignal::ZoneChanged => self.reconcile_with_host(),
        }
    }

    pub fn record_failure(&mut self, reason: &str) -> std::result::Result<u32, Rejected> {
        let now = self.host.now();
        match self.timeline.record_failure(reason, now) {
            Ok(sequence) => {
                tracing::info!(sequence, reason, "Failure recorded");
                self.tick();
                Ok(sequence)
            }
            Err(rejected) => {
                tracing::warn!(reason, %rejected, "Failure signal out of context");
                Err(rejected)
            }
        }
    }

    pub fn record_milestone(&mut self, name: &str) -> std::result::Result<(), Rejected> {
        let now = self.host.now();
        match self.timeline.record_milestone(name, now) {
            Ok(()) => {
                tracing::info!(milestone = name, "Milestone recorded");
                self.tick();
                Ok(())
            }
            Err(rejected) => {
                tracing::warn!(milestone = name, %rejected, "Milestone signal out of context");
                Err(rejected)
            }
        }
    }

    /// Give up on a run that can no longer be timed.
    pub fn abandon(&mut self) -> std::result::Result<Option<RunSummary>, Rejected> {
        if !self.is_tracking() {
            tracing::warn!("Abandon requested while not tracking");
            return Err(Rejected::NotTracking);
        }

        if !self.timeline.timer_model(self.settings.penalty_seconds).is_timed() {
            tracing::warn!("Abandon refused for an untimed run");
            return Err(Rejected::Untimed);
        }

        let verdict = self.status().verdict;
        if !verdict.allows_abandon() {
            tracing::warn!(%verdict, "Abandon refused");
            return Err(Rejected::StillTimeable(verdict.to_string()));
        }

        Ok(self.end_run(EndReason::Abandoned))
    }

    /// User reset: ends a tracked run, otherwise only clears leftovers.
    pub fn reset(&mut self) -> std::result::Result<Option<RunSummary>, Rejected> {
        if self.is_tracking() {
            return Ok(self.end_run(EndReason::Reset));
        }

        self.timeline.clear();
        self.key = None;
        self.monitor.clear();
        if let Err(error) = self.store.clear_inflight() {
            tracing::warn!(store_error = %error, "Failed to clear saved run");
        }
        Err(Rejected::NothingToReset)
    }

    /// Restore a run interrupted by a restart.
    ///
    /// The saved snapshot is only trusted when the host independently
    /// confirms the player is still inside the same activity; anything else
    /// discards it, leaving statistics untouched.
    pub fn recover(&mut self) -> std::result::Result<(), Rejected> {
        if self.is_tracking() {
            tracing::debug!("Recovery skipped; already tracking");
            return Ok(());
        }

        let snapshot = match self.store.load_inflight() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Err(Rejected::NothingToRestore),
            Err(error) => {
                tracing::error!(store_error = %error, "Unreadable saved run; discarding");
                self.discard_snapshot();
                return Err(Rejected::NothingToRestore);
            }
        };

        if !snapshot.timeline.is_active {
            self.discard_snapshot();
            return Err(Rejected::NothingToRestore);
        }

        // A fresh key in the same dungeon and level matches on identity
        // alone; the host's own timer tells the two runs apart.
        let same_start = match self.host.activity_elapsed_seconds() {
            Some(elapsed) if elapsed.is_finite() => {
                let host_start = self.host.now() - elapsed;
                (host_start - snapshot.key.start_timestamp).abs() <= RECOVERY_START_TOLERANCE_SECS
            }
            _ => true,
        };
        let confirmed = self.host.is_activity_active()
            && self.host.active_level() == Some(snapshot.key.level)
            && self.host.active_variant() == Some(snapshot.key.variant_id)
            && same_start;
        if !confirmed {
            tracing::warn!(
                level = snapshot.key.level,
                variant = snapshot.key.variant_id,
                "Host does not confirm the saved run; discarding it"
            );
            self.discard_snapshot();
            return Err(Rejected::StaleSnapshot);
        }

        tracing::info!(
            level = snapshot.key.level,
            variant = snapshot.key.variant_id,
            deaths = snapshot.timeline.failure_count(),
            "Restored interrupted run"
        );
        self.key = Some(snapshot.key);
        self.timeline = snapshot.timeline;
        self.monitor.clear();
        self.set_phase(Phase::Active);
        self.tick();
        Ok(())
    }

    /// Close the current run: journal it, fold it into the history, clear it.
    /// Returns the folded summary, or `None` when there was nothing to fold.
    pub fn end_run(&mut self, reason: EndReason) -> Option<RunSummary> {
        if !self.timeline.is_active {
            tracing::warn!(%reason, "End requested with no tracked run");
            return None;
        }

        let now = self.host.now();
        let status = self.status();
        let _ = self.timeline.record_journal_entry(
            JournalKind::End,
            &format!("Run ended: {reason}"),
            status.elapsed_seconds,
            now,
        );
        self.set_phase(Phase::Ended);

        let stats = RunStats {
            elapsed_seconds: status.elapsed_seconds,
            death_count: status.death_count,
            penalty_seconds: status.penalty_seconds,
            remaining: status.remaining,
            verdict: status.verdict,
            milestones: status.milestones,
            end_reason: reason,
        };

        let summary = self
            .history
            .fold_completed_run(&mut self.timeline, self.key.as_ref(), stats, now)
            .cloned();

        if let Some(summary) = summary.as_ref() {
            if let Err(error) =
                self.store
                    .record_run(summary, self.history.stats(), self.history.limit())
            {
                tracing::error!(store_error = %error, "Failed to store finished run");
            }
            tracing::info!(
                %reason,
                elapsed = summary.stats.elapsed_seconds,
                deaths = summary.stats.death_count,
                "Run folded into history"
            );
        }

        self.discard_snapshot();
        self.timeline.clear();
        self.key = None;
        self.monitor.clear();
        self.set_phase(Phase::Idle);
        summary
    }

    fn begin_run(&mut self, level: u32, variant_id: u32) {
        let now = self.host.now();
        let already_elapsed = self
            .host
            .activity_elapsed_seconds()
            .filter(|seconds| seconds.is_finite())
            .unwrap_or(0.0)
            .max(0.0);
        let start_timestamp = now - already_elapsed;
        let allotted = resolve_allotted_seconds(
            level,
            variant_id,
            self.host.authoritative_allotted_seconds(),
            &self.settings,
        );

        self.key = Some(ActivityRecord {
            level,
            variant_id,
            start_timestamp,
        });
        self.timeline = TimelineState::begin(start_timestamp, allotted);
        let _ = self.timeline.record_journal_entry(
            JournalKind::Start,
            &format!("Started +{level} (variant {variant_id})"),
            0.0,
            now,
        );
        self.monitor.clear();
        self.set_phase(Phase::Active);

        tracing::info!(level, variant_id, allotted, "Tracking started");
        self.persist_tick();
        self.tick();
    }

    /// Poll the host after a zone change, since there is no explicit
    /// "left the activity" signal.
    fn reconcile_with_host(&mut self) {
        let host_active = self.host.is_activity_active();

        if self.is_tracking() && !host_active {
            tracing::info!("Left the activity; ending run");
            self.end_run(EndReason::LeftActivity);
            return;
        }

        if !self.is_tracking() && host_active {
            if let (Some(level), Some(variant_id)) =
                (self.host.active_level(), self.host.active_variant())
            {
                tracing::info!(level, variant_id, "Activity already running; joining late");
                self.begin_run(level, variant_id);
            }
        }
    }

    fn discard_snapshot(&self) {
        if let Err(error) = self.store.clear_inflight() {
            tracing::warn!(store_error = %error, "Failed to clear saved run");
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "Phase change");
            self.phase = phase;
        }
    }
}
