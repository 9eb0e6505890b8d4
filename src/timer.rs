//! Timer and penalty arithmetic.
//!
//! Everything here is a pure function of the start timestamp, the host clock
//! and the failure count. Elapsed time is always recomputed from the start
//! timestamp, never decremented tick by tick.

use serde::{Deserialize, Serialize};

use crate::config::Settings;

pub const MIN_TABLE_LEVEL: u32 = 2;
pub const MAX_TABLE_LEVEL: u32 = 30;

/// Allotted seconds per keystone level, one entry per level starting at
/// `MIN_TABLE_LEVEL`.
const ALLOTTED_SECONDS_BY_LEVEL: [f64; (MAX_TABLE_LEVEL - MIN_TABLE_LEVEL + 1) as usize] = [
    1800.0, 1800.0, 1800.0, 1800.0, 1800.0, 1800.0, 1800.0, 1800.0, // 2-9
    1950.0, 1950.0, 1950.0, 1950.0, 1950.0, // 10-14
    2100.0, 2100.0, 2100.0, 2100.0, 2100.0, // 15-19
    2250.0, 2250.0, 2250.0, 2250.0, 2250.0, // 20-24
    2400.0, 2400.0, 2400.0, 2400.0, 2400.0, 2400.0, // 25-30
];

/// Table lookup for a level, `None` outside the supported range.
pub fn table_allotted_seconds(level: u32) -> Option<f64> {
    if !(MIN_TABLE_LEVEL..=MAX_TABLE_LEVEL).contains(&level) {
        return None;
    }
    ALLOTTED_SECONDS_BY_LEVEL
        .get((level - MIN_TABLE_LEVEL) as usize)
        .copied()
}

/// Resolve the allotment once, at run start.
///
/// Untimed variants get `0.0`. A positive value reported by the host wins
/// over the table; out-of-range levels fall back to the configured default.
pub fn resolve_allotted_seconds(
    level: u32,
    variant_id: u32,
    host_override: Option<f64>,
    settings: &Settings,
) -> f64 {
    if settings.is_untimed_variant(variant_id) {
        return 0.0;
    }

    if let Some(seconds) = host_override.filter(|s| *s > 0.0 && s.is_finite()) {
        return seconds;
    }

    table_allotted_seconds(level).unwrap_or(settings.default_allotted_seconds)
}

/// Remaining time as reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "seconds")]
pub enum Remaining {
    /// The activity carries no enforced timer, so there is no deadline to report.
    Untimed,
    Seconds(f64),
}

impl Remaining {
    pub fn seconds(&self) -> Option<f64> {
        match self {
            Remaining::Untimed => None,
            Remaining::Seconds(s) => Some(*s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerModel {
    pub start_timestamp: f64,
    pub total_allotted_seconds: f64,
    pub penalty_per_failure: f64,
}

impl TimerModel {
    pub fn new(start_timestamp: f64, total_allotted_seconds: f64, penalty_per_failure: f64) -> Self {
        Self {
            start_timestamp,
            total_allotted_seconds,
            penalty_per_failure,
        }
    }

    pub fn is_timed(&self) -> bool {
        self.total_allotted_seconds > 0.0
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        if self.start_timestamp <= 0.0 {
            return 0.0;
        }
        (now - self.start_timestamp).max(0.0)
    }

    /// Seconds lost to failures. Untimed activities are never penalised.
    pub fn penalty(&self, failures: usize) -> f64 {
        if !self.is_timed() {
            return 0.0;
        }
        failures as f64 * self.penalty_per_failure
    }

    pub fn remaining(&self, now: f64, failures: usize) -> Remaining {
        if !self.is_timed() {
            return Remaining::Untimed;
        }
        if self.start_timestamp <= 0.0 {
            return Remaining::Seconds(0.0);
        }
        let left = self.total_allotted_seconds - self.elapsed(now) - self.penalty(failures);
        Remaining::Seconds(left.max(0.0))
    }

    /// How much of the allotment has been used, penalties included, for the bar.
    pub fn progress(&self, now: f64, failures: usize) -> Option<f64> {
        if !self.is_timed() {
            return None;
        }
        let used = self.elapsed(now) + self.penalty(failures);
        Some((used / self.total_allotted_seconds).clamp(0.0, 1.0))
    }
}

/// `mm:ss`, or `h:mm:ss` past the hour.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
