use ratatui::style::Color;
use serde::{Deserialize, Serialize};

use crate::timer::{Remaining, TimerModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Timeable,
    Borderline,
    NotTimeable,
    /// Not tracking, or the activity has no enforced timer.
    Unknown,
}

impl Verdict {
    pub fn color(&self) -> Color {
        match self {
            Verdict::Timeable => Color::Green,
            Verdict::Borderline => Color::Yellow,
            Verdict::NotTimeable => Color::Red,
            Verdict::Unknown => Color::DarkGray,
        }
    }

    /// Abandoning is only offered once the run is in trouble.
    pub fn allows_abandon(&self) -> bool {
        matches!(self, Verdict::Borderline | Verdict::NotTimeable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub timeable: f64,
    pub borderline: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            timeable: 0.8,
            borderline: 0.6,
        }
    }
}

impl Thresholds {
    pub fn is_valid(&self) -> bool {
        self.borderline > 0.0 && self.timeable > self.borderline && self.timeable.is_finite()
    }
}

/// Map a remaining-time fraction onto a verdict. Both bounds are closed below.
///
/// Callers must rule out the untimed case first; a zero allotment here is a
/// programming error and classifies as `Unknown` rather than dividing by zero.
pub fn classify(effective_remaining: f64, total_allotted_seconds: f64, thresholds: Thresholds) -> Verdict {
    if total_allotted_seconds <= 0.0 {
        return Verdict::Unknown;
    }

    let fraction = effective_remaining / total_allotted_seconds;
    if fraction >= thresholds.timeable {
        Verdict::Timeable
    } else if fraction >= thresholds.borderline {
        Verdict::Borderline
    } else {
        Verdict::NotTimeable
    }
}

/// Verdict for the live run.
pub fn evaluate(
    active: bool,
    model: &TimerModel,
    now: f64,
    failures: usize,
    thresholds: Thresholds,
) -> Verdict {
    if !active {
        return Verdict::Unknown;
    }

    match model.remaining(now, failures) {
        Remaining::Untimed => Verdict::Unknown,
        Remaining::Seconds(left) => classify(left, model.total_allotted_seconds, thresholds),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerdictTransition {
    pub from: Verdict,
    pub to: Verdict,
    pub at: f64,
}

/// Remembers the previous tick's verdict so only changes get logged.
#[derive(Debug, Clone)]
pub struct VerdictMonitor {
    last: Verdict,
    transitions: Vec<VerdictTransition>,
}

impl Default for VerdictMonitor {
    fn default() -> Self {
        Self {
            last: Verdict::Unknown,
            transitions: Vec::new(),
        }
    }
}

impl VerdictMonitor {
    pub fn last(&self) -> Verdict {
        self.last
    }

    pub fn transitions(&self) -> &[VerdictTransition] {
        &self.transitions
    }

    /// Returns the transition when `verdict` differs from the previous observation.
    pub fn observe(&mut self, verdict: Verdict, at: f64) -> Option<VerdictTransition> {
        if verdict == self.last {
            return None;
        }

        let transition = VerdictTransition {
            from: self.last,
            to: verdict,
            at,
        };
        tracing::info!(from = %transition.from, to = %transition.to, at, "Verdict changed");
        self.last = verdict;
        self.transitions.push(transition);
        Some(transition)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
