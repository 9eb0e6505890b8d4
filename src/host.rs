//! The game client as seen by the tracker: queries it can issue and the
//! lifecycle signals it receives.

use std::fmt;

/// Inbound lifecycle signals, delivered in occurrence order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostSignal {
    ActivityStarted { level: u32, variant_id: u32 },
    ActivityCompleted,
    ActivityReset,
    ParticipantDeath { reason: String },
    MilestoneCompleted { name: String },
    ZoneChanged,
}

impl fmt::Display for HostSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSignal::ActivityStarted { level, variant_id } => {
                write!(f, "activity-started(+{level}, variant {variant_id})")
            }
            HostSignal::ActivityCompleted => write!(f, "activity-completed"),
            HostSignal::ActivityReset => write!(f, "activity-reset"),
            HostSignal::ParticipantDeath { reason } => write!(f, "participant-death({reason})"),
            HostSignal::MilestoneCompleted { name } => write!(f, "milestone-completed({name})"),
            HostSignal::ZoneChanged => write!(f, "zone-changed"),
        }
    }
}

/// Outbound queries against the game client.
pub trait Host {
    /// Host wall clock, in seconds.
    fn now(&self) -> f64;
    fn is_activity_active(&self) -> bool;
    fn active_level(&self) -> Option<u32>;
    fn active_variant(&self) -> Option<u32>;

    /// Authoritative allotment for the running activity, when the host knows it.
    fn authoritative_allotted_seconds(&self) -> Option<f64> {
        None
    }

    /// The activity's own elapsed timer, when the host exposes it.
    fn activity_elapsed_seconds(&self) -> Option<f64> {
        None
    }
}

/// Host driven by hand, for headless runs and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualHost {
    pub clock: f64,
    pub active: Option<(u32, u32)>,
    pub allotted_override: Option<f64>,
    pub elapsed_timer: Option<f64>,
}

impl ManualHost {
    pub fn new(clock: f64) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    pub fn advance(&mut self, seconds: f64) {
        self.clock += seconds;
    }

    pub fn enter_activity(&mut self, level: u32, variant_id: u32) {
        self.active = Some((level, variant_id));
    }

    pub fn leave_activity(&mut self) {
        self.active = None;
        self.elapsed_timer = None;
    }
}

impl Host for ManualHost {
    fn now(&self) -> f64 {
        self.clock
    }

    fn is_activity_active(&self) -> bool {
        self.active.is_some()
    }

    fn active_level(&self) -> Option<u32> {
        self.active.map(|(level, _)| level)
    }

    fn active_variant(&self) -> Option<u32> {
        self.active.map(|(_, variant)| variant)
    }

    fn authoritative_allotted_seconds(&self) -> Option<f64> {
        self.allotted_override
    }

    fn activity_elapsed_seconds(&self) -> Option<f64> {
        self.elapsed_timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_host_tracks_activity_context() {
        let mut host = ManualHost::new(10.0);
        assert!(!host.is_activity_active());

        host.enter_activity(12, 375);
        host.advance(2.5);
        assert!(host.is_activity_active());
        assert_eq!(host.active_level(), Some(12));
        assert_eq!(host.active_variant(), Some(375));
        assert_eq!(host.now(), 12.5);

        host.leave_activity();
        assert_eq!(host.active_level(), None);
    }

    #[test]
    fn signals_display_compactly() {
        let signal = HostSignal::ActivityStarted {
            level: 15,
            variant_id: 1,
        };
        assert_eq!(signal.to_string(), "activity-started(+15, variant 1)");
    }
}
