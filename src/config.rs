use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::verdict::Thresholds;

/// Longest gap allowed between two recovery snapshots.
pub const MAX_PERSIST_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub penalty_seconds: f64,
    pub timeable_fraction: f64,
    pub borderline_fraction: f64,
    pub show_timeline: bool,
    pub show_markers: bool,
    pub debug: bool,
    pub history_limit: usize,
    pub default_allotted_seconds: f64,
    pub untimed_variants: Vec<u32>,
    pub refresh_interval_ms: u64,
    pub persist_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            penalty_seconds: 5.0,
            timeable_fraction: 0.8,
            borderline_fraction: 0.6,
            show_timeline: true,
            show_markers: true,
            debug: false,
            history_limit: 200,
            default_allotted_seconds: 1800.0,
            untimed_variants: vec![0],
            refresh_interval_ms: 250,
            persist_interval_secs: MAX_PERSIST_INTERVAL_SECS,
        }
    }
}

impl Settings {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            timeable: self.timeable_fraction,
            borderline: self.borderline_fraction,
        }
    }

    pub fn is_untimed_variant(&self, variant_id: u32) -> bool {
        self.untimed_variants.contains(&variant_id)
    }

    /// Repair values that would break the tracker, logging what was changed.
    pub fn sanitized(mut self) -> Self {
        let defaults = Settings::default();

        if !self.thresholds().is_valid() {
            tracing::warn!(
                timeable = self.timeable_fraction,
                borderline = self.borderline_fraction,
                "Thresholds must satisfy 0 < borderline < timeable; using defaults"
            );
            self.timeable_fraction = defaults.timeable_fraction;
            self.borderline_fraction = defaults.borderline_fraction;
        }

        if !(self.penalty_seconds >= 0.0 && self.penalty_seconds.is_finite()) {
            tracing::warn!(penalty = self.penalty_seconds, "Invalid penalty; using default");
            self.penalty_seconds = defaults.penalty_seconds;
        }

        if !(self.default_allotted_seconds > 0.0 && self.default_allotted_seconds.is_finite()) {
            self.default_allotted_seconds = defaults.default_allotted_seconds;
        }

        self.persist_interval_secs = self
            .persist_interval_secs
            .clamp(1, MAX_PERSIST_INTERVAL_SECS);
        self.refresh_interval_ms = self.refresh_interval_ms.clamp(50, 1000);
        self
    }

    /// Update a single field from its textual form, as typed on the command line.
    /// The settings are left untouched when the value is rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        next.apply(key, value)?;
        *self = next;
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |message: &str| Error::InvalidSetting {
            key: key.to_string(),
            message: message.to_string(),
        };

        match key {
            "penalty_seconds" => self.penalty_seconds = parse_number(value, &invalid)?,
            "timeable_fraction" => self.timeable_fraction = parse_number(value, &invalid)?,
            "borderline_fraction" => self.borderline_fraction = parse_number(value, &invalid)?,
            "default_allotted_seconds" => {
                self.default_allotted_seconds = parse_number(value, &invalid)?
            }
            "show_timeline" => self.show_timeline = parse_flag(value, &invalid)?,
            "show_markers" => self.show_markers = parse_flag(value, &invalid)?,
            "debug" => self.debug = parse_flag(value, &invalid)?,
            "history_limit" => {
                self.history_limit = value
                    .parse()
                    .map_err(|_| invalid("expected a whole number"))?
            }
            "refresh_interval_ms" => {
                self.refresh_interval_ms = value
                    .parse()
                    .map_err(|_| invalid("expected a whole number"))?
            }
            "persist_interval_secs" => {
                self.persist_interval_secs = value
                    .parse()
                    .map_err(|_| invalid("expected a whole number"))?
            }
            "untimed_variants" => {
                self.untimed_variants = value
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| part.parse::<u32>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| invalid("expected a comma separated list of ids"))?
            }
            _ => return Err(invalid("unknown setting")),
        }

        if !self.thresholds().is_valid() {
            return Err(invalid("thresholds must satisfy 0 < borderline < timeable"));
        }
        Ok(())
    }
}

fn parse_number(value: &str, invalid: &dyn Fn(&str) -> Error) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(number) if number.is_finite() && number >= 0.0 => Ok(number),
        _ => Err(invalid("expected a non-negative number")),
    }
}

fn parse_flag(value: &str, invalid: &dyn Fn(&str) -> Error) -> Result<bool> {
    match value {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(invalid("expected true or false")),
    }
}

pub trait ConfigStore {
    fn load(&self) -> Settings;
    fn save(&self, settings: &Settings) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "keyline") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("keyline_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Settings {
        let Ok(bytes) = fs::read(&self.path) else {
            return Settings::default();
        };

        match serde_json::from_slice::<Settings>(&bytes) {
            Ok(settings) => settings.sanitized(),
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    parse_error = %error,
                    "Ignoring unreadable config file"
                );
                Settings::default()
            }
        }
    }

    fn save(&self, settings: &Settings) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(settings).map_err(std::io::Error::other)?;
        fs::write(&self.path, data)
    }
}
