//! A [`Host`] backed by the game's combat log.
//!
//! Lines are fed in file order; each one updates the host context and may
//! produce a [`HostSignal`]. The clock comes from the line timestamps, so a
//! replayed file yields the same run as watching it live did.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use chrono::{NaiveDate, NaiveTime};

use crate::host::{Host, HostSignal};

const EVENT_CHALLENGE_START: &str = "CHALLENGE_MODE_START";
const EVENT_CHALLENGE_END: &str = "CHALLENGE_MODE_END";
const EVENT_ENCOUNTER_END: &str = "ENCOUNTER_END";
const EVENT_UNIT_DIED: &str = "UNIT_DIED";
const EVENT_ZONE_CHANGE: &str = "ZONE_CHANGE";

const TYPE_PLAYER: u32 = 0x0000_0400;

/// Logs without a year in the timestamp are pinned to this one.
const DEFAULT_LOG_YEAR: i32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ActivityContext {
    instance_id: u32,
    level: u32,
    variant_id: u32,
    started_at: f64,
}

#[derive(Debug, Default)]
pub struct CombatLogHost {
    log_clock: f64,
    /// Set while following a live file: `now()` keeps advancing between lines.
    anchor: Option<Instant>,
    following: bool,
    activity: Option<ActivityContext>,
    lines_seen: u64,
}

impl CombatLogHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host for a file being written right now.
    pub fn following() -> Self {
        Self {
            following: true,
            ..Self::default()
        }
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }

    pub fn consume_line(&mut self, line: &str) -> Option<HostSignal> {
        let parsed = parse_line(line)?;
        self.lines_seen += 1;

        // Lines flushed late carry timestamps behind the drifted clock; the
        // clock only ever moves forward.
        if let Some(timestamp) = parsed.timestamp {
            if timestamp > self.now() {
                self.log_clock = timestamp;
                if self.following {
                    self.anchor = Some(Instant::now());
                }
            }
        }

        match parsed.event_type.as_str() {
            EVENT_CHALLENGE_START => self.challenge_started(&parsed.fields),
            EVENT_CHALLENGE_END => self.challenge_ended(&parsed.fields),
            EVENT_ENCOUNTER_END => self.encounter_ended(&parsed.fields),
            EVENT_UNIT_DIED => unit_died(&parsed.fields),
            EVENT_ZONE_CHANGE => self.zone_changed(&parsed.fields),
            _ => None,
        }
    }

    fn challenge_started(&mut self, fields: &[String]) -> Option<HostSignal> {
        let instance_id = parse_number(fields.get(1))?;
        let variant_id = parse_number(fields.get(2))?;
        let level = parse_number(fields.get(3))?;

        self.activity = Some(ActivityContext {
            instance_id,
            level,
            variant_id,
            started_at: self.now(),
        });
        Some(HostSignal::ActivityStarted { level, variant_id })
    }

    fn challenge_ended(&mut self, fields: &[String]) -> Option<HostSignal> {
        let success = parse_number(fields.get(1)).unwrap_or(0) == 1;
        self.activity = None;

        if success {
            Some(HostSignal::ActivityCompleted)
        } else {
            Some(HostSignal::ActivityReset)
        }
    }

    fn encounter_ended(&self, fields: &[String]) -> Option<HostSignal> {
        self.activity?;
        if parse_number(fields.get(4)) != Some(1) {
            return None;
        }
        let name = normalize_name(fields.get(1).map(String::as_str))?;
        Some(HostSignal::MilestoneCompleted { name })
    }

    fn zone_changed(&mut self, fields: &[String]) -> Option<HostSignal> {
        let instance_id = parse_number(fields.first());
        if let Some(activity) = self.activity {
            if instance_id != Some(activity.instance_id) {
                tracing::debug!(
                    from = activity.instance_id,
                    to = ?instance_id,
                    "Zone change left the activity instance"
                );
                self.activity = None;
            }
        }
        Some(HostSignal::ZoneChanged)
    }
}

impl Host for CombatLogHost {
    fn now(&self) -> f64 {
        let drift = self
            .anchor
            .map(|anchor| anchor.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.log_clock + drift
    }

    fn is_activity_active(&self) -> bool {
        self.activity.is_some()
    }

    fn active_level(&self) -> Option<u32> {
        self.activity.map(|activity| activity.level)
    }

    fn active_variant(&self) -> Option<u32> {
        self.activity.map(|activity| activity.variant_id)
    }

    fn activity_elapsed_seconds(&self) -> Option<f64> {
        self.activity
            .map(|activity| (self.now() - activity.started_at).max(0.0))
    }
}

fn unit_died(fields: &[String]) -> Option<HostSignal> {
    let dest_guid = fields.get(4).map(String::as_str);
    let dest_name = fields.get(5).map(String::as_str);
    let dest_flags = fields.get(6).map(String::as_str);

    if !is_player(dest_flags, dest_guid) {
        return None;
    }

    let reason = normalize_name(dest_name)
        .map(|name| trim_realm(&name))
        .unwrap_or_default();
    Some(HostSignal::ParticipantDeath { reason })
}

#[derive(Debug)]
struct ParsedLine {
    timestamp: Option<f64>,
    event_type: String,
    fields: Vec<String>,
}

fn parse_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (header, rest) = trimmed.split_once(',').unwrap_or((trimmed, ""));
    let header = header.trim();
    let (timestamp, event_type) = match header.rsplit_once("  ") {
        Some((timestamp, event_type)) => (parse_log_timestamp(timestamp), event_type.trim()),
        None => (None, header.split_whitespace().last()?),
    };

    Some(ParsedLine {
        timestamp,
        event_type: event_type.to_string(),
        fields: split_fields(rest),
    })
}

/// Comma separated, except inside double quotes (zone names carry commas).
fn split_fields(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for character in text.chars() {
        match character {
            '"' => {
                quoted = !quoted;
                current.push(character);
            }
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(character),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// `M/D HH:MM:SS.fff` or `M/D/YYYY HH:MM:SS.ffff±TZ`, as seconds since the epoch.
pub fn parse_log_timestamp(text: &str) -> Option<f64> {
    let mut parts = text.split_whitespace();
    let date = parts.next()?;
    let time = parts.next()?;

    let mut date_parts = date.split('/');
    let month: u32 = date_parts.next()?.parse().ok()?;
    let day: u32 = date_parts.next()?.parse().ok()?;
    let year: i32 = match date_parts.next() {
        Some(year) => year.parse().ok()?,
        None => DEFAULT_LOG_YEAR,
    };

    // Newer clients append a UTC offset such as `-4` after the fraction.
    let time = match time.char_indices().skip(1).find(|(_, c)| *c == '-' || *c == '+') {
        Some((index, _)) => &time[..index],
        None => time,
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").ok()?;
    let millis = date.and_time(time).and_utc().timestamp_millis();
    Some(millis as f64 / 1000.0)
}

fn is_player(flags: Option<&str>, guid: Option<&str>) -> bool {
    if let Some(flags) = flags.and_then(parse_flags) {
        return flags & TYPE_PLAYER != 0;
    }
    normalize_name(guid)
        .map(|guid| guid.starts_with("Player-"))
        .unwrap_or(false)
}

fn parse_flags(raw: &str) -> Option<u32> {
    let value = raw.trim().trim_matches('"');
    if value.is_empty() || value == "nil" {
        return None;
    }
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_number(value: Option<&String>) -> Option<u32> {
    value?.trim_matches('"').parse().ok()
}

fn normalize_name(name: Option<&str>) -> Option<String> {
    let value = name?.trim();
    if value.is_empty() || value == "nil" {
        return None;
    }
    Some(value.trim_matches('"').to_string())
}

/// `Name-Realm-EU` → `Name`.
fn trim_realm(name: &str) -> String {
    name.split('-').next().unwrap_or(name).to_string()
}

fn is_combat_log_file_name(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower.starts_with("wowcombatlog") && lower.ends_with(".txt")
}

/// Resolve a path given on the command line: a log file is used as is, a
/// directory (or its `Logs` subdirectory) yields its newest combat log.
pub fn resolve_log_path(path: &Path) -> io::Result<Option<PathBuf>> {
    if path.is_file() {
        return Ok(Some(path.to_path_buf()));
    }

    let logs = path.join("Logs");
    let directory = if logs.is_dir() { logs } else { path.to_path_buf() };
    let entries = match std::fs::read_dir(&directory) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let candidate = entry.path();
        let Some(file_name) = candidate.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !candidate.is_file() || !is_combat_log_file_name(file_name) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if latest
            .as_ref()
            .map(|(latest_time, _)| modified > *latest_time)
            .unwrap_or(true)
        {
            latest = Some((modified, candidate));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Follows a growing file, handing out complete lines only.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    /// Raw bytes of a line the writer has not finished yet.
    partial: Vec<u8>,
}

impl LogTail {
    /// Start reading at the beginning of the file.
    pub fn from_start<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// Skip whatever the file already holds.
    pub fn from_end<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let offset = std::fs::metadata(path.as_ref())?.len();
        Ok(Self {
            offset,
            ..Self::from_start(path)
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let length = file.metadata()?.len();

        if length < self.offset {
            tracing::info!(path = %self.path.display(), "Log file shrank; reading from the start");
            self.offset = 0;
            self.partial.clear();
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);
        let mut lines = Vec::new();

        loop {
            let bytes_read = reader.read_until(b'\n', &mut self.partial)?;
            if bytes_read == 0 {
                break;
            }
            self.offset = self.offset.saturating_add(bytes_read as u64);

            if self.partial.ends_with(b"\n") {
                let raw = std::mem::take(&mut self.partial);
                lines.push(decode_line(&raw));
            }
        }

        Ok(lines)
    }
}

/// Decode one finished line. Invalid UTF-8 is replaced, never fatal.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
