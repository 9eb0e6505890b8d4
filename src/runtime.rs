use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyEvent};

use crate::combat_log::LogTail;

/// Unified event type consumed by the app runner
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    Key(KeyEvent),
    Resize,
    LogLine(String),
    Tick,
}

/// Source of inbound events (keyboard, resize, combat log lines)
pub trait EventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    fn recv_timeout(&self, timeout: Duration) -> Result<TrackerEvent, RecvTimeoutError>;
}

/// Production event source: a crossterm reader thread, plus an optional
/// log-tail thread feeding the same channel so everything is handled in
/// arrival order on the caller's thread.
pub struct CrosstermEventSource {
    tx: Sender<TrackerEvent>,
    rx: Receiver<TrackerEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let key_tx = tx.clone();

        std::thread::spawn(move || loop {
            match event::read() {
                Ok(CtEvent::Key(key)) => {
                    if key_tx.send(TrackerEvent::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(CtEvent::Resize(_, _)) => {
                    if key_tx.send(TrackerEvent::Resize).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        });

        Self { tx, rx }
    }

    /// Poll `tail` every `poll` and forward complete lines.
    pub fn follow(&self, tail: LogTail, poll: Duration) {
        spawn_tail(tail, poll, self.tx.clone());
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<TrackerEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

fn spawn_tail(mut tail: LogTail, poll: Duration, tx: Sender<TrackerEvent>) {
    std::thread::spawn(move || loop {
        match tail.read_new_lines() {
            Ok(lines) => {
                for line in lines {
                    if tx.send(TrackerEvent::LogLine(line)).is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                tracing::warn!(path = %tail.path().display(), read_error = %error, "Failed to read combat log");
            }
        }
        std::thread::sleep(poll);
    });
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<TrackerEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<TrackerEvent>) -> Self {
        Self { rx }
    }
}

impl EventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<TrackerEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the application one event/tick at a time
pub struct Runner<E: EventSource, T: Ticker> {
    event_source: E,
    ticker: T,
}

impl<E: EventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        Self {
            event_source,
            ticker,
        }
    }

    pub fn event_source(&self) -> &E {
        &self.event_source
    }

    /// Blocks up to tick interval and returns the next event, or Tick on timeout
    pub fn step(&self) -> TrackerEvent {
        match self.event_source.recv_timeout(self.ticker.interval()) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                TrackerEvent::Tick
            }
        }
    }
}

/// A slower schedule riding on the display tick (the persistence tick).
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    last: Instant,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, last: Instant) -> Self {
        Self { interval, last }
    }

    pub fn due(&mut self) -> bool {
        self.due_at(Instant::now())
    }

    /// True at most once per interval; restarts the interval when it fires.
    pub fn due_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn step_returns_tick_on_timeout() {
        let (_tx, rx) = mpsc::channel();
        let es = TestEventSource::new(rx);
        let ticker = FixedTicker::new(Duration::from_millis(1));
        let runner = Runner::new(es, ticker);

        match runner.step() {
            TrackerEvent::Tick => {}
            _ => panic!("expected Tick on timeout"),
        }
    }

    #[test]
    fn step_passes_through_events_in_order() {
        let (tx, rx) = mpsc::channel();
        tx.send(TrackerEvent::LogLine("first".into())).unwrap();
        tx.send(TrackerEvent::Resize).unwrap();
        let runner = Runner::new(TestEventSource::new(rx), FixedTicker::new(Duration::from_millis(10)));

        match runner.step() {
            TrackerEvent::LogLine(line) => assert_eq!(line, "first"),
            _ => panic!("expected LogLine event"),
        }
        match runner.step() {
            TrackerEvent::Resize => {}
            _ => panic!("expected Resize event"),
        }
    }

    #[test]
    fn tail_thread_forwards_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("WoWCombatLog.txt");
        std::fs::write(&path, "a\nb\n").unwrap();

        let (tx, rx) = mpsc::channel();
        spawn_tail(LogTail::from_start(&path), Duration::from_millis(5), tx);
        let runner = Runner::new(TestEventSource::new(rx), FixedTicker::new(Duration::from_secs(2)));

        let mut lines = Vec::new();
        for _ in 0..2 {
            if let TrackerEvent::LogLine(line) = runner.step() {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn cadence_fires_once_per_interval() {
        let start = Instant::now();
        let mut cadence = Cadence::starting_at(Duration::from_secs(5), start);

        assert!(!cadence.due_at(start + Duration::from_secs(1)));
        assert!(cadence.due_at(start + Duration::from_secs(5)));
        assert!(!cadence.due_at(start + Duration::from_secs(6)));
        assert!(cadence.due_at(start + Duration::from_secs(10)));
    }
}
