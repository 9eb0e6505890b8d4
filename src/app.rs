//! The interactive application: tracker + display state, advanced one
//! [`TrackerEvent`] at a time.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;

use crate::combat_log::CombatLogHost;
use crate::commands::{execute, Command};
use crate::runtime::{Cadence, TrackerEvent};
use crate::store::RunStore;
use crate::tracker::Tracker;
use crate::ui::{DisplayState, Panel};

pub struct App<S: RunStore> {
    pub tracker: Tracker<CombatLogHost, S>,
    pub display: DisplayState,
    persist: Cadence,
    should_quit: bool,
}

impl<S: RunStore> App<S> {
    pub fn new(tracker: Tracker<CombatLogHost, S>, persist: Cadence) -> Self {
        let settings = tracker.settings();
        let display = DisplayState::new(settings.show_timeline, settings.show_markers);
        Self {
            tracker,
            display,
            persist,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Apply one event. Returns whether the screen needs redrawing.
    pub fn handle_event(&mut self, event: TrackerEvent) -> bool {
        let redraw = self.apply(event);
        // Checked on every event: a busy log can starve the idle tick.
        if self.persist.due() {
            self.tracker.persist_tick();
        }
        redraw
    }

    fn apply(&mut self, event: TrackerEvent) -> bool {
        match event {
            TrackerEvent::Tick => {
                self.tracker.tick();
                true
            }
            TrackerEvent::Resize => true,
            TrackerEvent::LogLine(line) => {
                match self.tracker.host_mut().consume_line(&line) {
                    Some(signal) => {
                        self.tracker.handle_signal(signal);
                        true
                    }
                    None => false,
                }
            }
            TrackerEvent::Key(key) => {
                self.handle_key(key);
                true
            }
        }
    }

    /// Run a typed command and keep the reply for the command line.
    pub fn run_command(&mut self, text: &str) -> String {
        let reply = execute(Command::parse(text), &mut self.tracker, &mut self.display);
        self.display.last_reply = Some(reply.clone());
        reply
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        if self.display.input.is_some() {
            match key.code {
                KeyCode::Enter => {
                    if let Some(text) = self.display.submit() {
                        self.run_command(&text);
                    }
                }
                KeyCode::Esc => self.display.close_command_line(),
                KeyCode::Backspace => self.display.backspace(),
                KeyCode::Char(c) => self.display.push_char(c),
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char(':') | KeyCode::Char('/') => self.display.open_command_line(),
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('t') => self.display.toggle(self.tracker.is_tracking()),
            _ => {}
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        let status = self.tracker.status();
        frame.render_widget(
            Panel {
                status: &status,
                timeline: self.tracker.timeline(),
                aggregate: self.tracker.aggregate(),
                display: &self.display,
            },
            frame.area(),
        );
    }
}
