use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::history::AggregateStatistics;
use crate::timeline::{JournalKind, TimelineState};
use crate::timer::{format_clock, Remaining};
use crate::tracker::{Phase, Status};

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;

pub const DEATH_MARKER: char = 'x';
pub const MILESTONE_MARKER: char = '*';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    /// Shown while a run is tracked, hidden otherwise.
    #[default]
    Auto,
    /// Forced on, even while idle.
    Shown,
    Hidden,
}

/// Presentation state owned by the UI; never touches the run itself.
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    pub visibility: Visibility,
    pub show_markers: bool,
    pub show_timeline: bool,
    /// `Some` while the command line is open.
    pub input: Option<String>,
    pub last_reply: Option<String>,
}

impl DisplayState {
    pub fn new(show_timeline: bool, show_markers: bool) -> Self {
        Self {
            show_timeline,
            show_markers,
            ..Self::default()
        }
    }

    pub fn is_visible(&self, tracking: bool) -> bool {
        match self.visibility {
            Visibility::Auto => tracking,
            Visibility::Shown => true,
            Visibility::Hidden => false,
        }
    }

    pub fn toggle(&mut self, tracking: bool) {
        self.visibility = if self.is_visible(tracking) {
            Visibility::Hidden
        } else {
            Visibility::Shown
        };
    }

    pub fn open_command_line(&mut self) {
        self.input = Some(String::new());
    }

    pub fn close_command_line(&mut self) {
        self.input = None;
    }

    pub fn push_char(&mut self, c: char) {
        if let Some(input) = self.input.as_mut() {
            input.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if let Some(input) = self.input.as_mut() {
            input.pop();
        }
    }

    /// Close the command line and hand back what was typed.
    pub fn submit(&mut self) -> Option<String> {
        self.input.take()
    }
}

/// Cells of the progress bar that are used up, out of `width`.
pub fn filled_cells(progress: f64, width: usize) -> usize {
    ((progress.clamp(0.0, 1.0) * width as f64).round() as usize).min(width)
}

/// One character per bar cell: deaths and milestones where the bar stood
/// when they happened, penalties included, so they line up with the fill.
/// A milestone wins a cell shared with a death.
pub fn marker_row(timeline: &TimelineState, penalty_per_failure: f64, width: usize) -> String {
    let mut cells = vec![' '; width];
    if width == 0 || timeline.total_allotted_seconds <= 0.0 {
        return cells.into_iter().collect();
    }

    let mut place = |timestamp: f64, marker: char| {
        let deaths_so_far = timeline
            .failure_events
            .iter()
            .filter(|failure| failure.timestamp <= timestamp)
            .count();
        let used = timeline.elapsed_seconds(timestamp) + deaths_so_far as f64 * penalty_per_failure;
        let offset = used / timeline.total_allotted_seconds;
        let index = ((offset * width as f64).floor() as usize).min(width - 1);
        if cells[index] != MILESTONE_MARKER {
            cells[index] = marker;
        }
    };

    for failure in &timeline.failure_events {
        place(failure.timestamp, DEATH_MARKER);
    }
    for milestone in &timeline.milestone_events {
        place(milestone.timestamp, MILESTONE_MARKER);
    }

    cells.into_iter().collect()
}

fn penalty_per_failure(status: &Status) -> f64 {
    if status.death_count == 0 {
        return 0.0;
    }
    status.penalty_seconds / status.death_count as f64
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let cell = c.width().unwrap_or(0);
        if used + cell + 1 > width {
            break;
        }
        used += cell;
        out.push(c);
    }
    out.push('…');
    out
}

/// The tracker panel. Read-only view over tracker state.
pub struct Panel<'a> {
    pub status: &'a Status,
    pub timeline: &'a TimelineState,
    pub aggregate: &'a AggregateStatistics,
    pub display: &'a DisplayState,
}

impl Widget for Panel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let bold_style = Style::default().add_modifier(Modifier::BOLD);
        let dim_style = Style::default().add_modifier(Modifier::DIM);
        let verdict_style = Style::default()
            .patch(bold_style)
            .fg(self.status.verdict.color());

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(area);
        let width = chunks[1].width as usize;

        self.render_command_line(chunks[5], buf, dim_style);

        let tracking = self.status.phase == Phase::Active;
        if !self.display.is_visible(tracking) {
            Paragraph::new(Span::styled("hidden (press : then type show)", dim_style))
                .render(chunks[0], buf);
            return;
        }

        if !tracking {
            Paragraph::new(Span::styled(
                "Not tracking. Waiting for a keystone to start.",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::ITALIC),
            ))
            .alignment(Alignment::Center)
            .render(chunks[0], buf);

            let best = if self.aggregate.best_time_seconds > 0.0 {
                format_clock(self.aggregate.best_time_seconds)
            } else {
                "--:--".to_string()
            };
            Paragraph::new(Span::styled(
                format!(
                    "runs {}  deaths/run {:.1}  best {}",
                    self.aggregate.total_runs, self.aggregate.average_failures, best
                ),
                dim_style,
            ))
            .alignment(Alignment::Center)
            .render(chunks[2], buf);
            return;
        }

        let header = match self.status.key {
            Some(key) => format!("+{} (variant {})", key.level, key.variant_id),
            None => "run".to_string(),
        };
        Paragraph::new(Line::from(vec![
            Span::styled(header, bold_style),
            Span::raw("  "),
            Span::styled(self.status.verdict.to_string(), verdict_style),
        ]))
        .render(chunks[0], buf);

        if self.display.show_timeline {
            match self.status.progress {
                Some(progress) => {
                    let filled = filled_cells(progress, width);
                    Paragraph::new(Line::from(vec![
                        Span::styled(
                            "█".repeat(filled),
                            Style::default().fg(self.status.verdict.color()),
                        ),
                        Span::styled("░".repeat(width - filled), dim_style),
                    ]))
                    .render(chunks[1], buf);
                }
                None => Paragraph::new(Span::styled("untimed", dim_style)).render(chunks[1], buf),
            }

            if self.display.show_markers {
                Paragraph::new(Span::styled(
                    marker_row(self.timeline, penalty_per_failure(self.status), width),
                    Style::default().fg(Color::Magenta),
                ))
                .render(chunks[2], buf);
            }
        }

        let remaining = match self.status.remaining {
            Remaining::Untimed => "untimed".to_string(),
            Remaining::Seconds(seconds) => format!("{} left", format_clock(seconds)),
        };
        Paragraph::new(Span::raw(format!(
            "{}  elapsed {}  deaths {} (-{})  bosses {}",
            remaining,
            format_clock(self.status.elapsed_seconds),
            self.status.death_count,
            format_clock(self.status.penalty_seconds),
            self.status.milestones.len(),
        )))
        .render(chunks[3], buf);

        let rows = chunks[4].height as usize;
        let journal = self
            .timeline
            .journal
            .iter()
            .rev()
            .take(rows)
            .rev()
            .map(|entry| {
                let style = match entry.kind {
                    JournalKind::Failure => Style::default().fg(Color::Red),
                    JournalKind::Milestone => Style::default().fg(Color::Green),
                    JournalKind::Start | JournalKind::End => dim_style,
                };
                let text = format!("{} {}", format_clock(entry.occurs_at), entry.description);
                Line::from(Span::styled(truncate_to_width(&text, width), style))
            })
            .collect::<Vec<Line>>();
        Paragraph::new(journal)
            .wrap(Wrap { trim: true })
            .render(chunks[4], buf);
    }
}

impl Panel<'_> {
    fn render_command_line(&self, area: Rect, buf: &mut Buffer, dim_style: Style) {
        let line = match (&self.display.input, &self.display.last_reply) {
            (Some(input), _) => Line::from(vec![Span::raw(":"), Span::raw(input.clone())]),
            (None, Some(reply)) => Line::from(Span::styled(
                truncate_to_width(reply.lines().next().unwrap_or_default(), area.width as usize),
                dim_style,
            )),
            (None, None) => Line::from(Span::styled(": command   q quit", dim_style)),
        };
        Paragraph::new(line).render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::ActivityRecord;
    use crate::verdict::Verdict;

    fn active_status(timeline: &TimelineState, now: f64) -> Status {
        let model = timeline.timer_model(5.0);
        let failures = timeline.failure_count();
        Status {
            phase: Phase::Active,
            key: Some(ActivityRecord {
                level: 15,
                variant_id: 1,
                start_timestamp: timeline.start_timestamp,
            }),
            elapsed_seconds: model.elapsed(now),
            total_allotted_seconds: timeline.total_allotted_seconds,
            penalty_seconds: model.penalty(failures),
            remaining: model.remaining(now, failures),
            progress: model.progress(now, failures),
            verdict: Verdict::Timeable,
            death_count: failures,
            milestones: timeline.milestone_labels(),
        }
    }

    fn idle_status() -> Status {
        Status {
            phase: Phase::Idle,
            key: None,
            elapsed_seconds: 0.0,
            total_allotted_seconds: 0.0,
            penalty_seconds: 0.0,
            remaining: Remaining::Untimed,
            progress: None,
            verdict: Verdict::Unknown,
            death_count: 0,
            milestones: vec![],
        }
    }

    fn timeline() -> TimelineState {
        let mut timeline = TimelineState::begin(1000.0, 1000.0);
        timeline.record_failure("Tank", 1100.0).unwrap();
        timeline.record_milestone("BossA", 1500.0).unwrap();
        timeline
    }

    fn render(panel: Panel, width: u16, height: u16) -> String {
        let area = Rect::new(0, 0, width, height);
        let mut buffer = Buffer::empty(area);
        panel.render(area, &mut buffer);
        buffer
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect::<String>()
    }

    #[test]
    fn marker_row_places_events_by_offset() {
        let row = marker_row(&timeline(), 0.0, 10);
        assert_eq!(row, " x   *    ");
    }

    #[test]
    fn markers_line_up_with_penalised_fill() {
        let mut timeline = TimelineState::begin(1000.0, 1000.0);
        for _ in 0..4 {
            timeline.record_failure("Tank", 1100.0).unwrap();
        }
        timeline.record_milestone("BossA", 1300.0).unwrap();

        // 100s + 4 x 50s penalty is 30% of the bar; the kill at 300s sits at 50%.
        let row = marker_row(&timeline, 50.0, 10);
        assert_eq!(row, "   x *    ");

        let progress = timeline.timer_model(50.0).progress(1300.0, 4).unwrap();
        assert_eq!(filled_cells(progress, 10), 5);
    }

    #[test]
    fn marker_row_is_blank_for_untimed_runs() {
        let mut timeline = TimelineState::begin(1000.0, 0.0);
        timeline.record_failure("Tank", 1100.0).unwrap();
        assert_eq!(marker_row(&timeline, 5.0, 4), "    ");
    }

    #[test]
    fn late_events_clamp_to_last_cell() {
        let mut timeline = TimelineState::begin(1000.0, 100.0);
        timeline.record_failure("Tank", 5000.0).unwrap();
        assert_eq!(marker_row(&timeline, 5.0, 5), "    x");
    }

    #[test]
    fn filled_cells_are_bounded() {
        assert_eq!(filled_cells(0.5, 10), 5);
        assert_eq!(filled_cells(2.0, 10), 10);
        assert_eq!(filled_cells(-1.0, 10), 0);
    }

    #[test]
    fn visibility_rules() {
        let mut display = DisplayState::default();
        assert!(display.is_visible(true));
        assert!(!display.is_visible(false));

        display.toggle(false);
        assert_eq!(display.visibility, Visibility::Shown);
        assert!(display.is_visible(false));

        display.toggle(false);
        assert_eq!(display.visibility, Visibility::Hidden);
        assert!(!display.is_visible(true));
    }

    #[test]
    fn command_line_editing() {
        let mut display = DisplayState::default();
        display.push_char('x');
        assert_eq!(display.input, None);

        display.open_command_line();
        for c in "statuss".chars() {
            display.push_char(c);
        }
        display.backspace();
        assert_eq!(display.submit().as_deref(), Some("status"));
        assert_eq!(display.input, None);
    }

    #[test]
    fn active_panel_shows_run_details() {
        let timeline = timeline();
        let status = active_status(&timeline, 1600.0);
        let display = DisplayState::new(true, true);
        let aggregate = AggregateStatistics::default();

        let rendered = render(
            Panel {
                status: &status,
                timeline: &timeline,
                aggregate: &aggregate,
                display: &display,
            },
            60,
            14,
        );

        assert!(rendered.contains("+15 (variant 1)"));
        assert!(rendered.contains("TIMEABLE"));
        assert!(rendered.contains("deaths 1"));
        assert!(rendered.contains("#1 Tank"));
        assert!(rendered.contains("BossA"));
    }

    #[test]
    fn idle_panel_is_hidden_unless_forced() {
        let timeline = TimelineState::default();
        let status = idle_status();
        let aggregate = AggregateStatistics {
            total_runs: 3,
            ..AggregateStatistics::default()
        };

        let mut display = DisplayState::new(true, true);
        let hidden = render(
            Panel {
                status: &status,
                timeline: &timeline,
                aggregate: &aggregate,
                display: &display,
            },
            60,
            8,
        );
        assert!(hidden.contains("hidden"));

        display.visibility = Visibility::Shown;
        let shown = render(
            Panel {
                status: &status,
                timeline: &timeline,
                aggregate: &aggregate,
                display: &display,
            },
            60,
            8,
        );
        assert!(shown.contains("Not tracking"));
        assert!(shown.contains("runs 3"));
    }

    #[test]
    fn tiny_areas_do_not_panic() {
        let timeline = timeline();
        let status = active_status(&timeline, 1600.0);
        let display = DisplayState::new(true, true);
        let aggregate = AggregateStatistics::default();
        for (w, h) in [(1, 1), (5, 3), (10, 20), (200, 2)] {
            render(
                Panel {
                    status: &status,
                    timeline: &timeline,
                    aggregate: &aggregate,
                    display: &display,
                },
                w,
                h,
            );
        }
    }

    #[test]
    fn reply_is_shown_on_command_line() {
        let timeline = TimelineState::default();
        let status = idle_status();
        let aggregate = AggregateStatistics::default();
        let display = DisplayState {
            last_reply: Some("nothing to reset\nmore".into()),
            ..DisplayState::default()
        };
        let rendered = render(
            Panel {
                status: &status,
                timeline: &timeline,
                aggregate: &aggregate,
                display: &display,
            },
            40,
            8,
        );
        assert!(rendered.contains("nothing to reset"));
        assert!(!rendered.contains("more"));
    }
}
