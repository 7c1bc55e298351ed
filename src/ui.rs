//! Terminal User Interface module using Ratatui.
//!
//! Shows the scalar metrics of an analysis together with two line charts:
//! cumulative bytes over relative time, and inter-arrival time by packet
//! index.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph},
    Frame, Terminal,
};

use crate::analyzer::Analysis;
use crate::error::Result;

/// Terminal type alias for convenience.
type Term = Terminal<CrosstermBackend<Stdout>>;

/// Chart view state.
pub struct App {
    analysis: Analysis,
    /// (relative time, cumulative bytes)
    cumulative_points: Vec<(f64, f64)>,
    /// (packet index, inter-arrival seconds)
    inter_arrival_points: Vec<(f64, f64)>,
    flow_offset: usize,
    running: bool,
}

impl App {
    pub fn new(analysis: Analysis) -> Self {
        let report = &analysis.report;
        let cumulative_points = report
            .relative_times
            .iter()
            .zip(&report.cumulative_bytes_series)
            .map(|(&t, &bytes)| (t, bytes as f64))
            .collect();
        // Index i + 1: gap between packet i and packet i + 1
        let inter_arrival_points = report
            .inter_arrival_series
            .iter()
            .enumerate()
            .map(|(i, &gap)| ((i + 1) as f64, gap))
            .collect();

        Self {
            analysis,
            cumulative_points,
            inter_arrival_points,
            flow_offset: 0,
            running: true,
        }
    }

    /// Handles keyboard input.
    pub fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Down | KeyCode::Char('j') => self.scroll_flows(1),
            KeyCode::Up | KeyCode::Char('k') => self.scroll_flows(-1),
            KeyCode::Home => self.flow_offset = 0,
            _ => {}
        }
    }

    fn scroll_flows(&mut self, delta: isize) {
        let max = self.analysis.report.flows.len().saturating_sub(1);
        self.flow_offset = self.flow_offset.saturating_add_signed(delta).min(max);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Initializes the terminal for TUI rendering.
pub fn init_terminal() -> Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(terminal: &mut Term) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Main UI rendering function.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(3),  // Stats
            Constraint::Min(12),    // Charts
            Constraint::Length(6),  // Flows
            Constraint::Length(2),  // Footer
        ])
        .split(frame.area());

    render_header(frame, chunks[0], app);
    render_stats(frame, chunks[1], app);
    render_charts(frame, chunks[2], app);
    render_flows(frame, chunks[3], app);
    render_footer(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let title = vec![
        Span::styled(
            "  PCAP-METRICS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("{} ({})", app.analysis.source, app.analysis.format),
            Style::default().fg(Color::Gray),
        ),
    ];

    let header = Paragraph::new(Line::from(title)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    frame.render_widget(header, area);
}

fn render_stats(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
        ])
        .split(area);

    let report = &app.analysis.report;
    let cells = [
        (" Packets ", report.total_packets.to_string(), Color::White),
        (" Bytes ", format_bytes(report.total_bytes), Color::Green),
        (
            " Duration ",
            format!("{:.3} s", report.duration_seconds),
            Color::Blue,
        ),
        (
            " Throughput ",
            format!("{:.3} kbit/s", report.throughput_kbps()),
            Color::Magenta,
        ),
        (
            " Mean Gap ",
            format!("{:.3} ms", report.mean_inter_arrival_ms()),
            Color::Cyan,
        ),
    ];

    for ((title, value, color), chunk) in cells.into_iter().zip(chunks.iter()) {
        let block = Paragraph::new(value)
            .style(Style::default().fg(color))
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color)),
            );
        frame.render_widget(block, *chunk);
    }
}

fn render_charts(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    render_line_chart(
        frame,
        chunks[0],
        " Cumulative bytes over time ",
        &app.cumulative_points,
        ("Time (s)", "Bytes"),
        Color::Green,
    );
    render_line_chart(
        frame,
        chunks[1],
        " Inter-arrival time by packet index ",
        &app.inter_arrival_points,
        ("Packet index", "Interval (s)"),
        Color::Yellow,
    );
}

fn render_line_chart(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    points: &[(f64, f64)],
    (x_title, y_title): (&str, &str),
    color: Color,
) {
    let ((x_min, x_max), (y_min, y_max)) = series_bounds(points);

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(points);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White)),
        )
        .x_axis(
            Axis::default()
                .title(x_title.to_string())
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format_axis(x_min)),
                    Span::raw(format_axis(x_max)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title(y_title.to_string())
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min, y_max])
                .labels(vec![
                    Span::raw(format_axis(y_min)),
                    Span::raw(format_axis(y_max)),
                ]),
        );

    frame.render_widget(chart, area);
}

fn render_flows(frame: &mut Frame, area: Rect, app: &App) {
    let flows = &app.analysis.report.flows;
    let items: Vec<ListItem> = flows
        .iter()
        .skip(app.flow_offset)
        .map(|flow| ListItem::new(format!("  {}", flow)))
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(format!(" Flows ({}) ", flows.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    frame.render_widget(list, area);
}

fn render_footer(frame: &mut Frame, area: Rect) {
    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" q", Style::default().fg(Color::Yellow)),
        Span::raw(": Quit  "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(": Scroll flows"),
    ]))
    .style(Style::default().fg(Color::Gray))
    .block(Block::default().borders(Borders::TOP));

    frame.render_widget(footer, area);
}

/// Axis bounds covering every point; degenerate ranges are widened so the
/// chart always has a non-zero span.
pub fn series_bounds(points: &[(f64, f64)]) -> ((f64, f64), (f64, f64)) {
    if points.is_empty() {
        return ((0.0, 1.0), (0.0, 1.0));
    }

    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    // Baseline at zero unless values go negative
    y_min = y_min.min(0.0);

    (widen(x_min, x_max), widen(y_min, y_max))
}

fn widen(min: f64, max: f64) -> (f64, f64) {
    if max > min {
        (min, max)
    } else {
        (min, min + 1.0)
    }
}

fn format_axis(value: f64) -> String {
    if value.abs() >= 1000.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.3}", value)
    }
}

/// Format bytes in human-readable form.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Runs the chart view until the user quits.
pub fn run_ui(analysis: Analysis) -> Result<()> {
    let mut terminal = init_terminal()?;
    let mut app = App::new(analysis);

    let result = event_loop(&mut terminal, &mut app);

    restore_terminal(&mut terminal)?;
    result
}

fn event_loop(terminal: &mut Term, app: &mut App) -> Result<()> {
    let tick_rate = Duration::from_millis(100);

    while app.is_running() {
        terminal.draw(|f| render(f, app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DecodeStats;
    use crate::capture::{CaptureFormat, LinkType};
    use crate::decoder::IpRecord;
    use crate::metrics::MetricsEngine;

    fn analysis() -> Analysis {
        let records = vec![
            IpRecord::new(10.0, 100, "10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()),
            IpRecord::new(11.0, 200, "10.0.0.3".parse().unwrap(), "10.0.0.2".parse().unwrap()),
            IpRecord::new(13.0, 300, "10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()),
        ];
        Analysis {
            source: "test.pcap".to_string(),
            format: CaptureFormat::Pcap,
            compressed: false,
            link_types: vec![LinkType::ETHERNET],
            report: MetricsEngine::compute(records),
            stats: DecodeStats::default(),
        }
    }

    #[test]
    fn test_chart_points() {
        let app = App::new(analysis());
        assert_eq!(
            app.cumulative_points,
            vec![(0.0, 100.0), (1.0, 300.0), (3.0, 600.0)]
        );
        assert_eq!(app.inter_arrival_points, vec![(1.0, 1.0), (2.0, 2.0)]);
    }

    #[test]
    fn test_series_bounds() {
        let bounds = series_bounds(&[(0.0, 100.0), (1.0, 300.0), (3.0, 600.0)]);
        assert_eq!(bounds, ((0.0, 3.0), (0.0, 600.0)));

        let negative = series_bounds(&[(1.0, -1.0), (2.0, 0.5)]);
        assert_eq!(negative, ((1.0, 2.0), (-1.0, 0.5)));
    }

    #[test]
    fn test_series_bounds_degenerate() {
        assert_eq!(series_bounds(&[]), ((0.0, 1.0), (0.0, 1.0)));
        // A single point still produces a visible range
        assert_eq!(series_bounds(&[(0.0, 0.0)]), ((0.0, 1.0), (0.0, 1.0)));
    }

    #[test]
    fn test_handle_key() {
        let mut app = App::new(analysis());
        assert!(app.is_running());

        app.handle_key(KeyCode::Down);
        assert_eq!(app.flow_offset, 1);
        app.handle_key(KeyCode::Down);
        assert_eq!(app.flow_offset, 1, "offset clamps to last flow");
        app.handle_key(KeyCode::Up);
        assert_eq!(app.flow_offset, 0);

        app.handle_key(KeyCode::Char('q'));
        assert!(!app.is_running());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
