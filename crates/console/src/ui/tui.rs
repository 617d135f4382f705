//! Terminal User Interface for the HostPanel console.
//!
//! This module provides a ratatui-based live console: server header with a
//! connection indicator, install or startup progress, the scrollable log and
//! the command line.

use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use protocol::ServerStatus;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};

use super::scroll::Scrollback;
use crate::session::install::INSTALL_STEPS;
use crate::session::{classify_style, ConsoleSession, LineStyle, SessionEvent, SessionRunner};

const TRIMMED_NOTICE: &str = "\u{2014} older output trimmed \u{2014}";
const EMPTY_NOTICE: &str = "Waiting for output...";

/// What a key press asks the outer loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    None,
    Submit,
    Export,
    Quit,
}

/// Terminal-independent view state.
#[derive(Debug, Clone)]
pub struct ConsoleView {
    scroll: Scrollback,
    scroll_step: usize,
    expanded: bool,
    notice: Option<String>,
}

impl ConsoleView {
    pub fn new(scroll_step: usize) -> Self {
        Self {
            scroll: Scrollback::new(),
            scroll_step: scroll_step.max(1),
            expanded: false,
            notice: None,
        }
    }

    pub fn scroll(&self) -> &Scrollback {
        &self.scroll
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    /// Catches the scroll position up with the log.
    pub fn sync(&mut self, session: &ConsoleSession) {
        self.scroll.sync(session.log().buffer());
    }

    /// Handles a keyboard event.
    pub fn handle_key(&mut self, key: KeyEvent, session: &mut ConsoleSession) -> KeyOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let can_input = session.can_input();
        let len = session.log().buffer().len();

        match key.code {
            KeyCode::Char('c') | KeyCode::Char('d') if ctrl => return KeyOutcome::Quit,
            KeyCode::Esc => return KeyOutcome::Quit,
            KeyCode::Char('e') if ctrl => self.expanded = !self.expanded,
            KeyCode::Char('s') if ctrl => return KeyOutcome::Export,
            KeyCode::PageUp => self.scroll.scroll_up(self.scroll_step, len),
            KeyCode::PageDown => self.scroll.scroll_down(self.scroll_step),
            KeyCode::End => self.scroll.jump_to_latest(),
            KeyCode::Enter if can_input => return KeyOutcome::Submit,
            KeyCode::Up if can_input => session.input_mut().recall_older(),
            KeyCode::Down if can_input => session.input_mut().recall_newer(),
            KeyCode::Backspace if can_input => session.input_mut().backspace(),
            KeyCode::Char(c) if can_input && !ctrl => session.input_mut().insert_char(c),
            _ => {}
        }
        KeyOutcome::None
    }
}

/// Writes the current log to a timestamped file under `dir`.
pub fn export_log(session: &ConsoleSession, dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = format!(
        "console-{}-{}.log",
        sanitize(session.server_id()),
        Local::now().format("%Y%m%d-%H%M%S")
    );
    let path = dir.join(name);
    let mut text = session.log().buffer().to_text();
    text.push('\n');
    std::fs::write(&path, text)?;
    Ok(path)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Style for a log line.
pub fn line_style(style: LineStyle) -> Style {
    match style {
        LineStyle::Marker => Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
        LineStyle::CommandEcho => Style::default().fg(Color::Cyan),
        LineStyle::Error => Style::default().fg(Color::Red),
        LineStyle::Warning => Style::default().fg(Color::Yellow),
        LineStyle::Ready => Style::default()
            .fg(Color::Green)
            .add_modifier(Modifier::BOLD),
        LineStyle::Info => Style::default().fg(Color::White),
        LineStyle::Muted => Style::default().fg(Color::Gray),
    }
}

fn badge_color(status: Option<ServerStatus>) -> Color {
    match status {
        Some(ServerStatus::Running) => Color::Green,
        Some(ServerStatus::Starting) | Some(ServerStatus::Installing) => Color::Yellow,
        Some(ServerStatus::Stopping) => Color::LightYellow,
        Some(ServerStatus::Error) | Some(ServerStatus::Unknown) => Color::Red,
        Some(ServerStatus::Suspended) => Color::Magenta,
        Some(ServerStatus::Stopped) | None => Color::Gray,
    }
}

/// The interactive console screen.
pub struct ConsoleTui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    view: ConsoleView,
    export_dir: PathBuf,
}

impl ConsoleTui {
    /// Sets up the terminal.
    pub fn new(scroll_step: usize, export_dir: PathBuf) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            view: ConsoleView::new(scroll_step),
            export_dir,
        })
    }

    /// Draws the TUI.
    pub fn draw(&mut self, session: &ConsoleSession) -> io::Result<()> {
        let view = &self.view;
        self.terminal.draw(|frame| Self::render_frame(frame, session, view))?;
        Ok(())
    }

    /// Renders the entire frame.
    fn render_frame(frame: &mut Frame, session: &ConsoleSession, view: &ConsoleView) {
        let progress_height = if view.is_expanded() {
            0
        } else if session.is_installing() {
            INSTALL_STEPS.len() as u16 + 3
        } else if session.status() == Some(ServerStatus::Starting) {
            session.log().startup().steps().len() as u16 + 3
        } else {
            0
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(progress_height),
                Constraint::Min(3),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(frame.area());

        Self::render_header(frame, chunks[0], session);
        if progress_height > 0 {
            if session.is_installing() {
                Self::render_install(frame, chunks[1], session);
            } else {
                Self::render_startup(frame, chunks[1], session);
            }
        }
        Self::render_log(frame, chunks[2], session, view);
        Self::render_input(frame, chunks[3], session);
        Self::render_status_bar(frame, chunks[4], view);
    }

    fn render_header(frame: &mut Frame, area: Rect, session: &ConsoleSession) {
        let name = session
            .record()
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(session.server_id());
        let status = session.status();
        let badge = status.map(|s| s.label()).unwrap_or("Loading");
        let indicator_color = if session.indicator().starts_with("\u{25cf} live") {
            Color::Green
        } else if session.indicator().starts_with('\u{25cb}') {
            Color::DarkGray
        } else {
            Color::Yellow
        };

        let mut spans = vec![
            Span::styled(format!(" {} ", name), Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(format!("[{}]", badge), Style::default().fg(badge_color(status))),
            Span::raw("  "),
            Span::styled(session.indicator(), Style::default().fg(indicator_color)),
        ];
        if let Some(version) = session.record().and_then(|r| r.mc_version.as_deref()) {
            spans.push(Span::styled(
                format!("  {}", version),
                Style::default().fg(Color::DarkGray),
            ));
        }
        if let Some(metrics) = session.metrics() {
            spans.push(Span::styled(
                format!(
                    "  CPU {:.0}% | RAM {}% | Players {}",
                    metrics.cpu_percent,
                    metrics.ram_percent(),
                    metrics.players_online
                ),
                Style::default().fg(Color::Cyan),
            ));
        }

        let header = Paragraph::new(Line::from(spans))
            .block(Block::default().borders(Borders::ALL).title(" HostPanel Console "));
        frame.render_widget(header, area);
    }

    fn render_install(frame: &mut Frame, area: Rect, session: &ConsoleSession) {
        let progress = session.install();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(area.inner(ratatui::layout::Margin::new(1, 1)));

        let block = Block::default().borders(Borders::ALL).title(" Installing ");
        frame.render_widget(block, area);

        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Yellow))
            .ratio(progress.bar_fraction().clamp(0.0, 1.0))
            .label(format!(
                "{}  {}",
                progress.step().label,
                progress.elapsed_display()
            ));
        frame.render_widget(gauge, chunks[0]);

        let items: Vec<ListItem> = INSTALL_STEPS
            .iter()
            .enumerate()
            .map(|(i, step)| {
                if progress.is_done(i) {
                    ListItem::new(Line::from(vec![
                        Span::styled(" \u{2713} ", Style::default().fg(Color::Green)),
                        Span::styled(step.label, Style::default().fg(Color::Gray)),
                    ]))
                } else if progress.is_active(i) {
                    ListItem::new(Line::from(vec![
                        Span::styled(" \u{203a} ", Style::default().fg(Color::Yellow)),
                        Span::styled(step.label, Style::default().add_modifier(Modifier::BOLD)),
                        Span::styled(format!("  {}", step.hint), Style::default().fg(Color::DarkGray)),
                    ]))
                } else {
                    ListItem::new(Line::from(vec![
                        Span::raw("   "),
                        Span::styled(step.label, Style::default().fg(Color::DarkGray)),
                    ]))
                }
            })
            .collect();
        frame.render_widget(List::new(items), chunks[1]);
    }

    fn render_startup(frame: &mut Frame, area: Rect, session: &ConsoleSession) {
        let startup = session.log().startup();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(area.inner(ratatui::layout::Margin::new(1, 1)));

        let block = Block::default().borders(Borders::ALL).title(" Starting ");
        frame.render_widget(block, area);

        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Green))
            .percent(u16::from(startup.percent()))
            .label(format!("{}  {}%", startup.active_label(), startup.percent()));
        frame.render_widget(gauge, chunks[0]);

        let active = startup.active_index();
        let items: Vec<ListItem> = startup
            .steps()
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let (mark, style) = if step.done {
                    (" \u{2713} ", Style::default().fg(Color::Green))
                } else if Some(i) == active {
                    (" \u{203a} ", Style::default().fg(Color::Yellow))
                } else {
                    ("   ", Style::default().fg(Color::DarkGray))
                };
                let mut spans = vec![Span::styled(mark, style), Span::raw(step.label)];
                if let Some(detail) = &step.detail {
                    spans.push(Span::styled(
                        format!("  {}", detail),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();
        frame.render_widget(List::new(items), chunks[1]);
    }

    fn render_log(frame: &mut Frame, area: Rect, session: &ConsoleSession, view: &ConsoleView) {
        let buffer = session.log().buffer();
        let height = area.height.saturating_sub(2) as usize;

        let mut lines: Vec<Line> = Vec::with_capacity(height);
        if buffer.is_empty() {
            lines.push(Line::from(Span::styled(
                EMPTY_NOTICE,
                Style::default().fg(Color::DarkGray),
            )));
        } else {
            let window = view.scroll().window(buffer.len(), height);
            let show_trimmed = buffer.is_full() && window.start == 0;
            let skip = if show_trimmed { window.start + 1 } else { window.start };
            if show_trimmed {
                lines.push(Line::from(Span::styled(
                    TRIMMED_NOTICE,
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::ITALIC),
                )));
            }
            for line in buffer.iter().skip(skip).take(window.end - skip) {
                lines.push(Line::from(Span::styled(
                    line.to_string(),
                    line_style(classify_style(line)),
                )));
            }
        }

        let title = if view.scroll().is_pinned() {
            " Console ".to_string()
        } else {
            format!(" Console (scrolled, {} newer, End to follow) ", view.scroll().offset())
        };
        let paragraph = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(paragraph, area);
    }

    fn render_input(frame: &mut Frame, area: Rect, session: &ConsoleSession) {
        let input = session.input();
        let line = if session.can_input() && !input.text().is_empty() {
            Line::from(vec![
                Span::styled("> ", Style::default().fg(Color::Cyan)),
                Span::raw(input.text()),
            ])
        } else {
            let style = if session.can_input() {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::DIM)
            };
            Line::from(vec![
                Span::styled("> ", style),
                Span::styled(session.placeholder(), style),
            ])
        };
        let paragraph = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(paragraph, area);
        if session.can_input() {
            let x = area.x + 3 + input.text().chars().count() as u16;
            frame.set_cursor_position((x.min(area.right().saturating_sub(2)), area.y + 1));
        }
    }

    fn render_status_bar(frame: &mut Frame, area: Rect, view: &ConsoleView) {
        let text = match view.notice() {
            Some(notice) => Line::from(Span::styled(
                format!(" {}", notice),
                Style::default().fg(Color::Cyan),
            )),
            None => Line::from(Span::styled(
                " Enter send | Up/Down history | PgUp/PgDn scroll | End follow | Ctrl+E expand | Ctrl+S export | Esc quit",
                Style::default().fg(Color::DarkGray),
            )),
        };
        frame.render_widget(Paragraph::new(text), area);
    }

    /// Runs the main event loop until the operator quits or the session ends.
    pub async fn run(&mut self, runner: &mut SessionRunner) -> io::Result<()> {
        let tick_rate = Duration::from_millis(100);

        loop {
            runner.drain();
            if runner.is_finished() {
                tracing::info!("Console session ended");
                break;
            }
            self.view.sync(runner.session());
            self.draw(runner.session())?;

            if event::poll(tick_rate)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match self.view.handle_key(key, runner.session_mut()) {
                        KeyOutcome::Submit => runner.dispatch(SessionEvent::Submit),
                        KeyOutcome::Export => match export_log(runner.session(), &self.export_dir) {
                            Ok(path) => self.view.set_notice(format!("Saved log to {}", path.display())),
                            Err(e) => {
                                tracing::warn!("Log export failed: {}", e);
                                self.view.set_notice(format!("Export failed: {}", e));
                            }
                        },
                        KeyOutcome::Quit => break,
                        KeyOutcome::None => {}
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        Ok(())
    }

    /// Restores the terminal to its original state.
    pub fn restore(&mut self) -> io::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for ConsoleTui {
    fn drop(&mut self) {
        // Best effort cleanup
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
