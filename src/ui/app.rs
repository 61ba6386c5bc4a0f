use super::{AppEvent, EventHandler, TerminalManager};
use crate::audio::PlaybackState;
use crate::catalog::{cache, MusicScanner, Track};
use crate::search::{MatchField, MatchResult};
use crate::session::{SessionController, SessionView, Transport};
use anyhow::Result;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const SEEK_STEP: Duration = Duration::from_secs(5);
const VOLUME_STEP: f32 = 0.1;

pub struct App {
    session: SessionController,
    terminal: TerminalManager,
    event_handler: EventHandler,
    library_roots: Vec<PathBuf>,

    // UI state
    list_state: ListState,
    query: String,
    searching: bool,
    should_quit: bool,
}

impl App {
    pub fn new(session: SessionController, library_roots: Vec<PathBuf>) -> Result<Self> {
        let terminal = TerminalManager::new()?;
        let event_handler = EventHandler::new();

        let mut list_state = ListState::default();
        if !session.current_view().matches.is_empty() {
            list_state.select(Some(0));
        }

        Ok(Self {
            session,
            terminal,
            event_handler,
            library_roots,
            list_state,
            query: String::new(),
            searching: false,
            should_quit: false,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let sender = self.event_handler.sender();
        tokio::spawn(async move {
            let _ = EventHandler::forward_terminal_events(sender).await;
        });

        while !self.should_quit {
            let view = self.session.current_view();
            let searching = self.searching;
            let mut list_state = self.list_state.clone();

            self.terminal.draw(|frame| {
                render_ui(frame, &view, searching, &mut list_state);
            })?;

            self.list_state = list_state;

            if let Some(event) = self.event_handler.next_event().await {
                self.handle_event(event);
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Quit => self.should_quit = true,
            AppEvent::Tick => {
                // drives end-of-track detection and auto-advance
                let _ = self.session.tick();
            }
            AppEvent::Render => {}

            AppEvent::Up => self.move_selection(-1),
            AppEvent::Down => self.move_selection(1),
            AppEvent::Enter => self.select_current(),

            AppEvent::TogglePlayPause => self.session.on_transport(Transport::TogglePlayPause),
            AppEvent::StopPlayback => self.session.on_transport(Transport::Stop),
            AppEvent::SeekForward => self.seek_relative(SEEK_STEP, true),
            AppEvent::SeekBackward => self.seek_relative(SEEK_STEP, false),

            AppEvent::VolumeUp => self.session.adjust_volume(VOLUME_STEP),
            AppEvent::VolumeDown => self.session.adjust_volume(-VOLUME_STEP),

            AppEvent::SearchStarted => self.searching = true,
            AppEvent::SearchExited => self.searching = false,
            AppEvent::SearchInput(c) => {
                self.query.push(c);
                let query = self.query.clone();
                self.session.on_query_changed(&query);
                self.reset_selection();
            }
            AppEvent::SearchBackspace => {
                self.query.pop();
                let query = self.query.clone();
                self.session.on_query_changed(&query);
                self.reset_selection();
            }

            AppEvent::RefreshLibrary => self.refresh_library(),
        }
    }

    fn move_selection(&mut self, delta: i32) {
        let count = self.session.current_view().matches.len();
        if count == 0 {
            self.list_state.select(None);
            return;
        }

        let current = self.list_state.selected().unwrap_or(0);
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs() as usize)
        } else {
            (current + delta as usize).min(count - 1)
        };
        self.list_state.select(Some(next));
    }

    fn reset_selection(&mut self) {
        if self.session.current_view().matches.is_empty() {
            self.list_state.select(None);
        } else {
            self.list_state.select(Some(0));
        }
    }

    fn select_current(&mut self) {
        let view = self.session.current_view();
        if let Some(m) = self
            .list_state
            .selected()
            .and_then(|index| view.matches.get(index))
        {
            let _ = self.session.on_select(m.track_id);
        }
    }

    fn seek_relative(&mut self, step: Duration, forward: bool) {
        let position = match self.session.current_view().playback {
            PlaybackState::Playing { position, .. } | PlaybackState::Paused { position, .. } => {
                position
            }
            _ => return,
        };

        let target = if forward {
            position + step
        } else {
            position.saturating_sub(step)
        };
        self.session.on_transport(Transport::Seek(target));
    }

    fn refresh_library(&mut self) {
        let scanner = MusicScanner::new();
        match scanner.scan_directories(&self.library_roots) {
            Ok(entries) => {
                if let Some(path) = cache::cache_file() {
                    if let Err(e) = cache::write_cache(&path, &entries) {
                        warn!(error = %e, "failed to write library cache");
                    }
                }
                for error in self.session.reload(entries) {
                    warn!(%error, "catalog entry skipped");
                }
                self.reset_selection();
            }
            Err(e) => warn!(error = %e, "library rescan failed"),
        }
    }
}

fn render_ui(frame: &mut Frame, view: &SessionView, searching: bool, list_state: &mut ListState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Search
            Constraint::Min(0),    // Match list
            Constraint::Length(3), // Player controls
        ])
        .split(frame.area());

    render_search(frame, chunks[0], view, searching);
    render_matches(frame, chunks[1], view, list_state);
    render_player_controls(frame, chunks[2], view);
}

fn render_search(frame: &mut Frame, area: Rect, view: &SessionView, searching: bool) {
    let text = if view.query.is_empty() && !searching {
        Line::from(Span::styled(
            "press / to search",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut spans = vec![Span::raw(view.query.clone())];
        if searching {
            spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
        }
        Line::from(spans)
    };

    let border_style = if searching {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let widget = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(format!("Search ({}/{})", view.matches.len(), view.catalog_len)),
    );
    frame.render_widget(widget, area);
}

fn render_matches(frame: &mut Frame, area: Rect, view: &SessionView, list_state: &mut ListState) {
    let current = match view.playback {
        PlaybackState::Playing { track, .. }
        | PlaybackState::Paused { track, .. }
        | PlaybackState::Loading(track) => Some(track),
        _ => None,
    };

    let items: Vec<ListItem> = view
        .matches
        .iter()
        .filter_map(|m| {
            let track = view.snapshot.get(m.track_id).ok()?;
            Some(match_to_item(m, track, current == Some(m.track_id)))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Library"))
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol("► ");

    frame.render_stateful_widget(list, area, list_state);
}

fn match_to_item(m: &MatchResult, track: &Track, is_current: bool) -> ListItem<'static> {
    let mut spans: Vec<Span<'static>> = vec![Span::raw(if is_current { "♪ " } else { "  " })];

    // highlight matched characters when they point into the title we show
    if m.field == MatchField::Title && !m.matched_positions.is_empty() {
        let highlight = Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD);
        for (index, c) in track.title.chars().enumerate() {
            if m.matched_positions.contains(&index) {
                spans.push(Span::styled(c.to_string(), highlight));
            } else {
                spans.push(Span::raw(c.to_string()));
            }
        }
    } else {
        spans.push(Span::raw(track.title.clone()));
    }

    spans.push(Span::styled(
        format!("  {}", track.display_artist()),
        Style::default().fg(Color::DarkGray),
    ));
    spans.push(Span::styled(
        format!("  {}", track.display_duration()),
        Style::default().fg(Color::DarkGray),
    ));

    let style = if is_current {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    ListItem::new(Line::from(spans)).style(style)
}

fn render_player_controls(frame: &mut Frame, area: Rect, view: &SessionView) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(60), // Track info
            Constraint::Percentage(20), // Volume
            Constraint::Percentage(20), // Status
        ])
        .split(area);

    let (info, status) = describe_playback(view);

    let info_widget = Paragraph::new(info)
        .block(Block::default().borders(Borders::ALL).title("Now Playing"));
    frame.render_widget(info_widget, chunks[0]);

    let volume_widget = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Volume"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(view.volume.clamp(0.0, 1.0) as f64);
    frame.render_widget(volume_widget, chunks[1]);

    let status_widget =
        Paragraph::new(status).block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status_widget, chunks[2]);
}

fn describe_playback(view: &SessionView) -> (Line<'static>, Line<'static>) {
    let track_label = |id| {
        view.snapshot
            .get(id)
            .map(|t| format!("{} - {}", t.display_artist(), t.title))
            .unwrap_or_else(|_| "unknown track".to_string())
    };

    match &view.playback {
        PlaybackState::Idle => (
            Line::from("No track selected"),
            Line::from("⏹ Idle"),
        ),
        PlaybackState::Loading(id) => (
            Line::from(format!("♪ {}", track_label(*id))),
            Line::from("… Loading"),
        ),
        PlaybackState::Playing { track, position } => (
            Line::from(format!(
                "♪ {}  [{}]",
                track_label(*track),
                format_position(*position)
            )),
            Line::from("▶ Playing"),
        ),
        PlaybackState::Paused { track, position } => (
            Line::from(format!(
                "♪ {}  [{}]",
                track_label(*track),
                format_position(*position)
            )),
            Line::from("⏸ Paused"),
        ),
        PlaybackState::Stopped => (Line::from("No track selected"), Line::from("⏹ Stopped")),
        PlaybackState::Failed { track, error } => (
            Line::from(Span::styled(
                format!("{}: {}", track_label(*track), error),
                Style::default().fg(Color::Red),
            )),
            Line::from(Span::styled("✖ Failed", Style::default().fg(Color::Red))),
        ),
    }
}

fn format_position(position: Duration) -> String {
    let secs = position.as_secs();
    format!("{}:{:0>2}", secs / 60, secs % 60)
}
