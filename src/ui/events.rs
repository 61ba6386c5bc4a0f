use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum AppEvent {
    // UI events
    Quit,
    Tick,
    Render,

    // Playback events
    TogglePlayPause,
    StopPlayback,
    SeekForward,
    SeekBackward,

    // Navigation events
    Up,
    Down,
    Enter,

    // Volume events
    VolumeUp,
    VolumeDown,

    // Search events
    SearchStarted,
    SearchInput(char),
    SearchBackspace,
    SearchExited,

    // Library events
    RefreshLibrary,
}

pub struct EventHandler {
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        Self {
            event_sender,
            event_receiver,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.event_sender.clone()
    }

    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.event_receiver.recv().await
    }

    /// Pump terminal events into the app channel. Spawn this once; it also
    /// emits the periodic Tick that drives end-of-track detection.
    pub async fn forward_terminal_events(sender: mpsc::UnboundedSender<AppEvent>) -> Result<()> {
        // '/' enters search; while searching, printable keys edit the query
        let mut searching = false;

        loop {
            if event::poll(Duration::from_millis(50))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if let Some(app_event) = key_to_app_event(key, &mut searching) {
                            let _ = sender.send(app_event);
                        }
                    }
                    Event::Resize(_, _) => {
                        let _ = sender.send(AppEvent::Render);
                    }
                    _ => {}
                }
            }

            let _ = sender.send(AppEvent::Tick);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn key_to_app_event(key: KeyEvent, searching: &mut bool) -> Option<AppEvent> {
    if *searching {
        return match key.code {
            KeyCode::Esc => {
                *searching = false;
                Some(AppEvent::SearchExited)
            }
            KeyCode::Enter => {
                // commit the search and act on the selection
                *searching = false;
                Some(AppEvent::Enter)
            }
            KeyCode::Backspace => Some(AppEvent::SearchBackspace),
            KeyCode::Up => Some(AppEvent::Up),
            KeyCode::Down => Some(AppEvent::Down),
            KeyCode::Char(c) => Some(AppEvent::SearchInput(c)),
            _ => None,
        };
    }

    match key.code {
        // Quit
        KeyCode::Char('q') | KeyCode::Esc => Some(AppEvent::Quit),

        // Search
        KeyCode::Char('/') => {
            *searching = true;
            Some(AppEvent::SearchStarted)
        }

        // Playback controls
        KeyCode::Char(' ') | KeyCode::Char('p') => Some(AppEvent::TogglePlayPause),
        KeyCode::Char('s') => Some(AppEvent::StopPlayback),
        KeyCode::Right => Some(AppEvent::SeekForward),
        KeyCode::Left => Some(AppEvent::SeekBackward),

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => Some(AppEvent::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(AppEvent::Up),
        KeyCode::Enter => Some(AppEvent::Enter),

        // Volume
        KeyCode::Char('+') | KeyCode::Char('=') => Some(AppEvent::VolumeUp),
        KeyCode::Char('-') => Some(AppEvent::VolumeDown),

        // Library
        KeyCode::Char('r') | KeyCode::F(5) => Some(AppEvent::RefreshLibrary),

        _ => None,
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}
