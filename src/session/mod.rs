// Session controller: routes user intents to the fuzzy index and the
// playback engine and exposes a snapshot view for presentation. It owns no
// invariants of its own beyond "the newest query wins".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::engine::{PlaybackState, PlayerEngine, PlayerEvent};
use crate::catalog::{Catalog, CatalogError, CatalogStore, LoadError, RawEntry, TrackId};
use crate::search::{FuzzyIndex, MatchResult, QueryScratch};

/// Transport intents from the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transport {
    TogglePlayPause,
    Pause,
    Resume,
    Stop,
    Seek(Duration),
}

/// Point-in-time view for rendering. Matches belong to `query` and resolve
/// against `snapshot`, the catalog generation they were ranked on; playback
/// is the engine's authoritative state at snapshot time.
#[derive(Clone)]
pub struct SessionView {
    pub query: String,
    pub matches: Vec<MatchResult>,
    pub snapshot: Arc<Catalog>,
    pub playback: PlaybackState,
    pub volume: f32,
    pub catalog_len: usize,
}

pub struct SessionController {
    catalog: Arc<CatalogStore>,
    index: FuzzyIndex,
    scratch: QueryScratch,
    engine: PlayerEngine,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
    query: String,
    matches: Vec<MatchResult>,
    /// The catalog generation the current matches were ranked on.
    snapshot: Arc<Catalog>,
    /// Most recent selection, replayed by TogglePlayPause from Stopped.
    last_selected: Option<TrackId>,
}

impl SessionController {
    pub fn new(catalog: Arc<CatalogStore>, mut engine: PlayerEngine) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);

        let index = FuzzyIndex::new();
        let mut scratch = QueryScratch::new();
        let snapshot = catalog.snapshot();
        let matches = index.query(&snapshot, &mut scratch, "");

        Self {
            catalog,
            index,
            scratch,
            engine,
            events,
            query: String::new(),
            matches,
            snapshot,
            last_selected: None,
        }
    }

    /// Re-rank the catalog for the new query text. Queries run synchronously
    /// on the control thread, so the results stored here always belong to the
    /// latest query.
    pub fn on_query_changed(&mut self, text: &str) {
        let snapshot = self.catalog.snapshot();
        self.matches = self.index.query(&snapshot, &mut self.scratch, text);
        self.snapshot = snapshot;
        self.query = text.to_string();
        debug!(query = text, matches = self.matches.len(), "query changed");
    }

    /// Resolve a selection and hand it to the engine. A stale id is reported
    /// and otherwise ignored; a load failure lands in the engine's Failed
    /// state which the view surfaces.
    pub fn on_select(&mut self, id: TrackId) -> Result<(), CatalogError> {
        let track = match self.catalog.get(id) {
            Ok(track) => track,
            Err(e) => {
                warn!(track = %id, "selection no longer in catalog");
                return Err(e);
            }
        };

        self.last_selected = Some(id);
        if let Err(e) = self.engine.load(&track) {
            warn!(track = %id, error = %e, "load failed");
        }
        Ok(())
    }

    pub fn on_transport(&mut self, command: Transport) {
        match command {
            Transport::TogglePlayPause => match self.engine.state() {
                PlaybackState::Playing { .. } => self.engine.pause(),
                PlaybackState::Paused { .. } => self.engine.resume(),
                PlaybackState::Idle | PlaybackState::Stopped | PlaybackState::Failed { .. } => {
                    if let Some(id) = self.last_selected {
                        let _ = self.on_select(id);
                    }
                }
                PlaybackState::Loading(_) => {}
            },
            Transport::Pause => self.engine.pause(),
            Transport::Resume => self.engine.resume(),
            Transport::Stop => self.engine.stop(),
            Transport::Seek(position) => {
                if let Err(e) = self.engine.seek(position) {
                    warn!(error = %e, "seek failed");
                }
            }
        }
    }

    pub fn adjust_volume(&mut self, delta: f32) {
        let volume = self.engine.volume() + delta;
        self.engine.set_volume(volume);
    }

    /// Drive background observation: completes end-of-track transitions,
    /// drains engine events, and auto-advances through the presented match
    /// list when a track finishes. Returns the drained events so the caller
    /// can surface them.
    pub fn tick(&mut self) -> Vec<PlayerEvent> {
        self.engine.tick();

        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }

        for event in &drained {
            if let PlayerEvent::TrackFinished(id) = event {
                self.auto_advance(*id);
            }
        }

        drained
    }

    /// Swap in a freshly scanned catalog. The current query is re-run against
    /// the new generation; results for the old one are discarded.
    pub fn reload(&mut self, entries: Vec<RawEntry>) -> Vec<LoadError> {
        let errors = self.catalog.reload(entries);
        self.last_selected = None;
        let query = self.query.clone();
        self.on_query_changed(&query);
        errors
    }

    pub fn current_view(&self) -> SessionView {
        SessionView {
            query: self.query.clone(),
            matches: self.matches.clone(),
            snapshot: self.snapshot.clone(),
            playback: self.engine.state(),
            volume: self.engine.volume(),
            catalog_len: self.catalog.len(),
        }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    fn auto_advance(&mut self, finished: TrackId) {
        let next = self
            .matches
            .iter()
            .position(|m| m.track_id == finished)
            .and_then(|pos| self.matches.get(pos + 1))
            .map(|m| m.track_id);

        if let Some(id) = next {
            debug!(from = %finished, to = %id, "auto-advancing");
            let _ = self.on_select(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::NullOutput;
    use crate::audio::AudioConfig;
    use crate::test_util::write_sine_wav;
    use std::path::Path;

    fn test_engine() -> PlayerEngine {
        let config = AudioConfig {
            volume: 0.5,
            sample_rate: 8000,
            channels: 1,
            frames_per_block: 256,
            decode_ahead_blocks: 4,
        };
        PlayerEngine::with_output(config, Box::new(NullOutput::new()))
    }

    fn wav_entry(dir: &Path, name: &str, title: &str, len: Duration) -> RawEntry {
        let path = dir.join(name);
        write_sine_wav(&path, len);
        RawEntry::new(path).with_title(title)
    }

    fn session_with(entries: Vec<RawEntry>) -> SessionController {
        let (store, errors) = CatalogStore::load(entries);
        assert!(errors.is_empty());
        SessionController::new(Arc::new(store), test_engine())
    }

    fn wait_for(session: &mut SessionController, deadline: Duration, f: impl Fn(&SessionView) -> bool) {
        let start = std::time::Instant::now();
        loop {
            session.tick();
            let view = session.current_view();
            if f(&view) {
                return;
            }
            assert!(
                start.elapsed() < deadline,
                "timed out; playback = {:?}",
                view.playback
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn end_to_end_search_select_play_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(vec![
            wav_entry(dir.path(), "a.wav", "Blue", Duration::from_secs(30)),
            wav_entry(dir.path(), "b.wav", "Glue", Duration::from_secs(30)),
            wav_entry(dir.path(), "c.wav", "Clue", Duration::from_secs(30)),
        ]);

        // empty query presents the whole catalog
        assert_eq!(session.current_view().matches.len(), 3);

        session.on_query_changed("lue");
        let view = session.current_view();
        assert_eq!(view.matches.len(), 3);
        let titles: Vec<String> = view
            .matches
            .iter()
            .map(|m| session.catalog().get(m.track_id).unwrap().title)
            .collect();
        assert_eq!(titles, vec!["Blue", "Glue", "Clue"]);

        // select the second match ("Glue" / b.wav)
        let glue = view.matches[1].track_id;
        session.on_select(glue).unwrap();
        match session.current_view().playback {
            PlaybackState::Playing { track, .. } => assert_eq!(track, glue),
            other => panic!("expected Playing, got {other:?}"),
        }

        session.on_transport(Transport::Stop);
        assert_eq!(session.current_view().playback, PlaybackState::Stopped);
    }

    #[test]
    fn selecting_an_unreadable_entry_surfaces_failed_state() {
        let dir = tempfile::tempdir().unwrap();
        // readable at load time, unreadable as audio
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"not a wav at all").unwrap();

        let mut session = session_with(vec![RawEntry::new(path).with_title("Broken")]);
        let id = session.current_view().matches[0].track_id;
        session.on_select(id).unwrap();

        match session.current_view().playback {
            PlaybackState::Failed { track, .. } => assert_eq!(track, id),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn stale_selection_is_not_found_and_playback_unaffected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(vec![wav_entry(
            dir.path(),
            "a.wav",
            "Blue",
            Duration::from_secs(5),
        )]);

        let old_id = session.current_view().matches[0].track_id;
        session.reload(vec![wav_entry(
            dir.path(),
            "b.wav",
            "Red",
            Duration::from_secs(5),
        )]);

        assert!(matches!(
            session.on_select(old_id),
            Err(CatalogError::NotFound(_))
        ));
        assert_eq!(session.current_view().playback, PlaybackState::Idle);
    }

    #[test]
    fn reload_rewrites_the_match_list_for_the_current_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(vec![wav_entry(
            dir.path(),
            "a.wav",
            "Blue",
            Duration::from_secs(5),
        )]);

        session.on_query_changed("blue");
        let before: Vec<TrackId> = session
            .current_view()
            .matches
            .iter()
            .map(|m| m.track_id)
            .collect();
        assert_eq!(before.len(), 1);

        session.reload(vec![wav_entry(
            dir.path(),
            "c.wav",
            "Blueprint",
            Duration::from_secs(5),
        )]);

        let after = session.current_view();
        assert_eq!(after.query, "blue");
        assert_eq!(after.matches.len(), 1);
        assert!(!before.contains(&after.matches[0].track_id));
    }

    #[test]
    fn toggle_replays_last_selection_from_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(vec![wav_entry(
            dir.path(),
            "a.wav",
            "Blue",
            Duration::from_secs(30),
        )]);

        let id = session.current_view().matches[0].track_id;
        session.on_select(id).unwrap();
        session.on_transport(Transport::Stop);
        assert_eq!(session.current_view().playback, PlaybackState::Stopped);

        session.on_transport(Transport::TogglePlayPause);
        assert!(matches!(
            session.current_view().playback,
            PlaybackState::Playing { .. }
        ));
    }

    #[test]
    fn finished_track_auto_advances_to_the_next_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(vec![
            wav_entry(dir.path(), "a.wav", "Blue", Duration::from_millis(100)),
            wav_entry(dir.path(), "b.wav", "Glue", Duration::from_secs(30)),
        ]);

        let view = session.current_view();
        let first = view.matches[0].track_id;
        let second = view.matches[1].track_id;

        session.on_select(first).unwrap();
        wait_for(&mut session, Duration::from_secs(2), |view| {
            matches!(view.playback, PlaybackState::Playing { track, .. } if track == second)
        });
    }

    #[test]
    fn volume_adjustment_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(vec![wav_entry(
            dir.path(),
            "a.wav",
            "Blue",
            Duration::from_secs(5),
        )]);

        session.adjust_volume(2.0);
        assert_eq!(session.current_view().volume, 1.0);
        session.adjust_volume(-3.0);
        assert_eq!(session.current_view().volume, 0.0);
    }
}
