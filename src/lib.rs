// minim - terminal music player
// Fuzzy-search the library on one thread, stream decoded audio on another

#![forbid(unsafe_code)]

pub mod audio;     // decode pipeline, playback engine, output device
pub mod catalog;   // tracks, scanning, metadata cache
pub mod search;    // incremental fuzzy matching
pub mod session;   // intent routing + presented state
pub mod ui;        // terminal interface

#[cfg(test)]
pub(crate) mod test_util;

// Export the stuff the binary and integration points actually use
pub use audio::{AudioConfig, PlaybackState, PlayerEngine, PlayerEvent};
pub use catalog::{Catalog, CatalogStore, MusicScanner, RawEntry, Track, TrackId};
pub use search::{FuzzyIndex, MatchResult, QueryScratch};
pub use session::{SessionController, SessionView, Transport};
pub use ui::App;
