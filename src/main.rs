// minim - terminal music player
// Scan (or cache-load) the library, wire the engine to the session, run the TUI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use minim::catalog::{cache, CatalogStore, MusicScanner};
use minim::{App, AudioConfig, PlayerEngine, SessionController};

fn init_logging() -> Result<()> {
    // The TUI owns stdout/stderr, so logs go to a rotating file instead
    let log_dir = cache::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "minim.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,minim=debug"));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Keep the non-blocking writer alive for the whole process
    std::mem::forget(guard);

    Ok(())
}

/// Library entries from the metadata cache when present, a fresh scan
/// otherwise. The cache only skips tag reads; catalog load still verifies
/// every path, so stale entries surface as per-entry errors, not stale rows.
fn library_entries(roots: &[PathBuf]) -> Result<Vec<minim::RawEntry>> {
    if let Some(path) = cache::cache_file() {
        if let Ok(entries) = cache::read_cache(&path) {
            if !entries.is_empty() {
                info!(entries = entries.len(), "using library cache");
                return Ok(entries);
            }
        }
    }

    let scanner = MusicScanner::new();
    let entries = scanner.scan_directories(roots)?;
    info!(entries = entries.len(), "library scanned");

    if let Some(path) = cache::cache_file() {
        if let Err(e) = cache::write_cache(&path, &entries) {
            warn!(error = %e, "failed to write library cache");
        }
    }

    Ok(entries)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let library_roots = vec![dirs::audio_dir().unwrap_or_else(|| PathBuf::from("."))];

    let entries = library_entries(&library_roots)?;
    let (store, errors) = CatalogStore::load(entries);
    for error in errors {
        warn!(%error, "catalog entry skipped");
    }

    let engine = PlayerEngine::new(AudioConfig::default())?;
    let session = SessionController::new(Arc::new(store), engine);

    // Fire up the TUI and let it run
    let mut app = App::new(session, library_roots)?;
    app.run().await
}
