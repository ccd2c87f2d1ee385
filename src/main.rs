//! Headless slideshow driver.
//!
//! Runs the synchronizer in the background and logs one pick per slide
//! interval, pausing the synchronizer around each pick the way a renderer
//! would around a transition.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::block_in_place;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use picdeck::geo::{CachedResolver, NoopResolver};
use picdeck::retry::SystemClock;
use picdeck::scanner::{ExifExtractor, MetadataExtractor, SyncConfig};
use picdeck::{CacheStore, Config, Playlist, PlaylistConfig, QueryEngine, SyncWorker, Synchronizer};

#[derive(Debug, Parser)]
#[command(name = "picdeck", about = "Picture cache and playlist for photo frames")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many slides
    #[arg(long, value_name = "N")]
    slides: Option<u64>,

    /// Delete cache rows for files and folders no longer on disk
    #[arg(long)]
    purge: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_yaml(b"{}")?,
    };
    let model = &cfg.model;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&model.log_level))
        .context("invalid log_level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = match &model.db_file {
        Some(path) => path.clone(),
        None => CacheStore::default_db_path()?,
    };
    let store = CacheStore::open(&db_path)
        .with_context(|| format!("Failed to open cache at {:?}", db_path))?;
    info!(stats = ?store.stats()?, "Cache opened");

    let extractor: Arc<dyn MetadataExtractor> = Arc::new(ExifExtractor);
    let playlist_store = store.open_handle()?;

    let sync = Synchronizer::new(store, &model.pic_dir, model.follow_links, extractor.clone());
    let sync_config = SyncConfig {
        cycle_interval: Duration::from_secs_f64(model.update_interval),
        ..Default::default()
    };
    let handle = SyncWorker::spawn(sync, sync_config)?;
    if cli.purge {
        handle.purge_files();
    }

    if model.load_geoloc {
        warn!("No address resolver is available; locations stay empty");
    }
    let query = QueryEngine::new(
        model.portrait_pairs,
        model.load_geoloc,
        extractor,
        Arc::new(CachedResolver::new(NoopResolver)),
        Arc::new(SystemClock),
    );
    let mut playlist = Playlist::new(PlaylistConfig::from(model), playlist_store, query);
    if !model.subdirectory.is_empty() {
        playlist.set_subdirectory(&model.subdirectory);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(model.time_delay));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut shown = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                handle.set_paused(true);
                let (pic, partner) = block_in_place(|| playlist.get_next_file());
                handle.set_paused(false);

                info!(
                    path = ?pic.path,
                    partner = ?partner.as_ref().map(|p| &p.path),
                    location = pic.location.as_deref().unwrap_or(""),
                    files = playlist.get_file_count(),
                    "Next slide"
                );
                shown += 1;
                if cli.slides.is_some_and(|n| shown >= n) {
                    break;
                }
            }
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Shutting down");
    block_in_place(|| handle.stop())?;
    playlist.close()?;
    Ok(())
}
