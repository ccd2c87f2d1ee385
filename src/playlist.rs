//! The "what to show next" state machine.
//!
//! `Playlist` materializes the query result once per reload and walks it
//! with a cursor, wrapping around at the end. It owns its store handle and
//! is meant to be driven from a single thread; the only state it shares
//! with the synchronizer is the database itself.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::{epoch_seconds, CacheStore};
use crate::config::ModelConfig;
use crate::models::{Pic, PlaylistEntry};
use crate::query::{FilterSet, Predicate, QueryEngine, SortSpec};
use crate::retry::RetryPolicy;

/// Filter slot holding the picture directory (or selected subdirectory).
pub const PATH_FILTER: &str = "path";

const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;

#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    pub picture_dir: PathBuf,
    pub no_files_img: PathBuf,
    pub deleted_pictures: PathBuf,
    pub follow_links: bool,
    pub shuffle: bool,
    pub reshuffle_num: u32,
    pub recent_n: u32,
    pub sort_cols: String,
}

impl From<&ModelConfig> for PlaylistConfig {
    fn from(model: &ModelConfig) -> Self {
        Self {
            picture_dir: model.pic_dir.clone(),
            no_files_img: model.no_files_img.clone(),
            deleted_pictures: model.deleted_pictures.clone(),
            follow_links: model.follow_links,
            shuffle: model.shuffle,
            reshuffle_num: model.reshuffle_num,
            recent_n: model.recent_n,
            sort_cols: model.sort_cols.clone(),
        }
    }
}

/// The picture (or pair) returned by [`Playlist::get_next_file`].
pub type Slide = (Pic, Option<Pic>);

pub struct Playlist {
    config: PlaylistConfig,
    store: CacheStore,
    query: QueryEngine,
    retry: RetryPolicy,
    filters: FilterSet,
    subdirectory: String,
    entries: Vec<PlaylistEntry>,
    cursor: usize,
    run_through: u32,
    reload_requested: bool,
    reloads: usize,
    current: Option<Slide>,
}

impl Playlist {
    pub fn new(config: PlaylistConfig, store: CacheStore, query: QueryEngine) -> Self {
        let mut config = config;
        config.picture_dir = config.picture_dir.components().collect();

        let mut playlist = Self {
            config,
            store,
            query,
            retry: RetryPolicy::default(),
            filters: FilterSet::new(),
            subdirectory: String::new(),
            entries: Vec::new(),
            cursor: 0,
            run_through: 0,
            reload_requested: true,
            reloads: 0,
            current: None,
        };
        playlist.update_path_filter();
        playlist
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the next picture to show, and its portrait partner if any.
    ///
    /// Never fails: with nothing displayable it returns the placeholder
    /// image and leaves a reload requested so the next call looks again.
    pub fn get_next_file(&mut self) -> Slide {
        let mut missing = 0;

        let slide = loop {
            if self.reload_requested {
                self.reload();
                missing = 0;
            }

            if self.entries.is_empty() || missing >= self.entries.len() {
                debug!("Nothing to show, using placeholder");
                self.reload_requested = true;
                break (Pic::placeholder(&self.config.no_files_img), None);
            }

            if self.cursor >= self.entries.len() {
                self.run_through += 1;
                if self.config.shuffle && self.run_through >= self.config.reshuffle_num {
                    self.reload_requested = true;
                }
                self.cursor = 0;
                continue;
            }

            let entry = self.entries[self.cursor];
            let mut first = self.load(entry.first());
            let mut second = entry.second().and_then(|id| self.load(id));
            if first.is_none() {
                first = second.take();
            }
            self.cursor += 1;

            match first {
                Some(pic) => break (pic, second),
                None => missing += 1,
            }
        };

        self.current = Some(slide.clone());
        slide
    }

    /// Fetches one file, treating anything not on disk as absent.
    fn load(&self, file_id: i64) -> Option<Pic> {
        match self.query.fetch_pic(&self.store, file_id) {
            Ok(Some(pic)) if pic.path.is_file() => Some(pic),
            Ok(Some(pic)) => {
                debug!("Skipping vanished file {:?}", pic.path);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read file {} from cache: {}", file_id, e);
                None
            }
        }
    }

    fn reload(&mut self) {
        let sort = self.sort_spec();
        let query = &self.query;
        let store = &self.store;
        let filters = &self.filters;

        let entries = self
            .retry
            .run(query.clock(), |attempt| {
                match query.select(store, filters, &sort) {
                    Ok(entries) if !entries.is_empty() => Some(entries),
                    Ok(_) => {
                        debug!(attempt, "Playlist query returned no files");
                        None
                    }
                    Err(e) => {
                        warn!(attempt, "Playlist query failed: {}", e);
                        None
                    }
                }
            })
            .unwrap_or_default();

        info!("Loaded playlist with {} entries", entries.len());
        self.entries = entries;
        self.cursor = 0;
        self.run_through = 0;
        self.reload_requested = false;
        self.reloads += 1;
    }

    fn sort_spec(&self) -> SortSpec {
        let spec = if self.config.shuffle {
            SortSpec::random()
        } else {
            SortSpec::columns(&self.config.sort_cols)
        };
        let cutoff = (self.config.recent_n > 0).then(|| {
            epoch_seconds(self.query.clock().now())
                - SECONDS_PER_DAY * f64::from(self.config.recent_n)
        });
        spec.with_recent_cutoff(cutoff)
    }

    /// Makes the next `get_next_file` return the entry before the current
    /// one.
    pub fn set_previous_pointer(&mut self) {
        let len = self.entries.len();
        if len == 0 {
            return;
        }
        self.cursor = (self.cursor + 2 * len - 2) % len;
    }

    /// Moves the first picture of the current slide to the deleted pictures
    /// directory and drops it from the cache and the playlist.
    ///
    /// Returns the new location, or `None` if nothing deletable is showing.
    pub fn delete_current(&mut self) -> Result<Option<PathBuf>> {
        let pic = match &self.current {
            Some((pic, _)) if !pic.is_placeholder() => pic.clone(),
            _ => return Ok(None),
        };

        let deleted_dir = &self.config.deleted_pictures;
        fs::create_dir_all(deleted_dir)
            .with_context(|| format!("Failed to create {:?}", deleted_dir))?;
        let file_name = pic
            .path
            .file_name()
            .with_context(|| format!("No file name in {:?}", pic.path))?;
        let target = deleted_dir.join(file_name);
        move_file(&pic.path, &target)?;
        info!("Moved {:?} to {:?}", pic.path, target);

        self.store
            .delete_files(&[pic.file_id])
            .context("Failed to remove deleted file from cache")?;

        if let Some(index) = self.entries.iter().position(|e| e.contains(pic.file_id)) {
            match self.entries[index].without(pic.file_id) {
                Some(rest) => self.entries[index] = rest,
                None => {
                    self.entries.remove(index);
                    if index < self.cursor {
                        self.cursor -= 1;
                    }
                }
            }
        }
        self.current = None;
        Ok(Some(target))
    }

    /// Replaces or clears a named filter. A change triggers a reload.
    pub fn set_filter(&mut self, name: &str, predicate: Option<Predicate>) {
        if self.filters.set(name, predicate) {
            debug!(name, "Filter changed");
            self.reload_requested = true;
        }
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn shuffle(&self) -> bool {
        self.config.shuffle
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.config.shuffle = shuffle;
        self.reload_requested = true;
    }

    pub fn force_reload(&mut self) {
        self.reload_requested = true;
    }

    pub fn subdirectory(&self) -> &str {
        &self.subdirectory
    }

    fn root_name(&self) -> String {
        self.config
            .picture_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Restricts the playlist to a directory directly below the picture
    /// directory. Passing the picture directory's own name selects
    /// everything again.
    pub fn set_subdirectory(&mut self, dir: &str) {
        let root = self.root_name();
        let actual = if self.subdirectory.is_empty() {
            root.as_str()
        } else {
            self.subdirectory.as_str()
        };
        if actual == dir {
            return;
        }

        self.subdirectory = if dir == root {
            String::new()
        } else {
            dir.to_string()
        };
        info!("Set subdirectory to: {:?}", self.subdirectory);
        self.update_path_filter();
        self.reload_requested = true;
    }

    fn update_path_filter(&mut self) {
        let dir = if self.subdirectory.is_empty() {
            self.config.picture_dir.clone()
        } else {
            self.config.picture_dir.join(&self.subdirectory)
        };
        self.filters.set(PATH_FILTER, Some(Predicate::PathPrefix(dir)));
    }

    /// Returns the selected directory and the choices: the picture
    /// directory's own name first, then its visible subdirectories.
    pub fn get_directory_list(&self) -> Result<(String, Vec<String>)> {
        let root = self.root_name();
        let actual = if self.subdirectory.is_empty() {
            root.clone()
        } else {
            self.subdirectory.clone()
        };

        let entries = fs::read_dir(&self.config.picture_dir)
            .with_context(|| format!("Failed to list {:?}", self.config.picture_dir))?;
        let mut dirs: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let is_link = e.file_type().map(|t| t.is_symlink()).unwrap_or(false);
                (self.config.follow_links || !is_link) && e.path().is_dir()
            })
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        dirs.sort();
        dirs.insert(0, root);
        Ok((actual, dirs))
    }

    /// Number of pictures in the materialized playlist, counting both
    /// halves of a pair.
    pub fn get_file_count(&self) -> usize {
        self.entries.iter().map(PlaylistEntry::len).sum()
    }

    pub fn current(&self) -> Option<&Slide> {
        self.current.as_ref()
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn reload_requested(&self) -> bool {
        self.reload_requested
    }

    /// How many times the playlist has been re-queried.
    pub fn reloads(&self) -> usize {
        self.reloads
    }

    /// Closes the playlist's store handle.
    pub fn close(self) -> Result<()> {
        self.store.close().context("Failed to close playlist store handle")
    }
}

/// Renames `from` to `to`, falling back to copy and delete across
/// filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("Failed to copy {:?} to {:?}", from, to))?;
    fs::remove_file(from).with_context(|| format!("Failed to remove {:?}", from))?;
    Ok(())
}
