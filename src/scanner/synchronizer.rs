//! Incremental reconciliation of the cache with the picture directory.
//!
//! This module provides the `Synchronizer` struct which handles:
//! - Finding folders whose mtime moved past the stored value (walkdir)
//! - Finding files in those folders with no up-to-date row
//! - Extracting and persisting metadata once per file version
//! - Stamping folder timestamps once their files are drained
//! - Flagging or deleting rows whose paths left the disk
//!
//! Discovery and extraction are split: the files found by one discovery pass
//! are kept in a queue that survives across cycles, so a paused cycle resumes
//! where it stopped instead of walking the tree again.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, trace, warn};
use walkdir::{DirEntry, WalkDir};

use super::metadata::MetadataExtractor;
use crate::cache::{modified_seconds, CacheStore, FileRecord};
use crate::models::is_image_extension;

/// Directories some NAS and desktop systems litter picture folders with.
const JUNK_DIRS: &[&str] = &["@eaDir", "#recycle", ".AppleDouble"];

/// How the purge pass treats rows whose paths no longer exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PurgeMode {
    /// Flag missing folders, keeping their metadata for when the media
    /// comes back. File rows are left alone.
    #[default]
    Soft,
    /// Delete missing folders (cascading to their files) and missing files.
    Hard,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Folders found modified by this cycle's discovery pass.
    pub folders_scanned: usize,
    pub files_updated: usize,
    pub extraction_failures: usize,
    pub folders_finalized: usize,
    pub folders_flagged: usize,
    pub folders_deleted: usize,
    pub files_deleted: usize,
    /// Set when the purge pass ran, i.e. the cycle was not paused and the
    /// file queue was drained.
    pub purged: Option<PurgeMode>,
}

impl CycleReport {
    /// Number of rows written to the store.
    pub fn writes(&self) -> usize {
        self.files_updated
            + self.folders_finalized
            + self.folders_flagged
            + self.folders_deleted
            + self.files_deleted
    }
}

/// Keeps one `CacheStore` handle in step with a picture directory.
pub struct Synchronizer {
    store: CacheStore,
    picture_dir: PathBuf,
    follow_links: bool,
    extractor: Arc<dyn MetadataExtractor>,
    /// Folders found by the last discovery pass, with their on-disk mtime.
    pending_folders: Vec<(String, f64)>,
    /// Files still waiting for extraction.
    pending_files: VecDeque<PathBuf>,
    /// Folders holding a file whose extraction failed in this pass.
    failed_folders: HashSet<String>,
}

impl Synchronizer {
    pub fn new(
        store: CacheStore,
        picture_dir: &Path,
        follow_links: bool,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Self {
        // Normalizes trailing separators so folder names match file parents.
        let picture_dir: PathBuf = picture_dir.components().collect();
        Self {
            store,
            picture_dir,
            follow_links,
            extractor,
            pending_folders: Vec::new(),
            pending_files: VecDeque::new(),
            failed_folders: HashSet::new(),
        }
    }

    pub fn picture_dir(&self) -> &Path {
        &self.picture_dir
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// True while files found by an earlier discovery pass are still queued.
    pub fn has_pending_work(&self) -> bool {
        !self.pending_files.is_empty()
    }

    /// Runs one work cycle.
    ///
    /// Does nothing while `paused` is set. If `paused` becomes set while
    /// files are being extracted the cycle stops early and the rest of the
    /// queue is kept for the next one. Folder timestamps and the purge pass
    /// only run once the queue is drained.
    pub fn run_cycle(&mut self, paused: &AtomicBool, purge: PurgeMode) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        if paused.load(Ordering::Relaxed) {
            trace!("Synchronizer paused, skipping cycle");
            return Ok(report);
        }

        if self.pending_files.is_empty() && self.pending_folders.is_empty() {
            let folders = self.modified_folders()?;
            for (folder, _) in &folders {
                let files = self.modified_files(Path::new(folder))?;
                self.pending_files.extend(files);
            }
            report.folders_scanned = folders.len();
            self.pending_folders = folders;
            if report.folders_scanned > 0 {
                debug!(
                    "Found {} modified folders, {} files to extract",
                    report.folders_scanned,
                    self.pending_files.len()
                );
            }
        }

        while let Some(path) = self.pending_files.pop_front() {
            if paused.load(Ordering::Relaxed) {
                self.pending_files.push_front(path);
                debug!(
                    "Synchronizer paused with {} files queued",
                    self.pending_files.len()
                );
                return Ok(report);
            }
            if let Err(e) = self.update_file(&path, &mut report) {
                // Keeps the folder unstamped until the file is stored.
                self.pending_files.push_front(path);
                return Err(e);
            }
        }

        let finalize: Vec<(String, f64)> = std::mem::take(&mut self.pending_folders)
            .into_iter()
            .filter(|(name, _)| !self.failed_folders.contains(name))
            .collect();
        self.failed_folders.clear();
        report.folders_finalized = self.store.finalize_folders(&finalize)?;

        self.purge(purge, &mut report)?;
        report.purged = Some(purge);

        self.store.checkpoint()?;

        if report.writes() > 0 || report.extraction_failures > 0 {
            info!(
                "Sync cycle: {} files updated, {} failed, {} folders stamped, {} flagged, {} folders and {} files purged",
                report.files_updated,
                report.extraction_failures,
                report.folders_finalized,
                report.folders_flagged,
                report.folders_deleted,
                report.files_deleted
            );
        }
        Ok(report)
    }

    /// Walks the picture directory for folders that are unseen, stale or
    /// flagged missing.
    fn modified_folders(&self) -> Result<Vec<(String, f64)>> {
        let walker = WalkDir::new(&self.picture_dir)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

        let mut modified = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to walk picture directory: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let name = entry.path().to_string_lossy().into_owned();
            let on_disk = match modified_seconds(entry.path()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to read mtime of {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let changed = match self.store.folder_state(&name)? {
                None => true,
                Some(state) => state.missing || state.last_modified < on_disk,
            };
            if changed {
                trace!("Folder modified: {}", name);
                modified.push((name, on_disk));
            }
        }
        Ok(modified)
    }

    /// Lists image files in `folder` that have no row at least as new as
    /// their on-disk mtime.
    fn modified_files(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list {:?}: {}", folder, e);
                return Ok(Vec::new());
            }
        };

        let mut files = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(is_image_extension)
                .unwrap_or(false);
            if is_hidden || !is_image || !path.is_file() {
                continue;
            }

            let mtime = match modified_seconds(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to read mtime of {:?}: {}", path, e);
                    continue;
                }
            };
            let Some(record) = FileRecord::from_path(&path, mtime) else {
                continue;
            };
            if !self.store.is_file_current(&record)? {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn update_file(&mut self, path: &Path, report: &mut CycleReport) -> Result<()> {
        let mtime = match modified_seconds(path) {
            Ok(t) => t,
            Err(e) => {
                debug!("File vanished before extraction {:?}: {}", path, e);
                return Ok(());
            }
        };
        let Some(record) = FileRecord::from_path(path, mtime) else {
            return Ok(());
        };

        match self.extractor.extract(path) {
            Ok(meta) => {
                self.store
                    .upsert_file(&record, &meta, None)
                    .with_context(|| format!("Failed to store metadata for {:?}", path))?;
                report.files_updated += 1;
            }
            Err(e) => {
                warn!("Metadata extraction failed for {:?}: {:#}", path, e);
                report.extraction_failures += 1;
                self.failed_folders.insert(record.folder);
            }
        }
        Ok(())
    }

    /// Handles folder and file rows whose paths are gone from disk.
    fn purge(&self, mode: PurgeMode, report: &mut CycleReport) -> Result<()> {
        let missing: Vec<i64> = self
            .store
            .folders()?
            .into_iter()
            .filter(|(_, name)| !Path::new(name).is_dir())
            .map(|(id, _)| id)
            .collect();

        match mode {
            PurgeMode::Soft => {
                report.folders_flagged = self.store.mark_folders_missing(&missing)?;
            }
            PurgeMode::Hard => {
                report.folders_deleted = self.store.delete_folders(&missing)?;
                let gone: Vec<i64> = self
                    .store
                    .visible_files()?
                    .into_iter()
                    .filter(|(_, fname)| !Path::new(fname).is_file())
                    .map(|(id, _)| id)
                    .collect();
                report.files_deleted = self.store.delete_files(&gone)?;
            }
        }
        Ok(())
    }

    /// Final checkpoint, then closes the store handle.
    pub fn close(self) -> Result<()> {
        self.store.close().context("Failed to close cache store")
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || JUNK_DIRS.contains(&name.as_ref())
}
