//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::geo::AddressResolver;
use crate::models::ImageMeta;
use crate::scanner::MetadataExtractor;

/// Extractor that never reads file contents.
///
/// - stems starting with `p_` are portrait (300x400), everything else
///   landscape (400x300)
/// - stems containing `bad` fail extraction
/// - stems containing `gps` carry coordinates near the Eiffel tower, all of
///   which round to the same 4-decimal key
pub(crate) struct StubExtractor {
    calls: Mutex<HashMap<PathBuf, usize>>,
}

impl StubExtractor {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub(crate) fn calls_for(&self, path: &Path) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

impl MetadataExtractor for StubExtractor {
    fn extract(&self, path: &Path) -> Result<ImageMeta> {
        *self.calls.lock().entry(path.to_path_buf()).or_insert(0) += 1;

        if !path.is_file() {
            bail!("{:?} does not exist", path);
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.contains("bad") {
            bail!("corrupt image {:?}", path);
        }

        let mut meta = if stem.starts_with("p_") {
            ImageMeta::with_size(300, 400)
        } else {
            ImageMeta::with_size(400, 300)
        };
        if stem.contains("gps") {
            let jitter = (stem.len() % 3) as f64 * 0.000_01;
            meta.set_gps(48.858_37 + jitter, 2.294_48 + jitter);
        }
        Ok(meta)
    }
}

/// Resolver returning a fixed answer and counting lookups.
pub(crate) struct CountingResolver {
    answer: String,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub(crate) fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AddressResolver for CountingResolver {
    fn resolve(&self, _latitude: f64, _longitude: f64) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// Creates an empty file, including missing parent directories.
pub(crate) fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap();
}

/// Moves the mtime of a file or directory `secs` seconds into the future.
pub(crate) fn bump_mtime(path: &Path, secs: u64) {
    let current = fs::metadata(path).unwrap().modified().unwrap();
    set_mtime(path, current + Duration::from_secs(secs));
}

/// Sets the mtime of a file or directory. Explicit timestamps only need
/// ownership, so a read-only handle is enough.
pub(crate) fn set_mtime(path: &Path, when: SystemTime) {
    File::open(path).unwrap().set_modified(when).unwrap();
}
