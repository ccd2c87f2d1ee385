//! Filesystem side of the picture cache.
//!
//! This module provides:
//! - `MetadataExtractor` / `ExifExtractor` - Per-file metadata extraction
//! - `Synchronizer` - One reconciliation cycle between disk and the cache
//! - `SyncWorker` / `SyncHandle` - The background thread running the cycles

pub mod metadata;
pub mod synchronizer;
pub mod worker;

pub use metadata::{ExifExtractor, MetadataExtractor};
pub use synchronizer::{CycleReport, PurgeMode, Synchronizer};
pub use worker::{SyncConfig, SyncHandle, SyncWorker};
