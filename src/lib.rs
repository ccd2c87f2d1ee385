//! picdeck: the picture cache and playlist engine behind a photo frame.
//!
//! - `cache` - SQLite store, schema and migrations
//! - `scanner` - metadata extraction and the background synchronizer
//! - `query` - filters, ordering and portrait pairing
//! - `playlist` - the next-picture state machine
//! - `geo` - reverse geocoding seam
//! - `retry` - bounded retry and the clock it sleeps on
//! - `config` - YAML configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod playlist;
pub mod query;
pub mod retry;
pub mod scanner;

#[cfg(test)]
mod testing;

pub use cache::CacheStore;
pub use config::Config;
pub use error::StoreError;
pub use models::{Pic, PlaylistEntry};
pub use playlist::{Playlist, PlaylistConfig};
pub use query::{Predicate, QueryEngine};
pub use scanner::{SyncHandle, SyncWorker, Synchronizer};
