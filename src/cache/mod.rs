//! Persistent image metadata cache.
//!
//! - `schema` - table/view definitions and version migrations
//! - `store` - `CacheStore`, the handle every reader and writer goes through

pub mod schema;
pub mod store;

pub use schema::SCHEMA_VERSION;
pub use store::*;
