//! Reverse geocoding seam.
//!
//! The cache calls an [`AddressResolver`] lazily from the read path, once per
//! rounded coordinate pair that has no stored location yet. Resolvers never
//! fail: a lookup that goes wrong yields an empty string.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::models::coordinate_key;

/// Default number of coordinate pairs kept by [`CachedResolver`].
const DEFAULT_CACHE_ENTRIES: usize = 256;

/// Turns a rounded latitude/longitude into a human readable place.
pub trait AddressResolver: Send + Sync {
    /// Returns the address, or an empty string if none could be found.
    fn resolve(&self, latitude: f64, longitude: f64) -> String;
}

/// Resolver used when geolocation is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl AddressResolver for NoopResolver {
    fn resolve(&self, _latitude: f64, _longitude: f64) -> String {
        String::new()
    }
}

/// Keeps recent successful lookups in memory in front of another resolver.
///
/// Empty answers are not cached so a transient failure is retried on the
/// next request.
pub struct CachedResolver<R> {
    inner: R,
    cache: Mutex<LruCache<(i64, i64), String>>,
}

impl<R: AddressResolver> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_ENTRIES)
    }

    pub fn with_capacity(inner: R, entries: usize) -> Self {
        let cap = NonZeroUsize::new(entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }
}

impl<R: AddressResolver> AddressResolver for CachedResolver<R> {
    fn resolve(&self, latitude: f64, longitude: f64) -> String {
        let key = (coordinate_key(latitude), coordinate_key(longitude));
        if let Some(hit) = self.cache.lock().get(&key) {
            trace!(?key, "Address cache hit");
            return hit.clone();
        }

        let address = self.inner.resolve(latitude, longitude);
        if !address.is_empty() {
            self.cache.lock().put(key, address.clone());
        }
        address
    }
}
