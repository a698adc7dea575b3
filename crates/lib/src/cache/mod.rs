//! Content-keyed build cache.

mod key;
mod store;

pub use key::{CacheKey, CacheKeyError, Fingerprint};
pub use store::{BuildCache, CacheEntry, CacheError, CacheLookup, CacheStats, CacheWarning, EntryStatus};
