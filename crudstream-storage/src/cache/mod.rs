//! Cache adapter: a key/value store with TTL.
//!
//! Values are JSON snapshots of entities stored under `"<kind>:<id>"` keys.
//! The backend deals in strings only; decoding, and treating an undecodable
//! value as a miss, is the cache-aside reader's job.

pub mod key;
pub mod memory;
pub mod traits;

pub use key::{CacheKey, CacheKeyParseError};
pub use memory::InMemoryCacheBackend;
pub use traits::{CacheBackend, CacheStats, CacheableEntity, StorageFetcher, StoreFetcher};
