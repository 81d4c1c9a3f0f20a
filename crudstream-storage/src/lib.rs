//! crudstream Storage - Storage and Cache Adapters
//!
//! Defines the fixed CRUD contract the coordination layer consumes
//! ([`EntityStore`]) and the key/value cache contract ([`CacheBackend`]),
//! each with an in-memory implementation used by the binary and the tests.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{
    CacheBackend, CacheKey, CacheKeyParseError, CacheStats, CacheableEntity,
    InMemoryCacheBackend, StorageFetcher, StoreFetcher,
};
pub use memory::InMemoryStorage;
pub use store::{EntityStore, StorageStatistics};
