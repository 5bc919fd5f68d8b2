//! Storage port for the cache-backed state repository.

pub mod cache_store;

pub use cache_store::CacheStore;
