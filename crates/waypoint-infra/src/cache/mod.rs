//! Cache backend: `CacheStateRepository` and the in-process cache driver.
//!
//! The SQLite cache driver lives with the other SQLite adapters in
//! `crate::sqlite::cache`.

pub mod memory;
pub mod state;

pub use memory::MemoryCacheStore;
pub use state::CacheStateRepository;
