//! SQLite storage layer.
//!
//! Adapters backed by SQLite with WAL mode and split read/write connection pools.

pub mod cache;
pub mod pool;
pub mod state;
