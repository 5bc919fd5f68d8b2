//! Infrastructure layer for waypoint.
//!
//! Contains implementations of the ports defined in `waypoint-core`: the
//! relational SQLite state repository, the cache-backed state repository
//! with its two cache drivers, runtime backend selection and the TOML
//! configuration loader.

pub mod cache;
pub mod config;
pub mod repository;
pub mod sqlite;
pub mod timestamp;
