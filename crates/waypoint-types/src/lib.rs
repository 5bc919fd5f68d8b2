//! Shared domain types for the waypoint workflow engine.
//!
//! This crate contains the durable data model (run state, history entries,
//! statuses), lifecycle events, configuration structs and error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
