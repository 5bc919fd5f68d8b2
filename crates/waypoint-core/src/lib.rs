//! Workflow engine logic and repository trait definitions for waypoint.
//!
//! This crate defines the "ports" (`StateRepository`, `CacheStore`) that the
//! infrastructure layer implements, plus the executor that drives runs
//! against them. It depends only on `waypoint-types` -- never on
//! `waypoint-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod storage;
pub mod workflow;
