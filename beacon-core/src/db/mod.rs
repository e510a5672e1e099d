//! Database layer for beacon
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Store trait implementations consumed by the escalation and brief passes

pub mod repo;
pub mod schema;
mod store;

pub use repo::{parse_timestamp, Database};
