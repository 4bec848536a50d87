//! Database layer for tally
//!
//! This module provides the table-backed storage using SQLite with:
//! - Schema migrations
//! - Repository implementing [`crate::storage::EventStore`]
//! - Aggregation pushed down into SQL

pub mod repo;
pub mod schema;

pub use repo::Database;
