//! # tally-core
//!
//! Core library for tally - a small usage analytics collector.
//!
//! This library provides:
//! - Domain types for apps, events, buckets and archive records
//! - Aggregation of events into daily, weekly and monthly series
//! - Monthly archiving of the live store
//! - File and SQLite storage backends
//! - A client for remote collection endpoints
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use tally_core::{storage, Config, DateRange, Granularity};
//!
//! let config = Config::load().expect("failed to load config");
//! let store = storage::open(&config.storage).expect("failed to open storage");
//!
//! let report = store
//!     .query_series("geogame", Granularity::Weekly, &DateRange::all())
//!     .expect("failed to build report");
//! println!("{} users", report.unique_users);
//! ```

// Re-export commonly used items at the crate root
pub use archive::{archive_if_due, archive_if_due_with, ArchiveOutcome, ArchivePolicy};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use ingest::{
    preview_archive_sweep, record_event, run_archive_sweep, TrackReceipt, TrackRequest,
};
pub use period::{CalendarMonth, DateRange};
pub use report::{build_report, AnalyticsReport, Series};
pub use storage::{EventStore, JsonFileStore};
pub use types::*;

// Public modules
pub mod aggregate;
pub mod archive;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod period;
pub mod report;
pub mod storage;
pub mod types;
