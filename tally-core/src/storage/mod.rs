//! Storage abstraction for the live store, archives and the app registry.
//!
//! Two interchangeable backends implement [`EventStore`]:
//! - [`JsonFileStore`]: the whole live store as one JSON blob, rolled over
//!   into per-month archive files
//! - [`Database`]: SQLite tables, events kept indefinitely and aggregated in
//!   SQL
//!
//! The aggregator and archiver only ever see the in-memory snapshot these
//! backends hand out.

mod file;
mod lock;

pub use file::JsonFileStore;

use crate::archive::{ArchiveOutcome, ArchivePolicy};
use crate::config::{StorageBackend, StorageConfig};
use crate::db::Database;
use crate::error::Result;
use crate::period::DateRange;
use crate::report::{build_report, AnalyticsReport};
use crate::types::{AnalyticsStore, App, AppBucket, ArchiveRecord, Event, Granularity};
use chrono::{DateTime, Utc};

/// File name of the SQLite database inside the data directory.
pub const DATABASE_FILE: &str = "tally.db";

/// Capability set shared by all storage backends.
pub trait EventStore: Send + Sync {
    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;

    /// Whether ingestion should run the monthly archive sweep.
    fn rolls_over(&self) -> bool {
        false
    }

    /// Load every app's live events.
    fn load_store(&self) -> Result<AnalyticsStore>;

    /// Load one app's live events (empty for unknown apps).
    fn load_bucket(&self, app_id: &str) -> Result<AppBucket>;

    /// Append one event to an app's live events.
    fn append_event(&self, app_id: &str, event: &Event) -> Result<()>;

    /// Replace the live store.
    fn persist_store(&self, store: &AnalyticsStore) -> Result<()>;

    /// Run one archive sweep as a single read-modify-write cycle.
    ///
    /// The backend's write lock is held from loading the live store until
    /// the trimmed store is written, so appends racing the sweep are kept.
    fn archive_sweep(&self, now: DateTime<Utc>, policy: &ArchivePolicy) -> Result<ArchiveOutcome>;

    /// Write an archive record.
    ///
    /// Records are write-once: writing a record whose events match an
    /// existing one for the same app and month succeeds without change,
    /// anything else for that month fails with `ArchivePersistence`.
    fn persist_archive(&self, app_id: &str, record: &ArchiveRecord) -> Result<()>;

    /// All archive records for an app, oldest month first.
    fn list_archives(&self, app_id: &str) -> Result<Vec<ArchiveRecord>>;

    /// Registered apps.
    fn list_apps(&self) -> Result<Vec<App>>;

    /// Register an app; fails if the id is taken.
    fn register_app(&self, app: &App) -> Result<()>;

    /// Aggregated report for one app's live events.
    fn query_series(
        &self,
        app_id: &str,
        granularity: Granularity,
        range: &DateRange,
    ) -> Result<AnalyticsReport> {
        let bucket = self.load_bucket(app_id)?;
        build_report(bucket.events(), granularity, range)
    }
}

/// Open the backend selected by configuration.
pub fn open(config: &StorageConfig) -> Result<Box<dyn EventStore>> {
    let data_dir = config.data_dir();

    let store: Box<dyn EventStore> = match config.backend {
        StorageBackend::File => Box::new(JsonFileStore::open(&data_dir)?),
        StorageBackend::Sqlite => {
            let db = Database::open(&data_dir.join(DATABASE_FILE))?;
            db.migrate()?;
            Box::new(db)
        }
    };

    tracing::debug!(
        backend = store.backend_name(),
        data_dir = %data_dir.display(),
        "Opened storage"
    );

    Ok(store)
}

/// Compare two archive records for write-once purposes.
pub(crate) fn same_archive(existing: &ArchiveRecord, incoming: &ArchiveRecord) -> bool {
    existing.month == incoming.month && existing.requests == incoming.requests
}
