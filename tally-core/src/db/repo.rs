//! Database repository layer
//!
//! Table-backed [`EventStore`]: one row per event, archives and apps in their
//! own tables. Series queries are answered with `GROUP BY` over the
//! normalized `ts` column and match [`crate::aggregate::aggregate`] exactly.

use crate::archive::{archive_if_due_with, ArchiveOutcome, ArchivePolicy};
use crate::error::{Error, Result};
use crate::period::{CalendarMonth, DateRange};
use crate::report::{AnalyticsReport, Series};
use crate::storage::{same_archive, EventStore};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Format of the normalized `ts` column.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// How long a writer waits for another process's write transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Event operations
    // ============================================

    fn insert_event(conn: &Connection, app_id: &str, event: &Event) -> Result<()> {
        let at = event.recorded_at()?;
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO events (app_id, user_id, ts, timestamp, endpoint, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                app_id,
                event.user_id,
                at.format(TS_FORMAT).to_string(),
                event.timestamp,
                event.endpoint,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<(AppId, Event)> {
        let metadata_str: Option<String> = row.get("metadata")?;
        let metadata = metadata_str
            .map(|s| serde_json::from_str::<BTreeMap<String, String>>(&s))
            .transpose()
            .map_err(|e| json_column_error(5, e))?;

        Ok((
            row.get("app_id")?,
            Event {
                user_id: row.get("user_id")?,
                timestamp: row.get("timestamp")?,
                endpoint: row.get("endpoint")?,
                metadata,
            },
        ))
    }

    fn query_store(conn: &Connection) -> Result<AnalyticsStore> {
        let mut stmt = conn.prepare(
            "SELECT app_id, user_id, timestamp, endpoint, metadata FROM events ORDER BY id",
        )?;

        let mut store = AnalyticsStore::new();
        for row in stmt.query_map([], Self::row_to_event)? {
            let (app_id, event) = row?;
            store.push(&app_id, event);
        }
        Ok(store)
    }

    /// Delete one app's events that fall in `month`.
    fn delete_month(conn: &Connection, app_id: &str, month: CalendarMonth) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM events WHERE app_id = ?1 AND ts >= ?2 AND ts < ?3",
            params![
                app_id,
                month.start().format(TS_FORMAT).to_string(),
                month.end().format(TS_FORMAT).to_string(),
            ],
        )?;
        Ok(deleted)
    }

    /// Count distinct users and events for one app within `range`.
    fn query_summary(conn: &Connection, app_id: &str, range: &DateRange) -> Result<(u64, u64)> {
        let (start, end) = range_params(range);
        let (users, requests): (i64, i64) = conn.query_row(
            r#"
            SELECT COUNT(DISTINCT user_id), COUNT(*)
            FROM events
            WHERE app_id = ?1
              AND (?2 IS NULL OR date(ts) >= ?2)
              AND (?3 IS NULL OR date(ts) <= ?3)
            "#,
            params![app_id, start, end],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok((users as u64, requests as u64))
    }

    // ============================================
    // Archive operations
    // ============================================

    fn get_archive(conn: &Connection, app_id: &str, month: &str) -> Result<Option<ArchiveRecord>> {
        conn.query_row(
            "SELECT * FROM archives WHERE app_id = ?1 AND month = ?2",
            params![app_id, month],
            Self::row_to_archive,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Insert an archive row, accepting an identical existing one.
    fn insert_archive(conn: &Connection, app_id: &str, record: &ArchiveRecord) -> Result<()> {
        let persistence_error = |message: String| Error::ArchivePersistence {
            app_id: app_id.to_string(),
            month: record.month.clone(),
            message,
        };

        if let Some(existing) = Self::get_archive(conn, app_id, &record.month)? {
            if same_archive(&existing, record) {
                tracing::debug!(app_id, month = %record.month, "Archive already written");
                return Ok(());
            }
            return Err(persistence_error(format!(
                "an archive for {} already exists with different events",
                record.month
            )));
        }

        conn.execute(
            r#"
            INSERT INTO archives
                (app_id, month, unique_users, total_requests, requests, archived_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                app_id,
                record.month,
                serde_json::to_string(&record.unique_users)?,
                record.total_requests as i64,
                serde_json::to_string(&record.requests)?,
                record.archived_at.to_rfc3339(),
            ],
        )
        .map_err(|e| persistence_error(e.to_string()))?;

        Ok(())
    }

    fn row_to_archive(row: &Row) -> rusqlite::Result<ArchiveRecord> {
        let unique_users_str: String = row.get("unique_users")?;
        let requests_str: String = row.get("requests")?;
        let archived_at_str: String = row.get("archived_at")?;
        let total_requests: i64 = row.get("total_requests")?;

        Ok(ArchiveRecord {
            month: row.get("month")?,
            unique_users: serde_json::from_str(&unique_users_str)
                .map_err(|e| json_column_error(2, e))?,
            total_requests: total_requests as u64,
            requests: serde_json::from_str(&requests_str).map_err(|e| json_column_error(4, e))?,
            archived_at: DateTime::parse_from_rfc3339(&archived_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
        })
    }

    // ============================================
    // App operations
    // ============================================

    fn row_to_app(row: &Row) -> rusqlite::Result<App> {
        let status_str: String = row.get("status")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(App {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            status: status_str.parse::<AppStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
            })?,
            created_at: NaiveDate::parse_from_str(&created_at_str, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
            })?,
        })
    }
}

impl EventStore for Database {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn load_store(&self) -> Result<AnalyticsStore> {
        let conn = self.conn.lock().unwrap();
        Self::query_store(&conn)
    }

    fn load_bucket(&self, app_id: &str) -> Result<AppBucket> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT app_id, user_id, timestamp, endpoint, metadata
            FROM events
            WHERE app_id = ?1
            ORDER BY id
            "#,
        )?;

        let events = stmt
            .query_map([app_id], Self::row_to_event)?
            .map(|row| row.map(|(_, event)| event))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(AppBucket::from_events(events))
    }

    fn append_event(&self, app_id: &str, event: &Event) -> Result<()> {
        validate_app_id(app_id)?;
        let conn = self.conn.lock().unwrap();
        Self::insert_event(&conn, app_id, event)
    }

    fn persist_store(&self, store: &AnalyticsStore) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM events", [])?;
        for (app_id, bucket) in store.iter() {
            for event in bucket.events() {
                Self::insert_event(&tx, app_id, event)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn persist_archive(&self, app_id: &str, record: &ArchiveRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::insert_archive(&conn, app_id, record)
    }

    fn archive_sweep(&self, now: DateTime<Utc>, policy: &ArchivePolicy) -> Result<ArchiveOutcome> {
        let mut conn = self.conn.lock().unwrap();
        // IMMEDIATE takes the database write lock before the snapshot is read.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let live = Self::query_store(&tx)?;
        let outcome = archive_if_due_with(live, now, policy, |app_id, record| {
            Self::insert_archive(&tx, app_id, record)
        });

        let month = policy.target_month(now);
        for (app_id, record) in &outcome.records {
            let deleted = Self::delete_month(&tx, app_id, month)?;
            tracing::debug!(
                app_id = %app_id,
                month = %record.month,
                deleted,
                "Trimmed live events"
            );
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn list_archives(&self, app_id: &str) -> Result<Vec<ArchiveRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM archives WHERE app_id = ?1 ORDER BY month")?;
        let records = stmt
            .query_map([app_id], Self::row_to_archive)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn list_apps(&self) -> Result<Vec<App>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM apps ORDER BY created_at, id")?;
        let apps = stmt
            .query_map([], Self::row_to_app)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(apps)
    }

    fn register_app(&self, app: &App) -> Result<()> {
        validate_app_id(&app.id)?;
        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            r#"
            INSERT INTO apps (id, name, description, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                app.id,
                app.name,
                app.description,
                app.status.as_str(),
                app.created_at.format("%Y-%m-%d").to_string(),
            ],
        )?;

        if inserted == 0 {
            return Err(Error::InvalidRequest(format!("app '{}' already exists", app.id)));
        }
        Ok(())
    }

    fn query_series(
        &self,
        app_id: &str,
        granularity: Granularity,
        range: &DateRange,
    ) -> Result<AnalyticsReport> {
        let conn = self.conn.lock().unwrap();
        let (unique_users, total_requests) = Self::query_summary(&conn, app_id, range)?;

        let bucket_expr = match granularity {
            Granularity::Daily => "strftime('%Y-%m-%d', ts)",
            // Monday start: step back (weekday + 6) % 7 days, Sunday = 0
            Granularity::Weekly => {
                "date(ts, '-' || ((CAST(strftime('%w', ts) AS INTEGER) + 6) % 7) || ' days')"
            }
            Granularity::Monthly => "strftime('%Y-%m', ts)",
        };

        let sql = format!(
            r#"
            SELECT {bucket_expr} AS bucket, COUNT(DISTINCT user_id), COUNT(*)
            FROM events
            WHERE app_id = ?1
              AND (?2 IS NULL OR date(ts) >= ?2)
              AND (?3 IS NULL OR date(ts) <= ?3)
            GROUP BY bucket
            ORDER BY bucket
            "#
        );

        let (start, end) = range_params(range);
        let mut stmt = conn.prepare(&sql)?;
        let points = stmt
            .query_map(params![app_id, start, end], |r| {
                let users: i64 = r.get(1)?;
                let requests: i64 = r.get(2)?;
                Ok(AggregatedPoint {
                    date: r.get(0)?,
                    users: users as u64,
                    requests: requests as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(AnalyticsReport {
            unique_users,
            total_requests,
            series: Series::new(granularity, points),
        })
    }
}

/// Range bounds as SQL parameters (`NULL` when open).
fn range_params(range: &DateRange) -> (Option<String>, Option<String>) {
    let fmt = |d: NaiveDate| d.format("%Y-%m-%d").to_string();
    (range.start.map(fmt), range.end.map(fmt))
}

fn json_column_error(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}
