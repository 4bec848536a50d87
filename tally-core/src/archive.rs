//! Monthly rollover of the live store.
//!
//! During the first days of a month the previous month's events are split
//! out of every app's live bucket into a write-once [`ArchiveRecord`]. An app
//! is only trimmed after its record has been handed to the persistence sink
//! successfully; on any failure its bucket stays exactly as it was and the
//! remaining apps are still processed.

use crate::error::{Error, Result};
use crate::period::CalendarMonth;
use crate::types::{AnalyticsStore, AppId, ArchiveRecord, Event};
use chrono::{DateTime, Datelike, Utc};

/// Days at the start of a month during which the sweep runs.
pub const DEFAULT_GRACE_DAYS: u32 = 3;

/// When the sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchivePolicy {
    /// Sweep while the day of month is at most this value
    pub grace_days: u32,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            grace_days: DEFAULT_GRACE_DAYS,
        }
    }
}

impl ArchivePolicy {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.day() <= self.grace_days
    }

    /// The month being closed out when sweeping at `now`.
    pub fn target_month(&self, now: DateTime<Utc>) -> CalendarMonth {
        CalendarMonth::of(now).previous()
    }
}

/// An app that could not be archived this run.
#[derive(Debug)]
pub struct ArchiveFailure {
    pub app_id: AppId,
    pub error: Error,
}

/// Result of one sweep.
#[derive(Debug)]
pub struct ArchiveOutcome {
    /// The live store after trimming
    pub store: AnalyticsStore,
    /// Records produced this run
    pub records: Vec<(AppId, ArchiveRecord)>,
    /// Apps left untouched because archiving them failed
    pub failures: Vec<ArchiveFailure>,
}

impl ArchiveOutcome {
    fn unchanged(store: AnalyticsStore) -> Self {
        Self {
            store,
            records: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Whether the live store differs from the input.
    pub fn is_changed(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Split the previous month out of `store` if `now` falls in the grace window.
///
/// Pure variant: records are returned for the caller to persist.
pub fn archive_if_due(store: AnalyticsStore, now: DateTime<Utc>) -> ArchiveOutcome {
    archive_if_due_with(store, now, &ArchivePolicy::default(), |_, _| Ok(()))
}

/// Like [`archive_if_due`], handing each record to `persist` before the app's
/// bucket is trimmed.
pub fn archive_if_due_with<F>(
    mut store: AnalyticsStore,
    now: DateTime<Utc>,
    policy: &ArchivePolicy,
    mut persist: F,
) -> ArchiveOutcome
where
    F: FnMut(&str, &ArchiveRecord) -> Result<()>,
{
    if !policy.is_due(now) {
        tracing::debug!(day = now.day(), grace_days = policy.grace_days, "Archive not due");
        return ArchiveOutcome::unchanged(store);
    }

    let target = policy.target_month(now);
    let month = target.to_string();
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for (app_id, bucket) in store.iter_mut() {
        let (archived, remaining) = match split_month(bucket.events(), target) {
            Ok(Some(parts)) => parts,
            Ok(None) => continue,
            Err(error) => {
                tracing::warn!(
                    app_id = %app_id,
                    month = %month,
                    error = %error,
                    "Skipping archive for app"
                );
                failures.push(ArchiveFailure {
                    app_id: app_id.clone(),
                    error,
                });
                continue;
            }
        };

        let record = ArchiveRecord::new(month.clone(), archived, now);

        if let Err(e) = persist(app_id.as_str(), &record) {
            let error = match e {
                Error::ArchivePersistence { .. } => e,
                other => Error::ArchivePersistence {
                    app_id: app_id.clone(),
                    month: month.clone(),
                    message: other.to_string(),
                },
            };
            tracing::warn!(
                app_id = %app_id,
                month = %month,
                error = %error,
                "Archive write failed, keeping live events"
            );
            failures.push(ArchiveFailure {
                app_id: app_id.clone(),
                error,
            });
            continue;
        }

        bucket.replace_events(remaining);
        tracing::info!(
            app_id = %app_id,
            month = %month,
            archived = record.total_requests,
            remaining = bucket.total_requests(),
            "Archived month"
        );
        records.push((app_id.clone(), record));
    }

    ArchiveOutcome {
        store,
        records,
        failures,
    }
}

/// Partition events into (in `month`, not in `month`), preserving order.
///
/// Returns `None` when no event falls in `month`.
fn split_month(events: &[Event], month: CalendarMonth) -> Result<Option<(Vec<Event>, Vec<Event>)>> {
    let mut archived = Vec::new();
    let mut remaining = Vec::new();

    for event in events {
        if month.contains(event.recorded_at()?) {
            archived.push(event.clone());
        } else {
            remaining.push(event.clone());
        }
    }

    if archived.is_empty() {
        Ok(None)
    } else {
        Ok(Some((archived, remaining)))
    }
}
