//! Event ingestion and the archive sweep.
//!
//! [`record_event`] is the write path behind `tally-track`: it validates the
//! request, runs the monthly sweep on backends that roll over, then appends
//! the event stamped with the current time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{archive_if_due_with, ArchiveOutcome, ArchivePolicy};
use crate::error::{Error, Result};
use crate::storage::{same_archive, EventStore};
use crate::types::{validate_app_id, AppId, Event};

/// Body of a tracking call, as sent by client apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub app_id: AppId,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl TrackRequest {
    pub fn new(app_id: impl Into<AppId>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            endpoint: None,
            metadata: None,
        }
    }

    /// Reject requests missing an app or user.
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(Error::InvalidRequest("appId is required".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("userId is required".to_string()));
        }
        validate_app_id(&self.app_id)
    }

    fn into_event(self, now: DateTime<Utc>) -> (AppId, Event) {
        let event = Event {
            user_id: self.user_id,
            timestamp: crate::types::format_timestamp(now),
            endpoint: self.endpoint,
            metadata: self.metadata,
        };
        (self.app_id, event)
    }
}

/// What a successful tracking call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackReceipt {
    pub app_id: AppId,
    pub recorded_at: String,
    /// Months archived by the sweep that ran before the append
    pub archived: Vec<String>,
}

/// Run the archive sweep against a backend.
///
/// The backend holds its write lock for the whole cycle; archive records are
/// written before the live store is trimmed.
pub fn run_archive_sweep(
    store: &dyn EventStore,
    now: DateTime<Utc>,
    policy: &ArchivePolicy,
) -> Result<ArchiveOutcome> {
    let outcome = store.archive_sweep(now, policy)?;

    for failure in &outcome.failures {
        tracing::warn!(
            app_id = %failure.app_id,
            error = %failure.error,
            "App left in live store"
        );
    }

    Ok(outcome)
}

/// What [`run_archive_sweep`] would do at `now`, without writing anything.
///
/// Records that would collide with a different existing archive for the
/// same month are reported as failures, like the real sweep does.
pub fn preview_archive_sweep(
    store: &dyn EventStore,
    now: DateTime<Utc>,
    policy: &ArchivePolicy,
) -> Result<ArchiveOutcome> {
    let live = store.load_store()?;
    Ok(archive_if_due_with(live, now, policy, |app_id, record| {
        let existing = store
            .list_archives(app_id)?
            .into_iter()
            .find(|existing| existing.month == record.month);

        match existing {
            Some(existing) if !same_archive(&existing, record) => {
                Err(Error::ArchivePersistence {
                    app_id: app_id.to_string(),
                    month: record.month.clone(),
                    message: format!(
                        "an archive for {} already exists with different events",
                        record.month
                    ),
                })
            }
            _ => Ok(()),
        }
    }))
}

/// Record one event.
pub fn record_event(
    store: &dyn EventStore,
    request: TrackRequest,
    now: DateTime<Utc>,
    policy: &ArchivePolicy,
) -> Result<TrackReceipt> {
    request.validate()?;

    let mut archived = Vec::new();
    if store.rolls_over() && policy.is_due(now) {
        let outcome = run_archive_sweep(store, now, policy)?;
        archived = outcome
            .records
            .iter()
            .map(|(_, record)| record.month.clone())
            .collect();
        archived.dedup();
    }

    let (app_id, event) = request.into_event(now);
    store.append_event(&app_id, &event)?;

    tracing::debug!(
        app_id = %app_id,
        user_id = %event.user_id,
        backend = store.backend_name(),
        "Recorded event"
    );

    Ok(TrackReceipt {
        app_id,
        recorded_at: event.timestamp,
        archived,
    })
}
