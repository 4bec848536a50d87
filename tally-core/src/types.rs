//! Core domain types for tally
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **App** | A client application that reports usage (e.g. `geogame`) |
//! | **Event** | One recorded request from a user of an App |
//! | **Bucket** | All live events of one App, plus denormalized counts |
//! | **Store** | The live buckets of every App |
//! | **Archive** | A write-once record holding one App's events for a past month |
//!
//! Timestamps are kept in their ISO-8601 wire form on [`Event`] and parsed on
//! use, so a malformed value surfaces as [`Error::MalformedEvent`] at the
//! point where it matters instead of being bucketed under a bogus key.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Application identifier.
pub type AppId = String;

// ============================================
// Timestamps
// ============================================

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::MalformedEvent {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Format a timestamp the way events are stored (`2024-06-03T10:00:00.000Z`).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================
// Event
// ============================================

/// A single usage event reported by an app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Reporting user
    pub user_id: String,
    /// When the event was recorded (ISO-8601)
    pub timestamp: String,
    /// Endpoint or screen the user hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Free-form string attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Event {
    /// Create an event for `user_id` recorded at `at`.
    pub fn new(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: format_timestamp(at),
            endpoint: None,
            metadata: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Parsed timestamp of this event.
    pub fn recorded_at(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

// ============================================
// App bucket and store
// ============================================

/// Live events of one application.
///
/// `unique_users` and `total_requests` are denormalized from `requests`; they
/// are maintained on [`AppBucket::push`] and rebuilt whenever the event list
/// is replaced, so they can never drift from the events they summarize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredBucket")]
pub struct AppBucket {
    requests: Vec<Event>,
    unique_users: BTreeSet<String>,
    total_requests: u64,
}

/// On-disk shape of a bucket. Only `requests` is trusted.
#[derive(Deserialize)]
struct StoredBucket {
    #[serde(default)]
    requests: Vec<Event>,
}

impl From<StoredBucket> for AppBucket {
    fn from(stored: StoredBucket) -> Self {
        AppBucket::from_events(stored.requests)
    }
}

impl AppBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bucket from events in arrival order.
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut bucket = Self {
            requests: events,
            ..Default::default()
        };
        bucket.recompute();
        bucket
    }

    /// Append an event, updating the running counts.
    pub fn push(&mut self, event: Event) {
        self.unique_users.insert(event.user_id.clone());
        self.total_requests += 1;
        self.requests.push(event);
    }

    /// Replace the event list and rebuild the counts.
    pub fn replace_events(&mut self, events: Vec<Event>) {
        self.requests = events;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.unique_users = self.requests.iter().map(|e| e.user_id.clone()).collect();
        self.total_requests = self.requests.len() as u64;
    }

    pub fn events(&self) -> &[Event] {
        &self.requests
    }

    pub fn unique_users(&self) -> &BTreeSet<String> {
        &self.unique_users
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// The live store: one bucket per application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalyticsStore {
    apps: BTreeMap<AppId, AppBucket>,
}

impl AnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, app_id: &str) -> Option<&AppBucket> {
        self.apps.get(app_id)
    }

    /// Bucket for `app_id`, created empty if missing.
    pub fn bucket_mut(&mut self, app_id: &str) -> &mut AppBucket {
        self.apps.entry(app_id.to_string()).or_default()
    }

    pub fn insert(&mut self, app_id: impl Into<AppId>, bucket: AppBucket) {
        self.apps.insert(app_id.into(), bucket);
    }

    /// Record an event for `app_id`.
    pub fn push(&mut self, app_id: &str, event: Event) {
        self.bucket_mut(app_id).push(event);
    }

    pub fn app_ids(&self) -> impl Iterator<Item = &AppId> {
        self.apps.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, AppId, AppBucket> {
        self.apps.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, AppId, AppBucket> {
        self.apps.iter_mut()
    }

    /// Total number of live events across all apps.
    pub fn total_events(&self) -> usize {
        self.apps.values().map(|b| b.events().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl FromIterator<(AppId, AppBucket)> for AnalyticsStore {
    fn from_iter<I: IntoIterator<Item = (AppId, AppBucket)>>(iter: I) -> Self {
        Self {
            apps: iter.into_iter().collect(),
        }
    }
}

// ============================================
// Aggregation
// ============================================

/// Bucket size for time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Calendar day, `YYYY-MM-DD`
    Daily,
    /// Week starting Monday, keyed by the Monday's `YYYY-MM-DD`
    Weekly,
    /// Calendar month, `YYYY-MM`
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    /// Name of the series field in a query response.
    pub fn series_field(&self) -> &'static str {
        match self {
            Granularity::Daily => "dailyData",
            Granularity::Weekly => "weeklyData",
            Granularity::Monthly => "monthlyData",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            other => Err(Error::InvalidRequest(format!(
                "unknown time range '{}', expected daily, weekly or monthly",
                other
            ))),
        }
    }
}

/// One point of a chart series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    /// Bucket key
    pub date: String,
    /// Distinct users in the bucket
    pub users: u64,
    /// Events in the bucket
    pub requests: u64,
}

// ============================================
// Archive
// ============================================

/// One application's events for a closed month.
///
/// Created once per application per month and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    /// `YYYY-MM`
    pub month: String,
    pub unique_users: Vec<String>,
    pub total_requests: u64,
    pub requests: Vec<Event>,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveRecord {
    /// Build a record from the archived partition of a bucket.
    pub fn new(month: impl Into<String>, requests: Vec<Event>, archived_at: DateTime<Utc>) -> Self {
        let unique_users: BTreeSet<String> = requests.iter().map(|e| e.user_id.clone()).collect();
        Self {
            month: month.into(),
            unique_users: unique_users.into_iter().collect(),
            total_requests: requests.len() as u64,
            requests,
            archived_at,
        }
    }
}

// ============================================
// App registry
// ============================================

/// Lifecycle of a registered app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Active,
    Inactive,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Active => "active",
            AppStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for AppStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AppStatus::Active),
            "inactive" => Ok(AppStatus::Inactive),
            other => Err(Error::InvalidRequest(format!("unknown app status '{}'", other))),
        }
    }
}

/// A registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: AppId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: AppStatus,
    pub created_at: NaiveDate,
}

impl App {
    /// Register a new app. The id is the name lowercased with whitespace removed.
    pub fn new(name: &str, description: Option<&str>, created_at: NaiveDate) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("app name is required".to_string()));
        }

        let id = app_id_from_name(name);
        validate_app_id(&id)?;

        Ok(Self {
            id,
            name: name.to_string(),
            description: description.unwrap_or_default().to_string(),
            status: AppStatus::Active,
            created_at,
        })
    }
}

/// Check that an app id is usable as a storage key and path component.
pub fn validate_app_id(app_id: &str) -> Result<()> {
    let valid = !app_id.is_empty()
        && app_id.len() <= 64
        && !app_id.starts_with('.')
        && app_id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!("invalid app id '{}'", app_id)))
    }
}

/// Derive an app id from a display name: `"Discord Storage"` → `"discordstorage"`.
pub fn app_id_from_name(name: &str) -> AppId {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
