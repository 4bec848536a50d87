//! HTTP client for a remote analytics endpoint
//!
//! Talks to a deployed collection service exposing `POST /api/analytics`
//! for tracking and `GET /api/analytics?appId=..&timeRange=..` for stats.
//! Calls are made once; retrying is up to the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::aggregate::aggregate;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::ingest::TrackRequest;
use crate::report::{AnalyticsReport, Series};
use crate::types::{AggregatedPoint, Event, Granularity};

const ANALYTICS_PATH: &str = "/api/analytics";

/// Response from `POST /api/analytics`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub success: bool,
}

/// Response from `GET /api/analytics`
///
/// Endpoints either return a precomputed series or the raw live events;
/// [`RemoteStats::into_report`] handles both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStats {
    #[serde(default)]
    pub unique_users: u64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub requests: Vec<Event>,
    #[serde(default)]
    pub daily_data: Option<Vec<AggregatedPoint>>,
    #[serde(default)]
    pub weekly_data: Option<Vec<AggregatedPoint>>,
    #[serde(default)]
    pub monthly_data: Option<Vec<AggregatedPoint>>,
}

impl RemoteStats {
    /// Series at `granularity`, aggregating raw events when the endpoint did
    /// not send one.
    pub fn into_report(self, granularity: Granularity) -> Result<AnalyticsReport> {
        let precomputed = match granularity {
            Granularity::Daily => self.daily_data,
            Granularity::Weekly => self.weekly_data,
            Granularity::Monthly => self.monthly_data,
        };

        let points = match precomputed {
            Some(points) => points,
            None => aggregate(&self.requests, granularity)?,
        };

        Ok(AnalyticsReport {
            unique_users: self.unique_users,
            total_requests: self.total_requests,
            series: Series::new(granularity, points),
        })
    }
}

/// One event to send with [`AnalyticsClient::track_batch`].
#[derive(Debug, Clone, Default)]
pub struct PendingEvent {
    pub user_id: String,
    pub endpoint: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

/// HTTP client for a remote analytics endpoint
pub struct AnalyticsClient {
    http_client: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl AnalyticsClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .api_url
            .as_deref()
            .ok_or_else(|| Error::Config("client.api_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let app_id = config
            .app_id
            .clone()
            .ok_or_else(|| Error::Config("client.app_id is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            app_id,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn track_url(&self) -> String {
        format!("{}{}", self.base_url, ANALYTICS_PATH)
    }

    fn stats_url(&self, granularity: Granularity) -> String {
        format!(
            "{}{}?appId={}&timeRange={}",
            self.base_url,
            ANALYTICS_PATH,
            urlencoding::encode(&self.app_id),
            granularity.as_str()
        )
    }

    fn track_body(&self, event: &PendingEvent) -> TrackRequest {
        TrackRequest {
            app_id: self.app_id.clone(),
            user_id: event.user_id.clone(),
            endpoint: event.endpoint.clone(),
            metadata: event.metadata.clone(),
        }
    }

    /// Record one event for `user_id`
    pub async fn track(
        &self,
        user_id: &str,
        endpoint: Option<&str>,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<TrackResponse> {
        let event = PendingEvent {
            user_id: user_id.to_string(),
            endpoint: endpoint.map(str::to_string),
            metadata: metadata.cloned(),
        };
        self.send_track(&event).await
    }

    async fn send_track(&self, event: &PendingEvent) -> Result<TrackResponse> {
        let body = self.track_body(event);
        body.validate()?;

        let response = self
            .http_client
            .post(self.track_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Client(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let result: TrackResponse = response
                .json()
                .await
                .map_err(|e| Error::Client(format!("failed to parse response: {}", e)))?;
            Ok(result)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Client(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }

    /// Send several events, one request each
    ///
    /// A failed event does not stop the rest; results line up with `events`.
    pub async fn track_batch(&self, events: &[PendingEvent]) -> Vec<Result<TrackResponse>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            let result = self.send_track(event).await;
            if let Err(e) = &result {
                tracing::warn!(user_id = %event.user_id, error = %e, "Failed to track event");
            }
            results.push(result);
        }
        results
    }

    /// Fetch the app's stats at `granularity`
    pub async fn get_stats(&self, granularity: Granularity) -> Result<AnalyticsReport> {
        let response = self
            .http_client
            .get(self.stats_url(granularity))
            .send()
            .await
            .map_err(|e| Error::Client(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let stats: RemoteStats = response
                .json()
                .await
                .map_err(|e| Error::Client(format!("failed to parse response: {}", e)))?;
            stats.into_report(granularity)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Client(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

/// Blocking wrapper around [`AnalyticsClient`] for the CLI
pub struct BlockingAnalyticsClient {
    inner: AnalyticsClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingAnalyticsClient {
    /// Create a new blocking client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Client(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            inner: AnalyticsClient::new(config)?,
            runtime,
        })
    }

    pub fn app_id(&self) -> &str {
        self.inner.app_id()
    }

    /// Record one event (blocking)
    pub fn track(
        &self,
        user_id: &str,
        endpoint: Option<&str>,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<TrackResponse> {
        self.runtime
            .block_on(self.inner.track(user_id, endpoint, metadata))
    }

    /// Send several events (blocking)
    pub fn track_batch(&self, events: &[PendingEvent]) -> Vec<Result<TrackResponse>> {
        self.runtime.block_on(self.inner.track_batch(events))
    }

    /// Fetch stats (blocking)
    pub fn get_stats(&self, granularity: Granularity) -> Result<AnalyticsReport> {
        self.runtime.block_on(self.inner.get_stats(granularity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            api_url: Some("https://analytics.example.com/".to_string()),
            app_id: Some("geo game".to_string()),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_new_requires_valid_config() {
        let result = AnalyticsClient::new(&ClientConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_urls() {
        let client = AnalyticsClient::new(&config()).unwrap();
        assert_eq!(
            client.track_url(),
            "https://analytics.example.com/api/analytics"
        );
        assert_eq!(
            client.stats_url(Granularity::Weekly),
            "https://analytics.example.com/api/analytics?appId=geo%20game&timeRange=weekly"
        );
    }

    #[test]
    fn test_track_body_wire_format() {
        let client = AnalyticsClient::new(&config()).unwrap();
        let body = client.track_body(&PendingEvent {
            user_id: "u1".to_string(),
            endpoint: Some("/game/start".to_string()),
            metadata: None,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "appId": "geo game",
                "userId": "u1",
                "endpoint": "/game/start",
            })
        );
    }

    #[test]
    fn test_remote_stats_from_raw_events() {
        let stats: RemoteStats = serde_json::from_str(
            r#"{
                "uniqueUsers": 2,
                "totalRequests": 3,
                "requests": [
                    {"userId": "a", "timestamp": "2024-06-03T10:00:00.000Z"},
                    {"userId": "b", "timestamp": "2024-06-03T12:00:00.000Z"},
                    {"userId": "a", "timestamp": "2024-06-04T09:00:00.000Z"}
                ]
            }"#,
        )
        .unwrap();

        let report = stats.into_report(Granularity::Daily).unwrap();
        assert_eq!(report.unique_users, 2);
        assert_eq!(
            report.series.points(),
            &[
                AggregatedPoint {
                    date: "2024-06-03".to_string(),
                    users: 2,
                    requests: 2
                },
                AggregatedPoint {
                    date: "2024-06-04".to_string(),
                    users: 1,
                    requests: 1
                },
            ]
        );
    }

    #[test]
    fn test_remote_stats_prefers_precomputed_series() {
        let stats: RemoteStats = serde_json::from_str(
            r#"{
                "uniqueUsers": 1,
                "totalRequests": 4,
                "monthlyData": [{"date": "2024-06", "users": 1, "requests": 4}]
            }"#,
        )
        .unwrap();

        let report = stats.into_report(Granularity::Monthly).unwrap();
        assert_eq!(report.series.points()[0].requests, 4);
        assert_eq!(report.series.granularity(), Granularity::Monthly);
    }
}
