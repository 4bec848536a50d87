//! Query responses: headline numbers plus one chart series.
//!
//! Serialized as
//! `{ "uniqueUsers", "totalRequests", "dailyData" | "weeklyData" | "monthlyData" }`.

use crate::aggregate::{aggregate, summarize};
use crate::error::Result;
use crate::period::DateRange;
use crate::types::{AggregatedPoint, Event, Granularity};
use serde::{Deserialize, Serialize};

/// Chart series keyed by granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Series {
    #[serde(rename = "dailyData")]
    Daily(Vec<AggregatedPoint>),
    #[serde(rename = "weeklyData")]
    Weekly(Vec<AggregatedPoint>),
    #[serde(rename = "monthlyData")]
    Monthly(Vec<AggregatedPoint>),
}

impl Series {
    pub fn new(granularity: Granularity, points: Vec<AggregatedPoint>) -> Self {
        match granularity {
            Granularity::Daily => Series::Daily(points),
            Granularity::Weekly => Series::Weekly(points),
            Granularity::Monthly => Series::Monthly(points),
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Series::Daily(_) => Granularity::Daily,
            Series::Weekly(_) => Granularity::Weekly,
            Series::Monthly(_) => Granularity::Monthly,
        }
    }

    pub fn points(&self) -> &[AggregatedPoint] {
        match self {
            Series::Daily(p) | Series::Weekly(p) | Series::Monthly(p) => p,
        }
    }
}

/// Response to an analytics query for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub unique_users: u64,
    pub total_requests: u64,
    #[serde(flatten)]
    pub series: Series,
}

impl AnalyticsReport {
    /// Report with no data.
    pub fn empty(granularity: Granularity) -> Self {
        Self {
            unique_users: 0,
            total_requests: 0,
            series: Series::new(granularity, Vec::new()),
        }
    }
}

/// Keep only the events inside `range`.
pub fn filter_events(events: &[Event], range: &DateRange) -> Result<Vec<Event>> {
    let mut kept = Vec::with_capacity(events.len());
    for event in events {
        if range.contains(event.recorded_at()?) {
            kept.push(event.clone());
        }
    }
    Ok(kept)
}

/// Build the report for `events` restricted to `range`.
pub fn build_report(
    events: &[Event],
    granularity: Granularity,
    range: &DateRange,
) -> Result<AnalyticsReport> {
    let filtered;
    let events = if range.is_unbounded() {
        events
    } else {
        filtered = filter_events(events, range)?;
        &filtered
    };

    let summary = summarize(events);
    let points = aggregate(events, granularity)?;

    Ok(AnalyticsReport {
        unique_users: summary.unique_users,
        total_requests: summary.total_requests,
        series: Series::new(granularity, points),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(user: &str, ts: &str) -> Event {
        Event {
            user_id: user.to_string(),
            timestamp: ts.to_string(),
            endpoint: None,
            metadata: None,
        }
    }

    fn sample() -> Vec<Event> {
        vec![
            event("a", "2024-06-03T10:00:00Z"),
            event("b", "2024-06-03T12:00:00Z"),
            event("a", "2024-06-04T09:00:00Z"),
            event("c", "2024-06-20T09:00:00Z"),
        ]
    }

    #[test]
    fn test_report_json_shape() {
        let report = build_report(&sample(), Granularity::Monthly, &DateRange::all()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["uniqueUsers"], 3);
        assert_eq!(json["totalRequests"], 4);
        assert_eq!(json["monthlyData"][0]["date"], "2024-06");
        assert_eq!(json["monthlyData"][0]["users"], 3);
        assert_eq!(json["monthlyData"][0]["requests"], 4);
        assert!(json.get("dailyData").is_none());
    }

    #[test]
    fn test_report_round_trips_through_json() {
        let report = build_report(&sample(), Granularity::Weekly, &DateRange::all()).unwrap();
        let text = serde_json::to_string(&report).unwrap();
        let parsed: AnalyticsReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, report);
        assert_eq!(parsed.series.granularity(), Granularity::Weekly);
    }

    #[test]
    fn test_range_applied_before_aggregation() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 6, 4),
            NaiveDate::from_ymd_opt(2024, 6, 30),
        )
        .unwrap();
        let report = build_report(&sample(), Granularity::Daily, &range).unwrap();

        assert_eq!(report.total_requests, 2);
        assert_eq!(report.unique_users, 2);
        let dates: Vec<&str> = report.series.points().iter().map(|p| p.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-06-04", "2024-06-20"]);
    }

    #[test]
    fn test_empty_report() {
        let report = build_report(&[], Granularity::Daily, &DateRange::all()).unwrap();
        assert_eq!(report, AnalyticsReport::empty(Granularity::Daily));
    }
}
