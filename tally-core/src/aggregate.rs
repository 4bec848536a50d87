//! Time-series aggregation of usage events.
//!
//! Events are grouped into daily, weekly (Monday start) or monthly buckets
//! in UTC and each bucket is reduced to its distinct-user and event counts.
//! Keys are zero-padded ISO dates, so lexicographic order is chronological.

use crate::error::Result;
use crate::types::{AggregatedPoint, Event, Granularity};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Headline numbers for a set of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub unique_users: u64,
    pub total_requests: u64,
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_sunday() as i64;
    date - Duration::days((weekday + 6) % 7)
}

/// Bucket key for a timestamp at the given granularity.
pub fn bucket_key(at: DateTime<Utc>, granularity: Granularity) -> String {
    let date = at.date_naive();
    match granularity {
        Granularity::Daily => date.format("%Y-%m-%d").to_string(),
        Granularity::Weekly => week_start(date).format("%Y-%m-%d").to_string(),
        Granularity::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// Group events into buckets and count users and requests per bucket.
///
/// Fails on the first event whose timestamp does not parse; no partial
/// series is returned.
pub fn aggregate(events: &[Event], granularity: Granularity) -> Result<Vec<AggregatedPoint>> {
    let mut buckets: BTreeMap<String, (HashSet<&str>, u64)> = BTreeMap::new();

    for event in events {
        let key = bucket_key(event.recorded_at()?, granularity);
        let (users, requests) = buckets.entry(key).or_default();
        users.insert(event.user_id.as_str());
        *requests += 1;
    }

    Ok(buckets
        .into_iter()
        .map(|(date, (users, requests))| AggregatedPoint {
            date,
            users: users.len() as u64,
            requests,
        })
        .collect())
}

/// Distinct users and total events.
pub fn summarize(events: &[Event]) -> Summary {
    let users: HashSet<&str> = events.iter().map(|e| e.user_id.as_str()).collect();
    Summary {
        unique_users: users.len() as u64,
        total_requests: events.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::TimeZone;

    fn event(user: &str, ts: &str) -> Event {
        Event {
            user_id: user.to_string(),
            timestamp: ts.to_string(),
            endpoint: None,
            metadata: None,
        }
    }

    fn point(date: &str, users: u64, requests: u64) -> AggregatedPoint {
        AggregatedPoint {
            date: date.to_string(),
            users,
            requests,
        }
    }

    #[test]
    fn test_daily_scenario() {
        let events = vec![
            event("a", "2024-06-03T10:00:00Z"),
            event("b", "2024-06-03T12:00:00Z"),
            event("a", "2024-06-04T09:00:00Z"),
        ];
        let series = aggregate(&events, Granularity::Daily).unwrap();
        assert_eq!(
            series,
            vec![point("2024-06-03", 2, 2), point("2024-06-04", 1, 1)]
        );
    }

    #[test]
    fn test_empty_input() {
        for g in [Granularity::Daily, Granularity::Weekly, Granularity::Monthly] {
            assert!(aggregate(&[], g).unwrap().is_empty());
        }
    }

    #[test]
    fn test_week_starts_monday() {
        // 2024-06-02 is a Sunday, 2024-06-03 a Monday, 2024-06-09 a Sunday.
        let sunday = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let next_sunday = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();

        assert_eq!(week_start(sunday), NaiveDate::from_ymd_opt(2024, 5, 27).unwrap());
        assert_eq!(week_start(monday), monday);
        assert_eq!(week_start(next_sunday), monday);
    }

    #[test]
    fn test_weekly_spans_month_boundary() {
        // Mon 2024-04-29 .. Sun 2024-05-05 is one week.
        let events = vec![
            event("a", "2024-04-29T08:00:00Z"),
            event("b", "2024-05-05T23:59:59Z"),
            event("a", "2024-05-06T00:00:00Z"),
        ];
        let series = aggregate(&events, Granularity::Weekly).unwrap();
        assert_eq!(
            series,
            vec![point("2024-04-29", 2, 2), point("2024-05-06", 1, 1)]
        );
    }

    #[test]
    fn test_monthly_boundary_instant() {
        let events = vec![
            event("a", "2024-02-29T23:59:59.999Z"),
            event("a", "2024-03-01T00:00:00Z"),
        ];
        let series = aggregate(&events, Granularity::Monthly).unwrap();
        assert_eq!(series, vec![point("2024-02", 1, 1), point("2024-03", 1, 1)]);
    }

    #[test]
    fn test_buckets_in_utc() {
        // 01:30 at +03:00 is the previous UTC day.
        let events = vec![event("a", "2024-06-04T01:30:00+03:00")];
        let series = aggregate(&events, Granularity::Daily).unwrap();
        assert_eq!(series, vec![point("2024-06-03", 1, 1)]);
    }

    #[test]
    fn test_repeated_user_counts_once() {
        let events: Vec<Event> = (0..5)
            .map(|i| event("same", &format!("2024-06-03T0{}:00:00Z", i)))
            .collect();
        let series = aggregate(&events, Granularity::Daily).unwrap();
        assert_eq!(series, vec![point("2024-06-03", 1, 5)]);
    }

    #[test]
    fn test_order_independent_and_sums_match() {
        let mut events = Vec::new();
        for day in 1..=28u32 {
            for (i, user) in ["a", "b", "c"].iter().enumerate() {
                if (day as usize + i) % 2 == 0 {
                    let at = Utc.with_ymd_and_hms(2024, 2, day, 6 * i as u32, 0, 0).unwrap();
                    events.push(Event::new(*user, at));
                }
            }
        }
        let mut reversed = events.clone();
        reversed.reverse();

        for g in [Granularity::Daily, Granularity::Weekly, Granularity::Monthly] {
            let forward = aggregate(&events, g).unwrap();
            assert_eq!(forward, aggregate(&reversed, g).unwrap());
            assert_eq!(forward, aggregate(&events, g).unwrap());

            let total: u64 = forward.iter().map(|p| p.requests).sum();
            assert_eq!(total, events.len() as u64);
            assert!(forward.windows(2).all(|w| w[0].date < w[1].date));
        }
    }

    #[test]
    fn test_malformed_timestamp_fails_whole_call() {
        let events = vec![
            event("a", "2024-06-03T10:00:00Z"),
            event("b", "Invalid Date"),
        ];
        match aggregate(&events, Granularity::Daily) {
            Err(Error::MalformedEvent { value, .. }) => assert_eq!(value, "Invalid Date"),
            other => panic!("expected MalformedEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_summarize() {
        let events = vec![
            event("a", "2024-06-03T10:00:00Z"),
            event("b", "2024-06-03T12:00:00Z"),
            event("a", "2024-07-04T09:00:00Z"),
        ];
        assert_eq!(
            summarize(&events),
            Summary {
                unique_users: 2,
                total_requests: 3
            }
        );
        assert_eq!(summarize(&[]), Summary::default());
    }
}
