//! Limit classification
//!
//! Turns the raw `{Max, Remaining}` counters into thresholded [`LimitRecord`]s.

use crate::models::{LimitRecord, LimitStatus, RawLimitMap, Thresholds};

/// Limits reported by the classifier
pub const MONITORED_LIMITS: &[&str] = &[
    "DailyApiRequests",
    "DailyAsyncApexExecutions",
    "DailyBulkApiRequests",
    "DailyScratchOrgs",
    "DailyStreamingApiEvents",
    "DailyWorkflowEmails",
    "DataStorageMB",
    "FileStorageMB",
    "HourlyAsyncReportRuns",
    "HourlyDashboardRefreshes",
    "HourlyDashboardResults",
    "HourlyDashboardStatuses",
    "HourlyODataCallout",
    "HourlySyncReportRuns",
    "HourlyTimeBasedWorkflow",
    "MassEmail",
    "MonthlyPlatformEventsUsedMB",
    "SingleEmail",
    "StreamingApiConcurrentClients",
];

/// Classify raw limits against the thresholds.
///
/// Only names in [`MONITORED_LIMITS`] are kept, entries without a `Max` are
/// dropped, and the result is sorted by percentage, highest first. Equal
/// percentages keep their input order.
pub fn classify(raw: &RawLimitMap, thresholds: &Thresholds) -> Vec<LimitRecord> {
    classify_only(raw, thresholds, MONITORED_LIMITS)
}

/// Same as [`classify`] with a caller supplied allow-list
pub fn classify_only(
    raw: &RawLimitMap,
    thresholds: &Thresholds,
    allow: &[&str],
) -> Vec<LimitRecord> {
    let mut records: Vec<LimitRecord> = raw
        .iter()
        .filter(|(name, _)| allow.contains(name))
        .filter_map(|(name, limit)| {
            let max = limit.max?;
            Some(classify_one(name, max, limit.remaining, thresholds))
        })
        .collect();

    // sort_by is stable
    records.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));
    records
}

fn classify_one(
    name: &str,
    max: i64,
    remaining: Option<i64>,
    thresholds: &Thresholds,
) -> LimitRecord {
    // Untrusted input: saturate rather than overflow
    let used = remaining.map_or(0, |remaining| max.saturating_sub(remaining));

    // Only the percentage is bounded; `used` keeps `max - remaining`
    let percentage = if max > 0 {
        (used as f64 / max as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    LimitRecord {
        name: name.to_string(),
        used,
        max,
        remaining,
        percentage: round2(percentage),
        status: LimitStatus::from_percentage(percentage, thresholds),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Split a camel-case limit name into words (`DailyApiRequests` -> `Daily Api Requests`)
pub fn format_limit_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        if c.is_ascii_uppercase() && !out.is_empty() {
            out.push(' ');
        }
        out.push(c);
    }

    let mut chars = out.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawLimit;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn raw(entries: &[(&str, Option<i64>, Option<i64>)]) -> RawLimitMap {
        entries
            .iter()
            .map(|(name, max, remaining)| {
                (
                    *name,
                    RawLimit {
                        max: *max,
                        remaining: *remaining,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_daily_api_requests_warning() {
        let map = raw(&[("DailyApiRequests", Some(100_000), Some(15_000))]);

        let records = classify(&map, &Thresholds::default());

        assert_eq!(
            records,
            vec![LimitRecord {
                name: "DailyApiRequests".to_string(),
                used: 85_000,
                max: 100_000,
                remaining: Some(15_000),
                percentage: 85.0,
                status: LimitStatus::Warning,
            }]
        );
    }

    #[test]
    fn test_used_follows_remaining_outside_range() {
        let map = raw(&[
            ("DailyApiRequests", Some(100), Some(-20)),
            ("DataStorageMB", Some(100), Some(150)),
            ("FileStorageMB", Some(i64::MAX), Some(-1)),
        ]);

        let records = classify(&map, &Thresholds::default());
        let by_name = |name: &str| records.iter().find(|r| r.name == name).unwrap();

        assert_eq!(by_name("DailyApiRequests").used, 120);
        assert_eq!(by_name("DailyApiRequests").percentage, 100.0);
        assert_eq!(by_name("DailyApiRequests").status, LimitStatus::Critical);
        assert_eq!(by_name("DataStorageMB").used, -50);
        assert_eq!(by_name("DataStorageMB").percentage, 0.0);
        assert_eq!(by_name("FileStorageMB").used, i64::MAX);
        assert_eq!(by_name("FileStorageMB").percentage, 100.0);
    }

    #[test]
    fn test_null_max_is_excluded() {
        let map = raw(&[
            ("DailyApiRequests", None, Some(10)),
            ("DataStorageMB", Some(1000), Some(900)),
        ]);

        let records = classify(&map, &Thresholds::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "DataStorageMB");
    }

    #[test]
    fn test_unlisted_limits_are_ignored() {
        let map = raw(&[("ConcurrentAsyncGetReportInstances", Some(200), Some(0))]);
        assert!(classify(&map, &Thresholds::default()).is_empty());
    }

    #[test]
    fn test_missing_remaining_counts_as_unused() {
        let map = raw(&[("MassEmail", Some(5000), None)]);

        let records = classify(&map, &Thresholds::default());

        assert_eq!(records[0].used, 0);
        assert_eq!(records[0].percentage, 0.0);
        assert_eq!(records[0].status, LimitStatus::Ok);
    }

    #[test]
    fn test_zero_max_does_not_divide() {
        let map = raw(&[("DailyScratchOrgs", Some(0), Some(0))]);

        let records = classify(&map, &Thresholds::default());

        assert_eq!(records[0].percentage, 0.0);
        assert_eq!(records[0].status, LimitStatus::Ok);
    }

    #[test]
    fn test_sorted_descending_with_stable_ties() {
        let map = raw(&[
            ("MassEmail", Some(100), Some(50)),
            ("SingleEmail", Some(100), Some(10)),
            ("DataStorageMB", Some(200), Some(100)),
            ("FileStorageMB", Some(100), Some(99)),
        ]);

        let names: Vec<String> = classify(&map, &Thresholds::default())
            .into_iter()
            .map(|r| r.name)
            .collect();

        assert_eq!(
            names,
            vec!["SingleEmail", "MassEmail", "DataStorageMB", "FileStorageMB"]
        );
    }

    #[test]
    fn test_percentage_rounded_to_two_decimals() {
        let map = raw(&[("DailyBulkApiRequests", Some(3), Some(2))]);
        let records = classify(&map, &Thresholds::default());
        assert_eq!(records[0].percentage, 33.33);
    }

    #[test]
    fn test_critical_threshold() {
        let map = raw(&[("DailyApiRequests", Some(100), Some(5))]);
        let records = classify(&map, &Thresholds::default());
        assert_eq!(records[0].status, LimitStatus::Critical);
    }

    #[test]
    fn test_raw_map_deserializes_in_input_order() {
        let json = r#"{
            "SingleEmail": {"Max": 10, "Remaining": 10},
            "DailyApiRequests": {"Max": 100, "Remaining": 40, "Ant Migration Tool": {"Max": 0, "Remaining": 0}},
            "PermissionSets": {"Max": 1500, "Remaining": 1490, "CreateCustom": {"Max": 1000, "Remaining": 990}},
            "DataStorageMB": {"Remaining": 5}
        }"#;

        let map: RawLimitMap = serde_json::from_str(json).unwrap();
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();

        assert_eq!(
            names,
            vec!["SingleEmail", "DailyApiRequests", "PermissionSets", "DataStorageMB"]
        );
        assert_eq!(map.get("DataStorageMB").unwrap().max, None);
    }

    #[test]
    fn test_format_limit_name() {
        assert_eq!(format_limit_name("DailyApiRequests"), "Daily Api Requests");
        assert_eq!(format_limit_name("DataStorageMB"), "Data Storage M B");
        assert_eq!(format_limit_name("massEmail"), "Mass Email");
        assert_eq!(format_limit_name(""), "");
    }

    proptest! {
        #[test]
        fn prop_null_max_never_classified(remaining in proptest::option::of(-1000i64..100_000)) {
            let map = raw(&[("DailyApiRequests", None, remaining)]);
            prop_assert!(classify(&map, &Thresholds::default()).is_empty());
        }

        #[test]
        fn prop_percentage_within_bounds(max in 1i64..1_000_000, remaining in -1_000_000i64..2_000_000) {
            let map = raw(&[("DailyApiRequests", Some(max), Some(remaining))]);
            let record = &classify(&map, &Thresholds::default())[0];
            prop_assert!((0.0..=100.0).contains(&record.percentage));
        }

        #[test]
        fn prop_extreme_values_never_panic(max in any::<i64>(), remaining in proptest::option::of(any::<i64>())) {
            let map = raw(&[("DailyApiRequests", Some(max), remaining)]);
            let record = &classify(&map, &Thresholds::default())[0];
            prop_assert!((0.0..=100.0).contains(&record.percentage));
            if let Some(remaining) = remaining {
                prop_assert_eq!(record.used, max.saturating_sub(remaining));
            }
        }

        #[test]
        fn prop_status_is_monotonic(
            a in 0.0f64..=100.0,
            b in 0.0f64..=100.0,
            warning in 0.0f64..=100.0,
            spread in 0.0f64..=100.0,
        ) {
            let thresholds = Thresholds { warning, critical: (warning + spread).min(100.0) };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                LimitStatus::from_percentage(lo, &thresholds)
                    <= LimitStatus::from_percentage(hi, &thresholds)
            );
        }
    }
}
