//! Baseline capture and delta computation

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Baseline, BaselineMetric, Delta, LimitRecord, RawLimitMap, Thresholds, Trend};
use crate::platform::LimitSource;

use super::classifier::classify_only;

/// Metrics tracked across a deployment; a subset of the monitored limits
pub const BASELINE_LIMITS: &[&str] = &[
    "DailyApiRequests",
    "DailyAsyncApexExecutions",
    "DataStorageMB",
    "FileStorageMB",
];

/// Captures baselines and computes deltas against them
#[derive(Debug, Clone)]
pub struct BaselineTracker {
    thresholds: Thresholds,
}

impl BaselineTracker {
    /// Create a tracker that classifies with the given thresholds
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Classify raw limits, keeping only the delta-tracked metrics
    pub fn tracked(&self, raw: &RawLimitMap) -> Vec<LimitRecord> {
        classify_only(raw, &self.thresholds, BASELINE_LIMITS)
    }

    /// Snapshot the delta-tracked subset of `metrics`
    pub fn capture(&self, metrics: &[LimitRecord], context: serde_json::Value) -> Baseline {
        let metrics: BTreeMap<String, BaselineMetric> = metrics
            .iter()
            .filter(|m| BASELINE_LIMITS.contains(&m.name.as_str()))
            .map(|m| (m.name.clone(), BaselineMetric::from(m)))
            .collect();

        debug!(metrics = metrics.len(), "Baseline captured");

        Baseline {
            captured_at: Utc::now(),
            metrics,
            context,
        }
    }

    /// Fetch current limits and snapshot them.
    ///
    /// Capture is all-or-nothing: on a failed fetch no baseline is produced and
    /// the caller keeps whatever it had.
    pub async fn capture_from(
        &self,
        source: &dyn LimitSource,
        context: serde_json::Value,
    ) -> Result<Baseline> {
        let raw = source.fetch_raw_limits().await.map_err(|e| match e {
            Error::TransientFetch(_) => e,
            other => Error::transient(format!("baseline capture: {other}")),
        })?;

        Ok(self.capture(&self.tracked(&raw), context))
    }

    /// Deltas for every current metric that also appears in the baseline
    pub fn delta(&self, baseline: &Baseline, current: &[LimitRecord]) -> BTreeMap<String, Delta> {
        current
            .iter()
            .filter_map(|record| {
                let base = baseline.metric(&record.name)?;
                let used_delta = record.used.saturating_sub(base.used);
                Some((
                    record.name.clone(),
                    Delta {
                        used_delta,
                        percentage_delta: record.percentage - base.percentage,
                        trend: Trend::from_delta(used_delta),
                    },
                ))
            })
            .collect()
    }
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LimitStatus, RawLimit};
    use crate::platform::testing::StaticLimitSource;

    fn record(name: &str, used: i64, max: i64) -> LimitRecord {
        LimitRecord {
            name: name.to_string(),
            used,
            max,
            remaining: Some(max - used),
            percentage: used as f64 / max as f64 * 100.0,
            status: LimitStatus::Ok,
        }
    }

    #[test]
    fn test_capture_keeps_only_tracked_metrics() {
        let tracker = BaselineTracker::default();
        let baseline = tracker.capture(
            &[
                record("DailyApiRequests", 100, 1000),
                record("MassEmail", 10, 100),
            ],
            serde_json::Value::Null,
        );

        assert!(baseline.metric("DailyApiRequests").is_some());
        assert!(baseline.metric("MassEmail").is_none());
    }

    #[test]
    fn test_delta_increasing() {
        let tracker = BaselineTracker::default();
        let baseline = tracker.capture(
            &[record("DailyApiRequests", 100, 1000)],
            serde_json::Value::Null,
        );

        let deltas = tracker.delta(&baseline, &[record("DailyApiRequests", 150, 1000)]);

        let delta = deltas["DailyApiRequests"];
        assert_eq!(delta.used_delta, 50);
        assert_eq!(delta.trend, Trend::Increasing);
        assert!((delta.percentage_delta - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_delta_saturates_on_extreme_usage() {
        let tracker = BaselineTracker::default();
        let mut low = record("DailyApiRequests", 0, 1000);
        low.used = i64::MIN;
        let baseline = tracker.capture(&[low], serde_json::Value::Null);

        let mut high = record("DailyApiRequests", 0, 1000);
        high.used = i64::MAX;
        let deltas = tracker.delta(&baseline, &[high]);

        assert_eq!(deltas["DailyApiRequests"].used_delta, i64::MAX);
        assert_eq!(deltas["DailyApiRequests"].trend, Trend::Increasing);
    }

    #[test]
    fn test_delta_decreasing_and_stable() {
        let tracker = BaselineTracker::default();
        let baseline = tracker.capture(
            &[
                record("DataStorageMB", 500, 1000),
                record("FileStorageMB", 20, 100),
            ],
            serde_json::Value::Null,
        );

        let deltas = tracker.delta(
            &baseline,
            &[
                record("DataStorageMB", 400, 1000),
                record("FileStorageMB", 20, 100),
            ],
        );

        assert_eq!(deltas["DataStorageMB"].trend, Trend::Decreasing);
        assert_eq!(deltas["DataStorageMB"].used_delta, -100);
        assert_eq!(deltas["FileStorageMB"].trend, Trend::Stable);
    }

    #[test]
    fn test_delta_omits_metrics_missing_from_baseline() {
        let tracker = BaselineTracker::default();
        let baseline = tracker.capture(
            &[record("DailyApiRequests", 100, 1000)],
            serde_json::Value::Null,
        );

        let deltas = tracker.delta(&baseline, &[record("DataStorageMB", 10, 100)]);

        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_capture_from_source() {
        let source = StaticLimitSource::new(
            [
                ("DailyApiRequests", RawLimit::new(1000, 900)),
                ("SingleEmail", RawLimit::new(10, 5)),
            ]
            .into_iter()
            .collect(),
        );

        let baseline = BaselineTracker::default()
            .capture_from(&source, serde_json::json!({"org": "dev"}))
            .await
            .unwrap();

        assert_eq!(baseline.metrics.len(), 1);
        assert_eq!(baseline.metric("DailyApiRequests").unwrap().used, 100);
        assert_eq!(baseline.context["org"], "dev");
    }

    #[tokio::test]
    async fn test_capture_from_failing_source_is_tagged() {
        let source = StaticLimitSource::failing("session expired");

        let err = BaselineTracker::default()
            .capture_from(&source, serde_json::Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransientFetch(_)));
    }
}
