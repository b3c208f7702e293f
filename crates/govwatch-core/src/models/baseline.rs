//! Baseline snapshots and deltas

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::limit::LimitRecord;

/// The subset of a limit record kept in a baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetric {
    /// Amount consumed when captured
    pub used: i64,
    /// Ceiling when captured
    pub max: i64,
    /// Amount left when captured
    pub remaining: Option<i64>,
    /// Usage percentage when captured
    pub percentage: f64,
}

impl From<&LimitRecord> for BaselineMetric {
    fn from(record: &LimitRecord) -> Self {
        Self {
            used: record.used,
            max: record.max,
            remaining: record.remaining,
            percentage: record.percentage,
        }
    }
}

/// Point-in-time snapshot of the delta-tracked metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
    /// Metric name to captured values
    pub metrics: BTreeMap<String, BaselineMetric>,
    /// Caller supplied context (org label, deployment command, ...)
    pub context: serde_json::Value,
}

impl Baseline {
    /// Captured values for a metric
    pub fn metric(&self, name: &str) -> Option<&BaselineMetric> {
        self.metrics.get(name)
    }
}

/// Direction of change relative to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Usage went down
    Decreasing,
    /// Usage is unchanged
    Stable,
    /// Usage went up
    Increasing,
}

impl Trend {
    /// Trend for a change in used amount
    pub fn from_delta(used_delta: i64) -> Self {
        match used_delta.signum() {
            1 => Self::Increasing,
            -1 => Self::Decreasing,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decreasing => write!(f, "decreasing"),
            Self::Stable => write!(f, "stable"),
            Self::Increasing => write!(f, "increasing"),
        }
    }
}

/// Change of one metric since the baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Current `used` minus baseline `used`
    pub used_delta: i64,
    /// Percentage points gained or lost
    pub percentage_delta: f64,
    /// Direction of `used_delta`
    pub trend: Trend,
}
