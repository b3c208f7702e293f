//! Governor limit data models

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::alert::Severity;

/// One raw counter as returned by the limits API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLimit {
    /// Ceiling for the period; `None` means the limit does not apply to this org
    #[serde(rename = "Max", default)]
    pub max: Option<i64>,

    /// Amount left in the period
    #[serde(rename = "Remaining", default)]
    pub remaining: Option<i64>,
}

impl RawLimit {
    /// Create a raw limit with both counters present
    pub fn new(max: i64, remaining: i64) -> Self {
        Self {
            max: Some(max),
            remaining: Some(remaining),
        }
    }
}

/// Limit name to raw counters, in the order the API returned them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLimitMap {
    entries: Vec<(String, RawLimit)>,
}

impl RawLimitMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, keeping the position of an existing key
    pub fn insert(&mut self, name: impl Into<String>, limit: RawLimit) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = limit,
            None => self.entries.push((name, limit)),
        }
    }

    /// Look up a limit by name
    pub fn get(&self, name: &str) -> Option<&RawLimit> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, limit)| limit)
    }

    /// Iterate entries in input order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawLimit)> {
        self.entries.iter().map(|(n, l)| (n.as_str(), l))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, RawLimit)> for RawLimitMap {
    fn from_iter<I: IntoIterator<Item = (S, RawLimit)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, limit) in iter {
            map.insert(name, limit);
        }
        map
    }
}

impl<'de> Deserialize<'de> for RawLimitMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RawLimitMapVisitor;

        impl<'de> Visitor<'de> for RawLimitMapVisitor {
            type Value = RawLimitMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of limit names to {Max, Remaining}")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = RawLimitMap::new();
                while let Some((name, limit)) = access.next_entry::<String, RawLimit>()? {
                    map.insert(name, limit);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(RawLimitMapVisitor)
    }
}

/// Classification of a limit against the thresholds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitStatus {
    /// Below the warning threshold
    #[default]
    Ok,
    /// At or above the warning threshold
    Warning,
    /// At or above the critical threshold
    Critical,
}

impl LimitStatus {
    /// Classify a usage percentage
    pub fn from_percentage(percentage: f64, thresholds: &Thresholds) -> Self {
        if percentage >= thresholds.critical {
            Self::Critical
        } else if percentage >= thresholds.warning {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    /// Alert severity for this status
    pub fn severity(self) -> Severity {
        match self {
            Self::Ok => Severity::Info,
            Self::Warning => Severity::Warning,
            Self::Critical => Severity::Critical,
        }
    }

    /// Whether this status should raise an alert
    pub fn is_alert(self) -> bool {
        self != Self::Ok
    }
}

impl fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Warning and critical percentages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Warning threshold in percent
    pub warning: f64,
    /// Critical threshold in percent
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 80.0,
            critical: 95.0,
        }
    }
}

impl Thresholds {
    /// Build thresholds, rejecting values outside 0..=100 or `warning > critical`
    pub fn new(warning: f64, critical: f64) -> crate::error::Result<Self> {
        let thresholds = Self { warning, critical };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Validate threshold ranges and ordering
    pub fn validate(&self) -> crate::error::Result<()> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.warning) || !in_range(self.critical) {
            return Err(crate::error::Error::config(format!(
                "thresholds must be within 0..=100 (warning={}, critical={})",
                self.warning, self.critical
            )));
        }
        if self.warning > self.critical {
            return Err(crate::error::Error::config(format!(
                "warning threshold {} exceeds critical threshold {}",
                self.warning, self.critical
            )));
        }
        Ok(())
    }
}

/// A normalized, classified limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRecord {
    /// API name of the limit (e.g. `DailyApiRequests`)
    pub name: String,
    /// Amount consumed in the current period
    pub used: i64,
    /// Ceiling for the period
    pub max: i64,
    /// Amount left, if reported
    pub remaining: Option<i64>,
    /// Usage percentage rounded to two decimals
    pub percentage: f64,
    /// Status against the thresholds in effect when classified
    pub status: LimitStatus,
}

impl LimitRecord {
    /// Human readable name (`DailyApiRequests` -> `Daily Api Requests`)
    pub fn display_name(&self) -> String {
        crate::monitor::format_limit_name(&self.name)
    }
}
