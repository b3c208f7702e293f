//! Alert fatigue suppression
//!
//! Remembers when each (channel, subject, severity) was last notified and
//! suppresses repeats inside the cooldown window. State lives as long as the
//! tracker; nothing is persisted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::{LimitRecord, Severity};

/// Identity of a notification for cooldown purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    /// Channel name
    pub channel: String,
    /// What the alert is about, e.g. a limit name
    pub subject: String,
    /// Alert severity
    pub severity: Severity,
}

impl CooldownKey {
    /// Create a key
    pub fn new(channel: impl Into<String>, subject: impl Into<String>, severity: Severity) -> Self {
        Self {
            channel: channel.into(),
            subject: subject.into(),
            severity,
        }
    }
}

/// Proof that a notification was let through; hand back to [`CooldownTracker::rollback`]
/// if delivery fails
#[derive(Debug)]
#[must_use]
pub struct Permit {
    previous: Option<DateTime<Utc>>,
}

/// Permits taken by [`CooldownTracker::filter_limits`]
#[derive(Debug, Default)]
#[must_use]
pub struct Reservation {
    entries: Vec<(CooldownKey, Permit)>,
}

impl Reservation {
    /// Number of keys reserved
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was reserved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-key last-notified timestamps
#[derive(Debug)]
pub struct CooldownTracker {
    critical: Duration,
    warning: Duration,
    last_notified: Mutex<HashMap<CooldownKey, DateTime<Utc>>>,
}

impl CooldownTracker {
    /// Create a tracker with the given windows
    pub fn new(critical: Duration, warning: Duration) -> Self {
        Self {
            critical,
            warning,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Cooldown window for a severity; info shares the warning window
    pub fn window(&self, severity: Severity) -> Duration {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning | Severity::Info => self.warning,
        }
    }

    /// Whether a notification for `key` at `now` is outside the cooldown window
    pub fn should_notify(&self, key: &CooldownKey, now: DateTime<Utc>) -> bool {
        let last = self.last_notified.lock().get(key).copied();
        self.elapsed(key.severity, last, now)
    }

    fn elapsed(&self, severity: Severity, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            None => true,
            // A negative gap (out of order timestamps) counts as inside the window
            Some(last) => (now - last)
                .to_std()
                .map(|gap| gap >= self.window(severity))
                .unwrap_or(false),
        }
    }

    /// Check and record in one step
    pub fn acquire(&self, key: &CooldownKey, now: DateTime<Utc>) -> Option<Permit> {
        let mut last_notified = self.last_notified.lock();
        let previous = last_notified.get(key).copied();
        if !self.elapsed(key.severity, previous, now) {
            return None;
        }
        last_notified.insert(key.clone(), now);
        Some(Permit { previous })
    }

    /// Undo an [`acquire`](Self::acquire) after a failed delivery
    pub fn rollback(&self, key: &CooldownKey, permit: Permit) {
        let mut last_notified = self.last_notified.lock();
        match permit.previous {
            Some(previous) => {
                last_notified.insert(key.clone(), previous);
            }
            None => {
                last_notified.remove(key);
            }
        }
    }

    /// Keep the limits of `channel` that are outside their cooldown window,
    /// reserving each one. The subject of a limit is its name.
    pub fn filter_limits(
        &self,
        channel: &str,
        limits: &[LimitRecord],
        now: DateTime<Utc>,
    ) -> (Vec<LimitRecord>, Reservation) {
        let mut fresh = Vec::new();
        let mut reservation = Reservation::default();

        for limit in limits {
            let key = CooldownKey::new(channel, &limit.name, limit.status.severity());
            if let Some(permit) = self.acquire(&key, now) {
                fresh.push(limit.clone());
                reservation.entries.push((key, permit));
            }
        }
        (fresh, reservation)
    }

    /// Roll back every permit of a reservation
    pub fn release(&self, reservation: Reservation) {
        for (key, permit) in reservation.entries.into_iter().rev() {
            self.rollback(&key, permit);
        }
    }

    /// Record a notification unconditionally
    pub fn record(&self, key: CooldownKey, now: DateTime<Utc>) {
        self.last_notified.lock().insert(key, now);
    }

    /// Forget all suppression state
    pub fn clear(&self) {
        self.last_notified.lock().clear();
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.last_notified.lock().len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
