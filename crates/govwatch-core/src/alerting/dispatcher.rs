//! Fan-out of alerts to the configured channels

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::AlertingConfig;
use crate::error::{Error, Result};
use crate::models::{AlertEvent, DeliveryOutcome, LimitRecord, NotificationRecord};

use super::cooldown::{CooldownKey, CooldownTracker};
use super::notifier::{build_notifiers, sample_alert, Notifier};

/// Cooldown subject for alerts that do not name one
const GLOBAL_SUBJECT: &str = "global";

/// Sends alerts to every channel concurrently.
///
/// A failing channel never affects the others and nothing is retried. Each
/// channel keeps its own cooldown state.
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    cooldown: CooldownTracker,
    enabled: bool,
    org: Option<String>,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("channels", &self.channel_names())
            .field("enabled", &self.enabled)
            .field("org", &self.org)
            .finish()
    }
}

impl AlertDispatcher {
    /// Create a dispatcher over existing notifiers
    pub fn new(channels: Vec<Arc<dyn Notifier>>, cooldown: CooldownTracker) -> Self {
        Self {
            channels,
            cooldown,
            enabled: true,
            org: None,
        }
    }

    /// Build the channels described by the alerting configuration
    pub fn from_config(config: &AlertingConfig, org: Option<String>) -> Result<Self> {
        config.validate()?;
        let channels = build_notifiers(&config.channels)?;
        info!(channels = channels.len(), enabled = config.enabled, "Alert dispatcher ready");

        Ok(Self {
            channels,
            cooldown: CooldownTracker::new(config.critical_cooldown, config.warning_cooldown),
            enabled: config.enabled,
            org,
        })
    }

    /// Turn dispatch on or off
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Org label attached to limit alerts
    pub fn with_org(mut self, org: Option<String>) -> Self {
        self.org = org;
        self
    }

    /// Whether alerts are sent at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Names of the configured channels
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Cooldown state
    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Deliver one event to every channel, skipping channels still cooling
    /// down for the event's subject and severity.
    pub async fn dispatch(&self, event: &AlertEvent) -> Vec<NotificationRecord> {
        if !self.enabled {
            debug!(alert_id = %event.id, "Alerting disabled, dropping event");
            return Vec::new();
        }

        let subject = event.subject_id.as_deref().unwrap_or(GLOBAL_SUBJECT);

        let sends = self.channels.iter().map(|channel| async move {
            let key = CooldownKey::new(channel.name(), subject, event.severity);
            let Some(permit) = self.cooldown.acquire(&key, event.timestamp) else {
                debug!(channel = channel.name(), subject, "Alert suppressed by cooldown");
                return record(channel.name(), DeliveryOutcome::Suppressed);
            };

            let outcome = deliver(channel.as_ref(), event).await;
            if !matches!(outcome, DeliveryOutcome::Delivered) {
                self.cooldown.rollback(&key, permit);
            }
            record(channel.name(), outcome)
        });

        join_all(sends).await
    }

    /// Alert on the WARNING and CRITICAL limits among `limits`.
    ///
    /// Cooldown applies per limit name, so each channel only receives the
    /// limits it has not been told about recently.
    pub async fn dispatch_limits(&self, limits: &[LimitRecord]) -> Vec<NotificationRecord> {
        let alerting: Vec<LimitRecord> = limits
            .iter()
            .filter(|l| l.status.is_alert())
            .cloned()
            .collect();

        if !self.enabled || alerting.is_empty() {
            return Vec::new();
        }

        let now = Utc::now();
        let sends = self.channels.iter().map(|channel| {
            let alerting = &alerting;
            async move {
                let (fresh, reservation) =
                    self.cooldown.filter_limits(channel.name(), alerting, now);
                if fresh.is_empty() {
                    debug!(channel = channel.name(), "All limits suppressed by cooldown");
                    return record(channel.name(), DeliveryOutcome::Suppressed);
                }

                let event = AlertEvent::from_limits(fresh)
                    .with_org(self.org.clone())
                    .at(now);
                let outcome = deliver(channel.as_ref(), &event).await;
                if !matches!(outcome, DeliveryOutcome::Delivered) {
                    self.cooldown.release(reservation);
                }
                record(channel.name(), outcome)
            }
        });

        join_all(sends).await
    }

    /// Send a sample alert to every channel, or only to channels of `kind`.
    /// Cooldown is bypassed.
    pub async fn test_channels(&self, kind: Option<&str>) -> Result<Vec<NotificationRecord>> {
        let targets: Vec<&Arc<dyn Notifier>> = self
            .channels
            .iter()
            .filter(|c| kind.map_or(true, |k| c.kind() == k))
            .collect();

        if let Some(kind) = kind {
            if targets.is_empty() {
                return Err(Error::config(format!("no '{kind}' channel is configured")));
            }
        }

        let event = sample_alert(self.org.clone());
        let sends = targets.into_iter().map(|channel| {
            let event = &event;
            async move { record(channel.name(), deliver(channel.as_ref(), event).await) }
        });

        Ok(join_all(sends).await)
    }
}

async fn deliver(channel: &dyn Notifier, event: &AlertEvent) -> DeliveryOutcome {
    match channel.send(event).await {
        Ok(()) => {
            debug!(channel = channel.name(), alert_id = %event.id, "Alert delivered");
            DeliveryOutcome::Delivered
        }
        Err(e @ Error::Config(_)) => {
            warn!(channel = channel.name(), error = %e, "Skipping misconfigured channel");
            DeliveryOutcome::Failed(e.to_string())
        }
        Err(e) => {
            warn!(channel = channel.name(), error = %e, "Failed to deliver alert");
            DeliveryOutcome::Failed(e.to_string())
        }
    }
}

fn record(channel: &str, outcome: DeliveryOutcome) -> NotificationRecord {
    NotificationRecord {
        channel: channel.to_string(),
        sent_at: Utc::now(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LimitStatus, Severity};
    use crate::platform::testing::RecordingNotifier;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn channels(list: Vec<Arc<RecordingNotifier>>) -> Vec<Arc<dyn Notifier>> {
        list.into_iter().map(|n| n as Arc<dyn Notifier>).collect()
    }

    fn cooldown() -> CooldownTracker {
        CooldownTracker::new(Duration::from_secs(300), Duration::from_secs(600))
    }

    fn limit(name: &str, percentage: f64, status: LimitStatus) -> LimitRecord {
        LimitRecord {
            name: name.to_string(),
            used: percentage as i64,
            max: 100,
            remaining: Some(100 - percentage as i64),
            percentage,
            status,
        }
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let good = Arc::new(RecordingNotifier::new("good"));
        let bad = Arc::new(RecordingNotifier::failing("bad"));
        let dispatcher =
            AlertDispatcher::new(channels(vec![bad.clone(), good.clone()]), cooldown());

        let event = AlertEvent::message(Severity::Critical, "limits exceeded").with_subject("prod");
        let records = dispatcher.dispatch(&event).await;

        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].outcome, DeliveryOutcome::Failed(_)));
        assert!(records[1].is_delivered());
        assert_eq!(good.received().len(), 1);
        assert_eq!(bad.received().len(), 1);
    }

    #[tokio::test]
    async fn test_critical_cooldown_boundary() {
        let channel = Arc::new(RecordingNotifier::new("slack"));
        let dispatcher = AlertDispatcher::new(channels(vec![channel.clone()]), cooldown());
        let t0 = Utc::now();

        let first = AlertEvent::message(Severity::Critical, "a").with_subject("org").at(t0);
        let early = AlertEvent::message(Severity::Critical, "b")
            .with_subject("org")
            .at(t0 + ChronoDuration::milliseconds(299_999));
        let late = AlertEvent::message(Severity::Critical, "c")
            .with_subject("org")
            .at(t0 + ChronoDuration::milliseconds(300_001));

        assert!(dispatcher.dispatch(&first).await[0].is_delivered());
        assert_eq!(
            dispatcher.dispatch(&early).await[0].outcome,
            DeliveryOutcome::Suppressed
        );
        assert!(dispatcher.dispatch(&late).await[0].is_delivered());
        assert_eq!(channel.received().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_start_cooldown() {
        let bad = Arc::new(RecordingNotifier::failing("bad"));
        let dispatcher = AlertDispatcher::new(channels(vec![bad.clone()]), cooldown());
        let event = AlertEvent::message(Severity::Warning, "x").with_subject("org");

        dispatcher.dispatch(&event).await;
        dispatcher.dispatch(&event).await;

        assert_eq!(bad.received().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_sends_nothing() {
        let channel = Arc::new(RecordingNotifier::new("console"));
        let dispatcher =
            AlertDispatcher::new(channels(vec![channel.clone()]), cooldown()).with_enabled(false);

        let records = dispatcher
            .dispatch(&AlertEvent::message(Severity::Critical, "x"))
            .await;

        assert!(records.is_empty());
        assert!(channel.received().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_limits_filters_ok_and_cooled_down() {
        let channel = Arc::new(RecordingNotifier::new("slack"));
        let dispatcher = AlertDispatcher::new(channels(vec![channel.clone()]), cooldown())
            .with_org(Some("prod".to_string()));

        let limits = vec![
            limit("DailyApiRequests", 96.0, LimitStatus::Critical),
            limit("DataStorageMB", 85.0, LimitStatus::Warning),
            limit("FileStorageMB", 10.0, LimitStatus::Ok),
        ];

        let records = dispatcher.dispatch_limits(&limits).await;
        assert!(records[0].is_delivered());

        let received = channel.received();
        assert_eq!(received[0].severity, Severity::Critical);
        assert_eq!(received[0].org.as_deref(), Some("prod"));
        assert_eq!(received[0].limits.len(), 2);

        let records = dispatcher.dispatch_limits(&limits).await;
        assert_eq!(records[0].outcome, DeliveryOutcome::Suppressed);
        assert_eq!(channel.received().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_limits_without_alerts_is_noop() {
        let channel = Arc::new(RecordingNotifier::new("slack"));
        let dispatcher = AlertDispatcher::new(channels(vec![channel.clone()]), cooldown());

        let records = dispatcher
            .dispatch_limits(&[limit("DailyApiRequests", 12.0, LimitStatus::Ok)])
            .await;

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_channels_by_kind() {
        let channel = Arc::new(RecordingNotifier::new("rec"));
        let dispatcher = AlertDispatcher::new(channels(vec![channel.clone()]), cooldown());

        let records = dispatcher.test_channels(Some("recording")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(channel.received()[0].severity, Severity::Info);
        assert_eq!(channel.received()[0].limits[0].display_name(), "Daily Api Requests");

        // Test sends bypass cooldown
        dispatcher.test_channels(None).await.unwrap();
        assert_eq!(channel.received().len(), 2);

        let err = dispatcher.test_channels(Some("pager")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
