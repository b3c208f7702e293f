//! Limit sampling: classification, baselines, and the periodic poller

pub mod baseline;
pub mod classifier;
pub mod poller;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::alerting::AlertDispatcher;
use crate::error::Result;
use crate::models::{LimitRecord, LimitStatus, Severity, Thresholds};
use crate::platform::LimitSource;

pub use baseline::{BaselineTracker, BASELINE_LIMITS};
pub use classifier::{classify, classify_only, format_limit_name, MONITORED_LIMITS};
pub use poller::{Poller, PollerState};

const EVENT_CAPACITY: usize = 64;

/// Outcome of one limit check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// All monitored limits, highest usage first
    pub limits: Vec<LimitRecord>,
    /// Limits at WARNING or CRITICAL
    pub alert_limits: Vec<LimitRecord>,
    /// Whether any limit is alerting
    pub has_alerts: bool,
    /// Highest severity among `alert_limits`, info when none
    pub severity: Severity,
}

impl CheckResult {
    /// Build a result from classified limits
    pub fn new(limits: Vec<LimitRecord>) -> Self {
        let alert_limits: Vec<LimitRecord> = limits
            .iter()
            .filter(|l| l.status.is_alert())
            .cloned()
            .collect();

        let severity = if alert_limits.iter().any(|l| l.status == LimitStatus::Critical) {
            Severity::Critical
        } else if alert_limits.is_empty() {
            Severity::Info
        } else {
            Severity::Warning
        };

        Self {
            timestamp: Utc::now(),
            has_alerts: !alert_limits.is_empty(),
            limits,
            alert_limits,
            severity,
        }
    }
}

/// Events published by continuous monitoring
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A check completed
    Checked(CheckResult),
    /// A check failed; monitoring continues
    Error {
        /// Error text
        message: String,
    },
}

struct Inner {
    source: Arc<dyn LimitSource>,
    dispatcher: Arc<AlertDispatcher>,
    thresholds: Thresholds,
    events: broadcast::Sender<MonitorEvent>,
}

impl Inner {
    async fn check_limits(&self) -> Result<CheckResult> {
        let raw = self.source.fetch_raw_limits().await?;
        let limits = classify(&raw, &self.thresholds);
        debug!(count = limits.len(), "Classified limits");
        Ok(CheckResult::new(limits))
    }

    async fn check_and_alert(&self) -> Result<CheckResult> {
        let result = self.check_limits().await?;
        self.alert(&result).await;
        Ok(result)
    }

    async fn alert(&self, result: &CheckResult) {
        if result.has_alerts {
            info!(
                alerts = result.alert_limits.len(),
                severity = %result.severity,
                "Limits above threshold"
            );
            self.dispatcher.dispatch_limits(&result.alert_limits).await;
        }
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Periodic limit checks feeding the alert dispatcher
pub struct LimitsMonitor {
    inner: Arc<Inner>,
    poller: Poller,
    live: Mutex<Option<Arc<AtomicBool>>>,
}

impl LimitsMonitor {
    /// Create a monitor
    pub fn new(
        source: Arc<dyn LimitSource>,
        dispatcher: Arc<AlertDispatcher>,
        thresholds: Thresholds,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                source,
                dispatcher,
                thresholds,
                events,
            }),
            poller: Poller::new("limits"),
            live: Mutex::new(None),
        }
    }

    /// Randomize each scheduled check by up to `jitter`
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.poller = Poller::new("limits").with_jitter(jitter);
        self
    }

    /// Fetch and classify the limits once
    pub async fn check_limits(&self) -> Result<CheckResult> {
        self.inner.check_limits().await
    }

    /// Check once and dispatch alerts for limits above threshold
    pub async fn check_and_alert(&self) -> Result<CheckResult> {
        self.inner.check_and_alert().await
    }

    /// Check every `every` until [`stop`](Self::stop). Returns `false` if
    /// already running.
    pub fn start_continuous(&self, every: Duration) -> bool {
        let live = Arc::new(AtomicBool::new(true));
        let inner = self.inner.clone();
        let run = live.clone();

        let started = self.poller.start(every, move || {
            let inner = inner.clone();
            let run = run.clone();
            async move {
                let outcome = inner.check_limits().await;

                // Results of a check that outlived its run are dropped
                if !run.load(Ordering::SeqCst) {
                    debug!("Discarding stale limit check");
                    return;
                }

                match outcome {
                    Ok(result) => {
                        inner.alert(&result).await;
                        if run.load(Ordering::SeqCst) {
                            inner.publish(MonitorEvent::Checked(result));
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Limit check failed");
                        inner.publish(MonitorEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
        });

        if started {
            *self.live.lock() = Some(live);
            info!(
                interval = %humantime::format_duration(every),
                "Continuous limit monitoring started"
            );
        }
        started
    }

    /// Stop continuous monitoring. Idempotent.
    pub fn stop(&self) {
        if let Some(live) = self.live.lock().take() {
            live.store(false, Ordering::SeqCst);
            self.poller.stop();
            info!("Continuous limit monitoring stopped");
        }
    }

    /// Whether continuous monitoring is active
    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Subscribe to monitoring events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for LimitsMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitsMonitor")
            .field("thresholds", &self.inner.thresholds)
            .field("poller", &self.poller)
            .finish()
    }
}
