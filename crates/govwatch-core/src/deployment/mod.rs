//! Deployment correlation
//!
//! Runs (or attaches to) a deployment and samples the governor limits while it
//! is in flight. A baseline is captured first; once the deployment id is known
//! the correlator polls the deployment status and the limits on a short
//! interval and reports the change of each limit since the baseline.
//!
//! Observers subscribe to a broadcast channel of [`DeploymentEvent`]s. A
//! receiver that falls more than the channel capacity behind loses the oldest
//! events.

pub mod id;
pub mod status;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Baseline, Delta, DeployStatus, LimitRecord, Thresholds, UNKNOWN_STATE};
use crate::monitor::{BaselineTracker, Poller};
use crate::platform::{DeployStatusSource, LimitSource, OutputStream, ProcessLauncher, SpawnSpec};

pub use id::{extract_deploy_id, is_deploy_id, DeployIdScanner};
pub use status::StatusResolver;

const EVENT_CAPACITY: usize = 256;

/// What failed, for [`DeploymentEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Baseline capture failed; deltas will be empty
    Baseline,
    /// Limit fetch failed during a tick
    Limits,
    /// No status source could answer during a tick
    Status,
}

/// One polling tick of an active deployment
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringUpdate {
    /// When the tick finished
    pub timestamp: DateTime<Utc>,
    /// Deployment being polled
    pub deploy_id: String,
    /// Resolved status, `Unknown` when no source answered
    pub status: DeployStatus,
    /// Delta-tracked limits; empty when the fetch failed
    pub current_limits: Vec<LimitRecord>,
    /// Change since the baseline; empty without a baseline
    pub deltas: BTreeMap<String, Delta>,
}

/// Events published by a [`DeploymentCorrelator`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentEvent {
    /// A deployment process is about to run
    OperationStarted {
        /// Program
        command: String,
        /// Program arguments
        args: Vec<String>,
    },
    /// The baseline for this session was captured
    BaselineCaptured {
        /// The snapshot
        baseline: Baseline,
    },
    /// A chunk of process output
    Output {
        /// Source stream
        stream: OutputStream,
        /// Raw text, usually one line
        data: String,
    },
    /// Status polling began
    MonitoringStarted {
        /// Deployment being polled
        deploy_id: String,
    },
    /// One polling tick
    MonitoringUpdate(MonitoringUpdate),
    /// Status polling ended
    MonitoringStopped {
        /// Deployment that was polled
        deploy_id: Option<String>,
    },
    /// The process exited with code 0
    OperationCompleted(DeploymentOutcome),
    /// The process failed to spawn or exited unsuccessfully
    OperationFailed {
        /// Deployment id, if one was printed
        deploy_id: Option<String>,
        /// Exit code; `None` on spawn failure or signal
        code: Option<i32>,
        /// Captured standard error or the spawn error
        stderr: String,
    },
    /// A recoverable error; the session continues
    Error {
        /// What failed
        kind: ErrorKind,
        /// Error text
        message: String,
    },
}

/// Result of a successful deployment run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentOutcome {
    /// Deployment id found on stdout
    pub deploy_id: Option<String>,
    /// Everything written to stdout
    pub stdout: String,
    /// Everything written to stderr
    pub stderr: String,
}

/// Snapshot returned by [`DeploymentCorrelator::get_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelatorStatus {
    /// Whether status polling is active
    pub is_monitoring: bool,
    /// Deployment id of the current session
    pub operation_id: Option<String>,
    /// Whether a baseline was captured
    pub has_baseline: bool,
    /// Interval between status ticks
    #[serde(with = "humantime_serde")]
    pub polling_rate: Duration,
}

#[derive(Debug, Default)]
struct Session {
    generation: u64,
    operation_id: Option<String>,
    baseline: Option<Arc<Baseline>>,
    active: bool,
    // Set by an explicit stop; polling never starts again for this session
    stopped: bool,
}

struct Inner {
    limits: Arc<dyn LimitSource>,
    resolver: StatusResolver,
    launcher: Arc<dyn ProcessLauncher>,
    tracker: BaselineTracker,
    polling_rate: Duration,
    events: broadcast::Sender<DeploymentEvent>,
    session: Mutex<Session>,
    poller: Poller,
}

/// Correlates a deployment with governor limit usage
#[derive(Clone)]
pub struct DeploymentCorrelator {
    inner: Arc<Inner>,
}

impl DeploymentCorrelator {
    /// Create a correlator polling every `polling_rate`
    pub fn new(
        limits: Arc<dyn LimitSource>,
        status: Arc<dyn DeployStatusSource>,
        launcher: Arc<dyn ProcessLauncher>,
        thresholds: Thresholds,
        polling_rate: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                limits,
                resolver: StatusResolver::new(status),
                launcher,
                tracker: BaselineTracker::new(thresholds),
                polling_rate,
                events,
                session: Mutex::new(Session::default()),
                poller: Poller::new("deployment"),
            }),
        }
    }

    /// Subscribe to events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.inner.events.subscribe()
    }

    /// Run a deployment process to completion.
    ///
    /// A baseline is captured before the process is spawned; failure to
    /// capture it is reported as an event and does not stop the run. Polling
    /// starts at the first deployment id found on stdout. The exit code
    /// decides the result: `Ok` on 0, [`Error::TerminalProcess`] otherwise.
    pub async fn start(&self, spec: SpawnSpec) -> Result<DeploymentOutcome> {
        let inner = &self.inner;
        let generation = inner.new_session(None);

        inner.publish(DeploymentEvent::OperationStarted {
            command: spec.command.clone(),
            args: spec.args.clone(),
        });
        info!(command = %spec.command, args = ?spec.args, "Starting deployment");

        inner
            .capture_baseline(
                generation,
                serde_json::json!({ "command": spec.command, "args": spec.args }),
            )
            .await;

        let mut handle = match inner.launcher.spawn(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(command = %spec.command, error = %e, "Failed to spawn deployment");
                inner.stop_monitoring();
                inner.publish(DeploymentEvent::OperationFailed {
                    deploy_id: None,
                    code: None,
                    stderr: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut scanner = DeployIdScanner::new();
        let mut stdout = String::new();
        let mut stderr = String::new();

        while let Some(chunk) = handle.output.recv().await {
            match chunk.stream {
                OutputStream::Stdout => {
                    stdout.push_str(&chunk.data);
                    if let Some(deploy_id) = scanner.feed(&chunk.data) {
                        info!(deploy_id = %deploy_id, "Deployment id found");
                        inner.set_operation_id(generation, deploy_id);
                        inner.start_monitoring(generation);
                    }
                }
                OutputStream::Stderr => stderr.push_str(&chunk.data),
            }
            inner.publish(DeploymentEvent::Output {
                stream: chunk.stream,
                data: chunk.data,
            });
        }
        if let Some(deploy_id) = scanner.finish() {
            inner.set_operation_id(generation, deploy_id);
        }

        let exit = handle
            .exit
            .await
            .map_err(|_| Error::internal("process exit status was never reported"))
            .and_then(|status| status.map_err(Error::from));

        inner.stop_monitoring();
        let deploy_id = scanner.found().map(String::from);

        match exit {
            Ok(Some(0)) => {
                info!(deploy_id = ?deploy_id, "Deployment completed");
                let outcome = DeploymentOutcome {
                    deploy_id,
                    stdout,
                    stderr,
                };
                inner.publish(DeploymentEvent::OperationCompleted(outcome.clone()));
                Ok(outcome)
            }
            Ok(code) => {
                warn!(deploy_id = ?deploy_id, code = ?code, "Deployment failed");
                inner.publish(DeploymentEvent::OperationFailed {
                    deploy_id,
                    code,
                    stderr: stderr.clone(),
                });
                Err(Error::TerminalProcess { code, stderr })
            }
            Err(e) => {
                inner.publish(DeploymentEvent::OperationFailed {
                    deploy_id,
                    code: None,
                    stderr: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Attach to a deployment started elsewhere: capture a baseline, then poll
    /// until the deployment reaches a terminal state or [`stop`](Self::stop).
    pub async fn monitor_existing(&self, deploy_id: &str) -> Result<()> {
        if !is_deploy_id(deploy_id) {
            return Err(Error::config(format!("invalid deployment id: {deploy_id:?}")));
        }

        let inner = &self.inner;
        let generation = inner.new_session(Some(deploy_id.to_string()));
        inner
            .capture_baseline(generation, serde_json::json!({ "deploy_id": deploy_id }))
            .await;
        inner.start_monitoring(generation);
        Ok(())
    }

    /// End the current session. Idempotent; a running process is not
    /// affected, but a deployment id found afterwards no longer starts polling.
    pub fn stop(&self) {
        self.inner.session.lock().stopped = true;
        self.inner.stop_monitoring();
    }

    /// Current session state
    pub fn get_status(&self) -> CorrelatorStatus {
        let session = self.inner.session.lock();
        CorrelatorStatus {
            is_monitoring: session.active,
            operation_id: session.operation_id.clone(),
            has_baseline: session.baseline.is_some(),
            polling_rate: self.inner.polling_rate,
        }
    }

    /// Baseline of the current session
    pub fn baseline(&self) -> Option<Arc<Baseline>> {
        self.inner.session.lock().baseline.clone()
    }
}

impl std::fmt::Debug for DeploymentCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentCorrelator")
            .field("status", &self.get_status())
            .finish()
    }
}

impl Inner {
    fn publish(&self, event: DeploymentEvent) {
        let _ = self.events.send(event);
    }

    /// Replace the session, stopping any polling of the previous one
    fn new_session(&self, operation_id: Option<String>) -> u64 {
        self.stop_monitoring();
        let mut session = self.session.lock();
        let generation = session.generation + 1;
        *session = Session {
            generation,
            operation_id,
            baseline: None,
            active: false,
            stopped: false,
        };
        generation
    }

    /// Session data if `generation` is still the live session
    fn current(&self, generation: u64) -> Option<(Option<String>, Option<Arc<Baseline>>)> {
        let session = self.session.lock();
        (session.generation == generation)
            .then(|| (session.operation_id.clone(), session.baseline.clone()))
    }

    fn set_operation_id(&self, generation: u64, deploy_id: String) {
        let mut session = self.session.lock();
        if session.generation == generation && session.operation_id.is_none() {
            session.operation_id = Some(deploy_id);
        }
    }

    async fn capture_baseline(&self, generation: u64, context: serde_json::Value) {
        match self.tracker.capture_from(self.limits.as_ref(), context).await {
            Ok(baseline) => {
                let baseline = Arc::new(baseline);
                {
                    let mut session = self.session.lock();
                    if session.generation != generation {
                        return;
                    }
                    session.baseline = Some(baseline.clone());
                }
                debug!(metrics = baseline.metrics.len(), "Baseline captured");
                self.publish(DeploymentEvent::BaselineCaptured {
                    baseline: (*baseline).clone(),
                });
            }
            Err(e) => {
                warn!(error = %e, "Baseline capture failed, deltas will be unavailable");
                self.publish(DeploymentEvent::Error {
                    kind: ErrorKind::Baseline,
                    message: e.to_string(),
                });
            }
        }
    }

    fn start_monitoring(self: &Arc<Self>, generation: u64) {
        let deploy_id = {
            let mut session = self.session.lock();
            if session.generation != generation || session.active || session.stopped {
                return;
            }
            let Some(deploy_id) = session.operation_id.clone() else {
                return;
            };
            session.active = true;
            deploy_id
        };

        info!(
            deploy_id = %deploy_id,
            rate = %humantime::format_duration(self.polling_rate),
            "Monitoring deployment"
        );
        self.publish(DeploymentEvent::MonitoringStarted { deploy_id });

        let weak: Weak<Self> = Arc::downgrade(self);
        self.poller.start(self.polling_rate, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.tick(generation).await;
                }
            }
        });
    }

    async fn tick(&self, generation: u64) {
        let Some((Some(deploy_id), _)) = self.current(generation) else {
            return;
        };

        let (status, limits) = tokio::join!(
            self.resolver.resolve(&deploy_id),
            self.limits.fetch_raw_limits()
        );

        // The session may have ended while the lookups were in flight
        let Some((_, baseline)) = self.current(generation).filter(|_| self.is_active()) else {
            debug!(deploy_id = %deploy_id, "Discarding tick of inactive session");
            return;
        };

        let current_limits = match limits {
            Ok(raw) => self.tracker.tracked(&raw),
            Err(e) => {
                warn!(deploy_id = %deploy_id, error = %e, "Limit fetch failed");
                self.publish(DeploymentEvent::Error {
                    kind: ErrorKind::Limits,
                    message: e.to_string(),
                });
                Vec::new()
            }
        };

        if status.state == UNKNOWN_STATE {
            self.publish(DeploymentEvent::Error {
                kind: ErrorKind::Status,
                message: status.error_message.clone().unwrap_or_default(),
            });
        }

        let deltas = baseline
            .map(|b| self.tracker.delta(&b, &current_limits))
            .unwrap_or_default();
        let terminal = status.is_terminal();

        self.publish(DeploymentEvent::MonitoringUpdate(MonitoringUpdate {
            timestamp: Utc::now(),
            deploy_id: deploy_id.clone(),
            status,
            current_limits,
            deltas,
        }));

        if terminal {
            info!(deploy_id = %deploy_id, "Deployment reached a terminal state");
            self.stop_monitoring_of(generation);
        }
    }

    fn is_active(&self) -> bool {
        self.session.lock().active
    }

    fn stop_monitoring_of(&self, generation: u64) {
        if self.session.lock().generation == generation {
            self.stop_monitoring();
        }
    }

    fn stop_monitoring(&self) {
        let deploy_id = {
            let mut session = self.session.lock();
            if !session.active {
                return;
            }
            session.active = false;
            session.operation_id.clone()
        };

        self.poller.stop();
        debug!(deploy_id = ?deploy_id, "Deployment monitoring stopped");
        self.publish(DeploymentEvent::MonitoringStopped { deploy_id });
    }
}
