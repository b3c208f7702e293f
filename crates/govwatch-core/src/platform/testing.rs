//! In-memory implementations of the platform capabilities.
//!
//! Used by the test suites and handy for dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::alerting::Notifier;
use crate::error::{Error, Result};
use crate::models::{AlertEvent, DeployRequestRecord, DeployStatus, RawLimitMap};

use super::{
    DeployStatusSource, LimitSource, OutputChunk, OutputStream, ProcessHandle, ProcessLauncher,
    SpawnSpec,
};

/// Limit source returning a fixed map, or a fixed error
#[derive(Debug)]
pub struct StaticLimitSource {
    reply: Mutex<std::result::Result<RawLimitMap, String>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StaticLimitSource {
    /// Always return `limits`
    pub fn new(limits: RawLimitMap) -> Self {
        Self {
            reply: Mutex::new(Ok(limits)),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Always fail with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Mutex::new(Err(message.into())),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Take `delay` to answer each fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the returned limits
    pub fn set_limits(&self, limits: RawLimitMap) {
        *self.reply.lock() = Ok(limits);
    }

    /// Start failing
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.reply.lock() = Err(message.into());
    }

    /// Number of fetches so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LimitSource for StaticLimitSource {
    async fn fetch_raw_limits(&self) -> Result<RawLimitMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.lock().clone().map_err(Error::transient)
    }
}

type Scripted<T> = Mutex<VecDeque<std::result::Result<T, String>>>;

/// Status source replaying scripted replies; the last reply repeats
#[derive(Debug, Default)]
pub struct ScriptedStatusSource {
    primary: Scripted<DeployStatus>,
    fallback: Scripted<Option<DeployRequestRecord>>,
}

fn next_reply<T: Clone>(queue: &Scripted<T>) -> Result<T> {
    let mut queue = queue.lock();
    let reply = if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    };
    reply
        .unwrap_or_else(|| Err("no scripted reply".to_string()))
        .map_err(Error::transient)
}

impl ScriptedStatusSource {
    /// Create a source with no replies (every lookup fails)
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a structured status reply
    pub fn push_status(self, status: DeployStatus) -> Self {
        self.primary.lock().push_back(Ok(status));
        self
    }

    /// Queue a structured lookup failure
    pub fn push_status_error(self, message: impl Into<String>) -> Self {
        self.primary.lock().push_back(Err(message.into()));
        self
    }

    /// Queue a record lookup reply
    pub fn push_record(self, record: Option<DeployRequestRecord>) -> Self {
        self.fallback.lock().push_back(Ok(record));
        self
    }

    /// Queue a record lookup failure
    pub fn push_record_error(self, message: impl Into<String>) -> Self {
        self.fallback.lock().push_back(Err(message.into()));
        self
    }
}

#[async_trait::async_trait]
impl DeployStatusSource for ScriptedStatusSource {
    async fn check_deploy_status(&self, _id: &str) -> Result<DeployStatus> {
        next_reply(&self.primary)
    }

    async fn query_deploy_request(&self, _id: &str) -> Result<Option<DeployRequestRecord>> {
        next_reply(&self.fallback)
    }
}

/// Test side of a [`ScriptedLauncher`] process
#[derive(Debug)]
pub struct ProcessControl {
    output: mpsc::Sender<OutputChunk>,
    exit: oneshot::Sender<std::io::Result<Option<i32>>>,
}

impl ProcessControl {
    /// Write a chunk to stdout
    pub async fn stdout(&self, data: impl Into<String>) {
        let _ = self
            .output
            .send(OutputChunk {
                stream: OutputStream::Stdout,
                data: data.into(),
            })
            .await;
    }

    /// Write a chunk to stderr
    pub async fn stderr(&self, data: impl Into<String>) {
        let _ = self
            .output
            .send(OutputChunk {
                stream: OutputStream::Stderr,
                data: data.into(),
            })
            .await;
    }

    /// Close the output streams and exit with `code`
    pub fn exit(self, code: i32) {
        drop(self.output);
        let _ = self.exit.send(Ok(Some(code)));
    }
}

/// Launcher handing out a single process driven by a [`ProcessControl`]
#[derive(Debug)]
pub struct ScriptedLauncher {
    handle: Mutex<Option<ProcessHandle>>,
    spawned: Mutex<Vec<SpawnSpec>>,
}

impl ScriptedLauncher {
    /// Create a launcher and the control for the process it will spawn
    pub fn new() -> (Self, ProcessControl) {
        let (output_tx, output_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();

        let launcher = Self {
            handle: Mutex::new(Some(ProcessHandle {
                output: output_rx,
                exit: exit_rx,
            })),
            spawned: Mutex::new(Vec::new()),
        };
        let control = ProcessControl {
            output: output_tx,
            exit: exit_tx,
        };
        (launcher, control)
    }

    /// A launcher whose spawn always fails
    pub fn unspawnable() -> Self {
        Self {
            handle: Mutex::new(None),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Specs passed to `spawn`
    pub fn spawned(&self) -> Vec<SpawnSpec> {
        self.spawned.lock().clone()
    }
}

#[async_trait::async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        self.spawned.lock().push(spec.clone());
        self.handle.lock().take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: command not found", spec.command),
            ))
        })
    }
}

/// Notifier that records what it receives, optionally failing every send
#[derive(Debug)]
pub struct RecordingNotifier {
    name: String,
    fail: bool,
    received: Mutex<Vec<AlertEvent>>,
}

impl RecordingNotifier {
    /// A notifier that accepts everything
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: false,
            received: Mutex::new(Vec::new()),
        }
    }

    /// A notifier whose every send fails
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    /// Events received so far (including failed attempts)
    pub fn received(&self) -> Vec<AlertEvent> {
        self.received.lock().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        self.received.lock().push(event.clone());
        if self.fail {
            return Err(Error::delivery(&self.name, "simulated failure"));
        }
        Ok(())
    }
}
