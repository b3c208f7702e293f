//! Capabilities the engine depends on
//!
//! The monitoring core never talks to the network or spawns processes
//! directly. It is handed implementations of these traits: [`RestClient`]
//! and [`TokioProcessLauncher`] for real use, [`testing`] fakes otherwise.

mod process;
mod rest;
pub mod testing;

pub use process::TokioProcessLauncher;
pub use rest::RestClient;

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::models::{DeployRequestRecord, DeployStatus, RawLimitMap};

/// Source of raw limit counters
#[async_trait::async_trait]
pub trait LimitSource: Send + Sync {
    /// Fetch the current counters
    async fn fetch_raw_limits(&self) -> Result<RawLimitMap>;
}

/// Source of deployment status, with a structured and a record-based lookup
#[async_trait::async_trait]
pub trait DeployStatusSource: Send + Sync {
    /// Structured deploy status lookup
    async fn check_deploy_status(&self, id: &str) -> Result<DeployStatus>;

    /// Record-based lookup used when the structured one fails
    async fn query_deploy_request(&self, id: &str) -> Result<Option<DeployRequestRecord>>;
}

/// What to run for a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Program to run, resolved through `PATH`
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory; inherited when absent
    pub working_dir: Option<std::path::PathBuf>,
}

impl SpawnSpec {
    /// Describe a launch of `command args...`
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }
}

/// Output stream of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A chunk of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Source stream
    pub stream: OutputStream,
    /// One line, newline included when present
    pub data: String,
}

/// Handle to a running process.
///
/// `output` closes once both streams reach EOF; `exit` resolves with the
/// exit code (`None` when killed by a signal) after that.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Interleaved stdout and stderr lines
    pub output: mpsc::Receiver<OutputChunk>,
    /// Exit code once the process ends
    pub exit: oneshot::Receiver<std::io::Result<Option<i32>>>,
}

/// Launches external processes
#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the described process
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle>;
}
