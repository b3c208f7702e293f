//! Child process adapter on top of `tokio::process`

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{OutputChunk, OutputStream, ProcessHandle, ProcessLauncher, SpawnSpec};

const OUTPUT_BUFFER: usize = 256;

/// Spawns real processes with piped stdout and stderr
#[derive(Debug, Clone, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    /// Create a launcher
    pub fn new() -> Self {
        Self
    }
}

fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputChunk>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let chunk = OutputChunk {
                        stream,
                        data: line + "\n",
                    };
                    // Keep draining even if nobody listens, so the child never blocks on a full pipe
                    let _ = tx.send(chunk).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(?stream, error = %e, "Failed to read process output");
                    break;
                }
            }
        }
    })
}

#[async_trait::async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        debug!(command = %spec.command, pid = ?child.id(), "Process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::internal("child stderr not captured"))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();

        let out_task = forward_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let err_task = forward_lines(stderr, OutputStream::Stderr, output_tx);

        tokio::spawn(async move {
            let _ = out_task.await;
            let _ = err_task.await;
            let status = child.wait().await.map(|s| s.code());
            let _ = exit_tx.send(status);
        });

        Ok(ProcessHandle {
            output: output_rx,
            exit: exit_rx,
        })
    }
}
