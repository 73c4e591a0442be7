//! Child-process boundary.
//!
//! Spawns the configured worker command with a clean environment and talks
//! to it over length-delimited frames on stdin/stdout. The worker is
//! expected to host the component runtime, emit `Ready` once bootstrapped,
//! and answer one `ExecuteRequest` with `ExecuteSuccess` or
//! `ExecuteFailure`.
//!
//! The only environment variable the worker sees is `GLIMPSE_BOUNDARY_ID`.
//! Its stderr is discarded unless `GLIMPSE_DEBUG` is set in the host.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::boundary::{Boundary, BoundaryFactory, Inbound};
use crate::error::SandboxError;
use crate::protocol::{read_frame_with_limit, write_envelope, BoundaryId, Envelope};

/// Environment variable carrying the instance id into the worker.
pub const BOUNDARY_ID_ENV: &str = "GLIMPSE_BOUNDARY_ID";

/// How to start a worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Absolute path of the worker executable.
    pub program: PathBuf,
    /// Fixed arguments.
    pub args: Vec<String>,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
}

/// Spawns one worker process per render.
#[derive(Debug, Clone)]
pub struct ProcessBoundaryFactory {
    command: WorkerCommand,
}

impl ProcessBoundaryFactory {
    /// Build a factory. The program must be an absolute path.
    pub fn new(command: WorkerCommand) -> Result<Self, SandboxError> {
        if !command.program.is_absolute() {
            return Err(SandboxError::InsecureWorker {
                worker: command.program.display().to_string(),
                reason: "worker command must be an absolute path".into(),
            });
        }
        Ok(Self { command })
    }
}

#[async_trait::async_trait]
impl BoundaryFactory for ProcessBoundaryFactory {
    async fn instantiate(&self, id: BoundaryId) -> Result<Box<dyn Boundary>, SandboxError> {
        let program = &self.command.program;
        validate_binary_permissions(program)?;

        let mut child = Command::new(program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if std::env::var("GLIMPSE_DEBUG").is_ok() {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .env_clear()
            .env(BOUNDARY_ID_ENV, id.as_str())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn {
                worker: program.display().to_string(),
                message: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| SandboxError::Spawn {
            worker: program.display().to_string(),
            message: "no stdin on child".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SandboxError::Spawn {
            worker: program.display().to_string(),
            message: "no stdout on child".into(),
        })?;

        let (tx, rx) = mpsc::channel(16);
        let max = self.command.max_message_size;
        let reader = tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout);
            loop {
                let event = match read_frame_with_limit(&mut stdout, max).await {
                    Ok(Some(frame)) => match Envelope::decode(&frame) {
                        Some(envelope) => Inbound::Message(envelope),
                        None => Inbound::Malformed,
                    },
                    Ok(None) => Inbound::Closed {
                        reason: "worker closed its output".into(),
                    },
                    Err(e) => Inbound::Closed {
                        reason: format!("worker output unreadable: {e}"),
                    },
                };
                let closed = matches!(event, Inbound::Closed { .. });
                if tx.send(event).await.is_err() || closed {
                    break;
                }
            }
        });

        tracing::debug!(boundary = %id, worker = %program.display(), "spawned boundary worker");

        Ok(Box::new(ProcessBoundary {
            id,
            child,
            stdin: Some(stdin),
            events: rx,
            reader,
            closed: None,
        }))
    }
}

/// One running worker process.
pub struct ProcessBoundary {
    id: BoundaryId,
    child: Child,
    stdin: Option<ChildStdin>,
    events: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
    closed: Option<String>,
}

#[async_trait::async_trait]
impl Boundary for ProcessBoundary {
    fn id(&self) -> &BoundaryId {
        &self.id
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), SandboxError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SandboxError::ChannelClosed("worker stdin closed".into()))?;
        write_envelope(stdin, envelope).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Inbound {
        if let Some(reason) = &self.closed {
            return Inbound::Closed {
                reason: reason.clone(),
            };
        }
        let event = self.events.recv().await.unwrap_or_else(|| Inbound::Closed {
            reason: "worker reader stopped".into(),
        });
        if let Inbound::Closed { reason } = &event {
            self.closed = Some(reason.clone());
        }
        event
    }

    async fn teardown(&mut self) {
        self.stdin = None;
        self.reader.abort();
        self.closed
            .get_or_insert_with(|| "boundary torn down".to_string());
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(boundary = %self.id, error = %e, "worker already exited");
        }
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), self.child.wait()).await;
    }
}

impl Drop for ProcessBoundary {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reject world-writable worker binaries (Unix only).
fn validate_binary_permissions(path: &Path) -> Result<(), SandboxError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path).map_err(|e| SandboxError::Spawn {
            worker: path.display().to_string(),
            message: format!("cannot read metadata: {e}"),
        })?;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            return Err(SandboxError::InsecureWorker {
                worker: path.display().to_string(),
                reason: format!("mode {mode:o} is world-writable"),
            });
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
