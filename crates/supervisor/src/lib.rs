//! Asynchronous process registry.
//!
//! Long-running children are spawned detached from any tool-call lifetime,
//! identified by OS pid, and collected with `wait`. A wait deadline is
//! non-destructive: the child keeps running and stays registered. The only
//! way an entry leaves the table is a wait that observed the exit.

mod process;

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use shellbox_common::{limits, AuditLog};

use process::lock;
pub use process::TrackedProcess;

#[derive(Debug, Error)]
pub enum ProcError {
    #[error("unknown pid {0}")]
    UnknownPid(u32),
    #[error("invalid signal {0}")]
    InvalidSignal(i32),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("pty failed: {0}")]
    Pty(String),
    #[error("kill failed: {0}")]
    Kill(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub tty: bool,
}

/// Result of a `wait` call. `timed_out` carries the non-destructive deadline
/// case: exit_code is the timeout sentinel and output is a partial snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WaitOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcInfo {
    pub pid: u32,
    pub cmdline: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub tty: bool,
}

#[derive(Serialize)]
struct SpawnAudit<'a> {
    cmd: &'a str,
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
    tty: bool,
}

#[derive(Serialize)]
struct StdinAudit {
    pid: u32,
    bytes: usize,
}

#[derive(Serialize)]
struct WaitAudit {
    pid: u32,
    exit: i32,
    bytes_out: usize,
}

#[derive(Serialize)]
struct KillAudit {
    pid: u32,
    signal: i32,
}

/// Pid-keyed table of live children. All mutation is behind one mutex; the
/// lock is never held across an await.
pub struct ProcessRegistry {
    procs: StdMutex<HashMap<u32, std::sync::Arc<TrackedProcess>>>,
    audit: AuditLog,
}

impl ProcessRegistry {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            procs: StdMutex::new(HashMap::new()),
            audit,
        }
    }

    pub fn from_env() -> Self {
        Self::new(AuditLog::from_env())
    }

    /// Spawn a child and register it. Must run on a tokio runtime (the output
    /// pumps and the reaper are spawned tasks).
    pub fn spawn(&self, req: &SpawnRequest) -> Result<u32, ProcError> {
        let proc = TrackedProcess::spawn(req)?;
        let pid = proc.pid();
        info!(target: "shellbox_supervisor", "spawned | pid={pid} cmd={}", proc.cmdline());
        self.audit.append(
            "proc.spawn",
            &SpawnAudit {
                cmd: proc.cmdline(),
                pid,
                cwd: proc.cwd(),
                tty: proc.tty(),
            },
        );
        lock(&self.procs).insert(pid, proc);
        Ok(pid)
    }

    fn get(&self, pid: u32) -> Result<std::sync::Arc<TrackedProcess>, ProcError> {
        lock(&self.procs)
            .get(&pid)
            .cloned()
            .ok_or(ProcError::UnknownPid(pid))
    }

    pub async fn write_stdin(&self, pid: u32, data: &[u8]) -> Result<usize, ProcError> {
        let proc = self.get(pid)?;
        let n = proc.write_stdin(data).await?;
        self.audit.append("proc.stdin", &StdinAudit { pid, bytes: n });
        Ok(n)
    }

    /// Wait for the child to exit, bounded by `timeout_ms` (default budget
    /// when unset). On exit the entry is removed; on deadline it is not, and
    /// the caller may wait again or kill.
    pub async fn wait(&self, pid: u32, timeout_ms: Option<u64>) -> Result<WaitOutcome, ProcError> {
        let proc = self.get(pid)?;
        let timeout = limits::resolve_timeout(timeout_ms);
        match proc.wait_exit(timeout).await {
            Some(exit) => {
                let (stdout, stderr, truncated) = proc.output();
                lock(&self.procs).remove(&pid);
                self.audit.append(
                    "proc.wait",
                    &WaitAudit {
                        pid,
                        exit,
                        bytes_out: stdout.len() + stderr.len(),
                    },
                );
                Ok(WaitOutcome {
                    exit_code: exit,
                    stdout,
                    stderr,
                    truncated,
                    timed_out: false,
                })
            }
            None => {
                let (stdout, stderr, truncated) = proc.output();
                Ok(WaitOutcome {
                    exit_code: 124,
                    stdout,
                    stderr,
                    truncated,
                    timed_out: true,
                })
            }
        }
    }

    /// Signal the child's process group. The entry stays registered; the
    /// exit code still has to be collected with `wait`.
    pub fn kill(&self, pid: u32, signal: Option<i32>) -> Result<(), ProcError> {
        let proc = self.get(pid)?;
        let sig = proc.kill(signal)?;
        self.audit.append("proc.kill", &KillAudit { pid, signal: sig });
        Ok(())
    }

    pub fn list(&self) -> Vec<ProcInfo> {
        let mut out: Vec<ProcInfo> = lock(&self.procs)
            .values()
            .map(|p| ProcInfo {
                pid: p.pid(),
                cmdline: p.cmdline().to_string(),
                start_time: p.start_time(),
                cwd: p.cwd().map(str::to_string),
                tty: p.tty(),
            })
            .collect();
        out.sort_by_key(|p| p.pid);
        out
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new(AuditLog::disabled())
    }
}
