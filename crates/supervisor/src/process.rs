//! One tracked child: spawn plumbing, output pumps, stdin handle, reaper.

use std::io::{ErrorKind, Read as _, Write as _};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{watch, Mutex as TokioMutex};
use tracing::debug;

use shellbox_common::limits::{workspace_root, DEFAULT_MAX_IO, DEFAULT_MAX_STDIN};
use shellbox_common::LimitedWriter;

use crate::{ProcError, SpawnRequest};

/// Poison carries no meaning for our sinks; take the data either way.
pub(crate) fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

enum StdinHandle {
    Pipe(tokio::process::ChildStdin),
    Pty(Arc<StdMutex<Box<dyn std::io::Write + Send>>>),
}

/// A spawned child tracked by the registry. The reaper task is the only
/// writer of the exit channel; late waiters still observe the stored code.
pub struct TrackedProcess {
    pid: u32,
    cmdline: String,
    cwd: Option<String>,
    tty: bool,
    start: DateTime<Utc>,
    stdin: TokioMutex<StdinHandle>,
    stdout: Arc<StdMutex<LimitedWriter>>,
    stderr: Arc<StdMutex<LimitedWriter>>,
    exit: watch::Receiver<Option<i32>>,
    // Dropping the master tears the pty down, so it lives as long as the entry.
    // Wrapped in a mutex only so the struct is `Sync`; never locked after construction.
    _master: StdMutex<Option<Box<dyn MasterPty + Send>>>,
}

impl TrackedProcess {
    pub fn spawn(req: &SpawnRequest) -> Result<Arc<Self>, ProcError> {
        if req.cmd.is_empty() {
            return Err(ProcError::Spawn("cmd is required".to_string()));
        }
        let cwd = req
            .cwd
            .clone()
            .or_else(|| workspace_root().map(|p| p.display().to_string()));
        let cmdline = if req.args.is_empty() {
            req.cmd.clone()
        } else {
            format!("{} {}", req.cmd, req.args.join(" "))
        };
        if req.tty {
            Self::spawn_pty(req, cwd, cmdline)
        } else {
            Self::spawn_pipe(req, cwd, cmdline)
        }
    }

    fn spawn_pipe(
        req: &SpawnRequest,
        cwd: Option<String>,
        cmdline: String,
    ) -> Result<Arc<Self>, ProcError> {
        let mut cmd = Command::new(&req.cmd);
        cmd.args(&req.args);
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }
        if let Some(extra) = &req.env {
            for (k, v) in extra {
                cmd.env(k, v);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| ProcError::Spawn(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| ProcError::Spawn("pid unavailable".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcError::Spawn("stdin unavailable".to_string()))?;

        let stdout = Arc::new(StdMutex::new(LimitedWriter::new(DEFAULT_MAX_IO)));
        let stderr = Arc::new(StdMutex::new(LimitedWriter::new(DEFAULT_MAX_IO)));
        let out_pump = pump(child.stdout.take(), stdout.clone());
        let err_pump = pump(child.stderr.take(), stderr.clone());

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(_) => 1,
            };
            // drain the pipes before anyone can observe the exit, so a wait
            // that sees the code also sees the full captured output
            if let Some(h) = out_pump {
                let _ = h.await;
            }
            if let Some(h) = err_pump {
                let _ = h.await;
            }
            let _ = tx.send(Some(exit));
            debug!(target: "shellbox_supervisor", "child exited | pid={pid} exit={exit}");
        });

        Ok(Arc::new(Self {
            pid,
            cmdline,
            cwd,
            tty: false,
            start: Utc::now(),
            stdin: TokioMutex::new(StdinHandle::Pipe(stdin)),
            stdout,
            stderr,
            exit: rx,
            _master: StdMutex::new(None),
        }))
    }

    fn spawn_pty(
        req: &SpawnRequest,
        cwd: Option<String>,
        cmdline: String,
    ) -> Result<Arc<Self>, ProcError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ProcError::Pty(e.to_string()))?;

        let mut builder = CommandBuilder::new(&req.cmd);
        builder.args(&req.args);
        if let Some(dir) = &cwd {
            builder.cwd(dir);
        }
        if let Some(extra) = &req.env {
            for (k, v) in extra {
                builder.env(k, v);
            }
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| ProcError::Pty(e.to_string()))?;
        drop(pair.slave);
        let pid = child
            .process_id()
            .ok_or_else(|| ProcError::Pty("pid unavailable".to_string()))?;

        let master = pair.master;
        let mut reader = master
            .try_clone_reader()
            .map_err(|e| ProcError::Pty(e.to_string()))?;
        let writer = master
            .take_writer()
            .map_err(|e| ProcError::Pty(e.to_string()))?;
        let writer = Arc::new(StdMutex::new(writer));

        // On a pty there is no separate stderr stream; everything the child
        // writes lands on the combined stdout sink.
        let stdout = Arc::new(StdMutex::new(LimitedWriter::new(DEFAULT_MAX_IO)));
        let stderr = Arc::new(StdMutex::new(LimitedWriter::new(DEFAULT_MAX_IO)));

        let sink = stdout.clone();
        let reader_task = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = lock(&sink).write(&buf[..n]);
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    // EIO when the last slave fd closes
                    Err(_) => break,
                }
            }
        });

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = tokio::task::spawn_blocking(move || match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => 1,
            })
            .await
            .unwrap_or(1);
            let _ = reader_task.await;
            let _ = tx.send(Some(exit));
            debug!(target: "shellbox_supervisor", "pty child exited | pid={pid} exit={exit}");
        });

        Ok(Arc::new(Self {
            pid,
            cmdline,
            cwd,
            tty: true,
            start: Utc::now(),
            stdin: TokioMutex::new(StdinHandle::Pty(writer)),
            stdout,
            stderr,
            exit: rx,
            _master: StdMutex::new(Some(master)),
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn tty(&self) -> bool {
        self.tty
    }

    pub fn start_time(&self) -> String {
        self.start.to_rfc3339()
    }

    /// Feed bytes to the child's stdin, capped at the stdin limit.
    /// Returns the number of bytes actually written.
    pub async fn write_stdin(&self, data: &[u8]) -> Result<usize, ProcError> {
        let capped = if data.len() > DEFAULT_MAX_STDIN {
            &data[..DEFAULT_MAX_STDIN]
        } else {
            data
        };
        let n = capped.len();
        let mut handle = self.stdin.lock().await;
        match &mut *handle {
            StdinHandle::Pipe(pipe) => {
                pipe.write_all(capped).await?;
                pipe.flush().await?;
            }
            StdinHandle::Pty(writer) => {
                let writer = writer.clone();
                let owned = capped.to_vec();
                tokio::task::spawn_blocking(move || {
                    let mut guard = lock(&writer);
                    guard.write_all(&owned)?;
                    guard.flush()
                })
                .await
                .map_err(|e| std::io::Error::new(ErrorKind::Other, e))??;
            }
        }
        Ok(n)
    }

    /// Block until the reaper has recorded an exit code, bounded by `timeout`.
    /// `None` means the deadline passed with the child still running.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<i32> {
        let mut rx = self.exit.clone();
        let code = match tokio::time::timeout(timeout, rx.wait_for(|v| v.is_some())).await {
            Ok(Ok(code)) => *code,
            _ => None,
        };
        code
    }

    /// Snapshot of captured output so far: (stdout, stderr, truncated).
    pub fn output(&self) -> (String, String, bool) {
        let out = lock(&self.stdout);
        let err = lock(&self.stderr);
        (
            out.to_string_lossy(),
            err.to_string_lossy(),
            out.truncated() || err.truncated(),
        )
    }

    /// Signal the child's whole process group. SIGTERM when unspecified.
    pub fn kill(&self, signal: Option<i32>) -> Result<i32, ProcError> {
        let sig = match signal {
            Some(raw) => Signal::try_from(raw).map_err(|_| ProcError::InvalidSignal(raw))?,
            None => Signal::SIGTERM,
        };
        killpg(Pid::from_raw(self.pid as i32), sig)
            .map_err(|e| ProcError::Kill(e.to_string()))?;
        Ok(sig as i32)
    }
}

fn pump<R>(
    reader: Option<R>,
    sink: Arc<StdMutex<LimitedWriter>>,
) -> Option<tokio::task::JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    Some(tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = lock(&sink).write(&buf[..n]);
                }
            }
        }
    }))
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status.signal().map(|sig| 128 + sig).unwrap_or(1),
    }
}
