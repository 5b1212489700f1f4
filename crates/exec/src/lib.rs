//! Bounded synchronous command execution.
//!
//! One call, one child, fully reaped before returning: output capped through
//! `LimitedWriter`, wall clock bounded by a deadline, and on expiry the whole
//! process group is SIGKILLed so no grandchild outlives the call.

pub mod policy;

use std::collections::HashMap;
use std::io::Write as _;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use shellbox_common::limits::{self, DEFAULT_MAX_STDIN};
use shellbox_common::{AuditLog, LimitedWriter};

pub use policy::CommandPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub shebang: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecResponse {
    fn refused(exit_code: i32, error: &str) -> Self {
        Self {
            exit_code,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct ExecAudit<'a> {
    cmd: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    exit: i32,
    duration_ms: u64,
    bytes_out: usize,
    stdout_truncated: bool,
    stderr_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

/// Runs one command (or script) to completion under a deadline.
#[derive(Debug)]
pub struct ShellExecutor {
    policy: CommandPolicy,
    workspace: Option<PathBuf>,
    audit: AuditLog,
}

impl ShellExecutor {
    pub fn new(policy: CommandPolicy, audit: AuditLog) -> Self {
        Self {
            policy,
            workspace: limits::workspace_root(),
            audit,
        }
    }

    pub fn from_env() -> Self {
        Self::new(CommandPolicy::from_env(), AuditLog::from_env())
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Run `cmd` through `bash -lc` in its own process group and capture
    /// capped stdout/stderr. Never returns with a live or zombie child
    /// outstanding: the timeout path group-kills and reaps before returning.
    pub async fn run(&self, req: ExecRequest) -> ExecResponse {
        let start = Instant::now();
        if req.cmd.is_empty() {
            return ExecResponse::refused(127, "cmd is required");
        }

        let timeout = limits::resolve_timeout(req.timeout_ms);
        let limit = limits::resolve_max_bytes(req.max_bytes);

        if !self.policy.allows(&req.cmd) {
            let resp = ExecResponse {
                stderr: "command blocked by policy".to_string(),
                exit_code: 126,
                duration_ms: start.elapsed().as_millis() as u64,
                error: Some("command blocked".to_string()),
                ..ExecResponse::default()
            };
            self.audit_exec("shell.exec", &req.cmd, None, req.timeout_ms, &resp);
            return resp;
        }

        if req.dry_run {
            let resp = ExecResponse {
                stdout: format!("[dry_run] would execute: {}", req.cmd),
                duration_ms: start.elapsed().as_millis() as u64,
                ..ExecResponse::default()
            };
            self.audit_exec("shell.exec", &req.cmd, None, req.timeout_ms, &resp);
            return resp;
        }

        let cwd = self.resolve_cwd(req.cwd.as_deref());
        let mut cmd = Command::new("bash");
        cmd.arg("-lc").arg(&req.cmd);
        let resp = self
            .launch(
                cmd,
                cwd.clone(),
                req.env.as_ref(),
                req.stdin.clone(),
                timeout,
                limit,
                start,
            )
            .await;
        self.audit_exec(
            "shell.exec",
            &req.cmd,
            cwd.map(|p| p.display().to_string()),
            req.timeout_ms,
            &resp,
        );
        resp
    }

    /// Materialize a shebang + body as a 0700 temp file and run it directly.
    /// Shares every other rule with [`run`], including the group-kill deadline.
    pub async fn run_script(&self, req: ScriptRequest) -> ExecResponse {
        let start = Instant::now();
        if req.shebang.is_empty() || req.content.is_empty() {
            return ExecResponse::refused(127, "shebang and content required");
        }

        let timeout = limits::resolve_timeout(req.timeout_ms);
        let limit = limits::resolve_max_bytes(req.max_bytes);

        let tmp = match tempfile::Builder::new().prefix("sh-run-").tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                let mut resp = ExecResponse::refused(1, &err.to_string());
                resp.duration_ms = start.elapsed().as_millis() as u64;
                return resp;
            }
        };
        let script_path = tmp.path().join("script.sh");
        let body = format!("#!{}\n{}", req.shebang, req.content);
        if let Err(err) = write_executable(&script_path, body.as_bytes()) {
            let mut resp = ExecResponse::refused(1, &err.to_string());
            resp.duration_ms = start.elapsed().as_millis() as u64;
            return resp;
        }

        let cwd = self.resolve_cwd(req.cwd.as_deref());
        let cmd = Command::new(&script_path);
        let resp = self
            .launch(cmd, cwd.clone(), req.env.as_ref(), None, timeout, limit, start)
            .await;
        // tmp lives until here so the script file outlasts the child
        drop(tmp);
        self.audit_exec(
            "shell.run_script",
            &req.shebang,
            cwd.map(|p| p.display().to_string()),
            req.timeout_ms,
            &resp,
        );
        resp
    }

    fn resolve_cwd(&self, explicit: Option<&str>) -> Option<PathBuf> {
        explicit
            .map(PathBuf::from)
            .or_else(|| self.workspace.clone())
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch(
        &self,
        mut cmd: Command,
        cwd: Option<PathBuf>,
        env: Option<&HashMap<String, String>>,
        stdin: Option<String>,
        timeout: Duration,
        limit: usize,
        start: Instant,
    ) -> ExecResponse {
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }
        if let Some(extra) = env {
            // merged over the inherited environment, caller keys win
            for (k, v) in extra {
                cmd.env(k, v);
            }
        }
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(false);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let mut resp = ExecResponse::refused(1, &err.to_string());
                resp.duration_ms = start.elapsed().as_millis() as u64;
                return resp;
            }
        };
        let pid = child.id();

        if let Some(payload) = stdin {
            let mut data = payload.into_bytes();
            data.truncate(DEFAULT_MAX_STDIN);
            if let Some(mut handle) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = handle.write_all(&data).await;
                    // dropping the handle closes the pipe (EOF)
                });
            }
        }

        let stdout_task = capture(child.stdout.take(), limit);
        let stderr_task = capture(child.stderr.take(), limit);

        let mut exit_code;
        tokio::select! {
            status = child.wait() => {
                exit_code = match status {
                    Ok(status) => exit_code_of(status),
                    Err(_) => 1,
                };
            }
            _ = tokio::time::sleep(timeout) => {
                // Negative-pid kill: the whole group dies, grandchildren included.
                if let Some(pid) = pid {
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                let _ = child.wait().await;
                exit_code = 124;
                debug!(target: "shellbox_exec", "deadline expired, process group killed | pid={:?}", pid);
            }
        }

        let stdout = drain(stdout_task, limit).await;
        let stderr = drain(stderr_task, limit).await;

        let mut resp = ExecResponse {
            stdout: stdout.to_string_lossy(),
            stderr: stderr.to_string_lossy(),
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            stdout_truncated: stdout.truncated(),
            stderr_truncated: stderr.truncated(),
            error: None,
        };
        if exit_code == 124 && resp.stderr.is_empty() {
            resp.stderr = "timed out".to_string();
        }
        resp
    }

    fn audit_exec(
        &self,
        tool: &str,
        cmd: &str,
        cwd: Option<String>,
        timeout_ms: Option<u64>,
        resp: &ExecResponse,
    ) {
        self.audit.append(
            tool,
            &ExecAudit {
                cmd,
                cwd,
                exit: resp.exit_code,
                duration_ms: resp.duration_ms,
                bytes_out: resp.stdout.len() + resp.stderr.len(),
                stdout_truncated: resp.stdout_truncated,
                stderr_truncated: resp.stderr_truncated,
                timeout_ms,
            },
        );
    }
}

fn capture<R>(reader: Option<R>, limit: usize) -> JoinHandle<LimitedWriter>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = LimitedWriter::new(limit);
        if let Some(mut reader) = reader {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = sink.write(&buf[..n]);
                    }
                }
            }
        }
        sink
    })
}

async fn drain(task: JoinHandle<LimitedWriter>, limit: usize) -> LimitedWriter {
    task.await.unwrap_or_else(|_| LimitedWriter::new(limit))
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        // signal-terminated: shell convention
        None => status.signal().map(|sig| 128 + sig).unwrap_or(1),
    }
}

fn write_executable(path: &std::path::Path, body: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, body)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ShellExecutor {
        ShellExecutor::new(CommandPolicy::allow_all(), AuditLog::disabled())
            .with_workspace(std::env::temp_dir())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echo_captures_stdout() {
        let resp = executor()
            .run(ExecRequest {
                cmd: "echo hi".into(),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.stdout, "hi\n");
        assert_eq!(resp.exit_code, 0);
        assert!(!resp.stdout_truncated);
        assert!(resp.error.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nonzero_exit_code_is_preserved() {
        let resp = executor()
            .run(ExecRequest {
                cmd: "exit 7".into(),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_cmd_is_a_validation_error() {
        let resp = executor().run(ExecRequest::default()).await;
        assert_eq!(resp.exit_code, 127);
        assert_eq!(resp.error.as_deref(), Some("cmd is required"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn denied_command_is_rejected_before_spawn() {
        let policy = CommandPolicy::new(vec![], vec![regex::Regex::new("^rm").expect("re")]);
        let exec = ShellExecutor::new(policy, AuditLog::disabled());
        let resp = exec
            .run(ExecRequest {
                cmd: "rm -rf /tmp/nope".into(),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 126);
        assert_eq!(resp.stderr, "command blocked by policy");
        assert!(resp.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dry_run_spawns_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("audit.jsonl");
        let exec = ShellExecutor::new(CommandPolicy::allow_all(), AuditLog::at(&log));
        let resp = exec
            .run(ExecRequest {
                cmd: "touch should-not-exist".into(),
                dry_run: true,
                cwd: Some(dir.path().display().to_string()),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 0);
        assert_eq!(resp.stdout, "[dry_run] would execute: touch should-not-exist");
        assert!(!dir.path().join("should-not-exist").exists());
        let content = std::fs::read_to_string(&log).expect("audit");
        assert!(content.contains("touch should-not-exist"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_kills_the_whole_group() {
        let started = Instant::now();
        let resp = executor()
            .run(ExecRequest {
                cmd: "sleep 5".into(),
                timeout_ms: Some(100),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 124);
        assert_eq!(resp.stderr, "timed out");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_reaches_grandchildren() {
        // The inner `sleep` is a grandchild of the bash -lc child; a
        // pid-only kill would leave it running past the deadline.
        let marker = format!(
            "{}/sb-grandchild-{}",
            std::env::temp_dir().display(),
            std::process::id()
        );
        let cmd = format!("(sleep 2 && touch {marker}) & wait");
        let resp = executor()
            .run(ExecRequest {
                cmd,
                timeout_ms: Some(100),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 124);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!std::path::Path::new(&marker).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stdin_payload_reaches_the_child() {
        let resp = executor()
            .run(ExecRequest {
                cmd: "cat".into(),
                stdin: Some("hello stdin".into()),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.stdout, "hello stdin");
        assert_eq!(resp.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stdin_payload_is_capped() {
        let payload = "x".repeat(DEFAULT_MAX_STDIN + 1);
        let resp = executor()
            .run(ExecRequest {
                cmd: "wc -c".into(),
                stdin: Some(payload),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 0);
        assert_eq!(resp.stdout.trim(), DEFAULT_MAX_STDIN.to_string());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn output_is_capped_and_flagged() {
        let resp = executor()
            .run(ExecRequest {
                cmd: "printf 'abcdefghij'".into(),
                max_bytes: Some(4),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.stdout, "abcd");
        assert!(resp.stdout_truncated);
        assert!(!resp.stderr_truncated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn env_overrides_win_over_inherited() {
        let mut env = HashMap::new();
        env.insert("SHELLBOX_TEST_VAR".to_string(), "marker-42".to_string());
        let resp = executor()
            .run(ExecRequest {
                cmd: "echo $SHELLBOX_TEST_VAR".into(),
                env: Some(env),
                ..ExecRequest::default()
            })
            .await;
        assert_eq!(resp.stdout, "marker-42\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_binary_reports_launch_failure() {
        let resp = executor()
            .run_script(ScriptRequest {
                shebang: "/definitely/not/a/shell".into(),
                content: "echo hi".into(),
                ..ScriptRequest::default()
            })
            .await;
        // exec of the script fails inside the kernel: ENOENT surfaces as a
        // non-zero exit from the failed exec, not as a spawn error
        assert_ne!(resp.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn script_round_trip() {
        let resp = executor()
            .run_script(ScriptRequest {
                shebang: "/bin/sh".into(),
                content: "echo from-script\nexit 3".into(),
                ..ScriptRequest::default()
            })
            .await;
        assert_eq!(resp.stdout, "from-script\n");
        assert_eq!(resp.exit_code, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn script_requires_shebang_and_content() {
        let resp = executor()
            .run_script(ScriptRequest {
                shebang: "/bin/sh".into(),
                ..ScriptRequest::default()
            })
            .await;
        assert_eq!(resp.exit_code, 127);
        assert_eq!(resp.error.as_deref(), Some("shebang and content required"));
    }
}
