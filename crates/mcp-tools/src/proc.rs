//! proc.* tools: the asynchronous process registry surface.
//!
//! Registry failures that describe the child (unknown pid, dead stdin) are
//! reported inside the result body, not as protocol errors, so the gate can
//! classify them and the caller sees a structured outcome.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use mcp_core::{McpError, McpResult, McpTool};
use shellbox_supervisor::{ProcessRegistry, SpawnRequest};

use crate::tool_result;

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub struct ProcSpawnTool {
    registry: Arc<ProcessRegistry>,
}

impl ProcSpawnTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpTool for ProcSpawnTool {
    fn name(&self) -> &str {
        "proc.spawn"
    }

    fn description(&self) -> &str {
        "Spawn a long-running process detached from the call; returns its pid"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "Executable to spawn (not run through a shell)"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Argument vector"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (defaults to the workspace root)"
                },
                "env": {
                    "type": "object",
                    "description": "Extra environment variables, merged over the inherited set"
                },
                "tty": {
                    "type": "boolean",
                    "description": "Allocate a pseudo-terminal; output is a single combined stream"
                }
            },
            "required": ["cmd"]
        })
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let start = Instant::now();
        let req: SpawnRequest =
            serde_json::from_value(params).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        match self.registry.spawn(&req) {
            Ok(pid) => {
                info!(target: "shellbox_mcp_tools", "tool proc.spawn completed | pid={pid}");
                Ok(tool_result(
                    format!("pid={pid}"),
                    json!({ "pid": pid, "duration_ms": elapsed_ms(start) }),
                ))
            }
            Err(err) => Ok(tool_result(
                format!("spawn failed: {err}"),
                json!({ "error": err.to_string(), "duration_ms": elapsed_ms(start) }),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StdinToolRequest {
    pub pid: u32,
    pub data: String,
}

pub struct ProcStdinTool {
    registry: Arc<ProcessRegistry>,
}

impl ProcStdinTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpTool for ProcStdinTool {
    fn name(&self) -> &str {
        "proc.stdin"
    }

    fn description(&self) -> &str {
        "Write data to a spawned process's stdin (capped at 1 MiB per call)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pid": { "type": "number", "description": "Pid returned by proc.spawn" },
                "data": { "type": "string", "description": "Bytes to write" }
            },
            "required": ["pid", "data"]
        })
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let start = Instant::now();
        let req: StdinToolRequest =
            serde_json::from_value(params).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        match self.registry.write_stdin(req.pid, req.data.as_bytes()).await {
            Ok(n) => Ok(tool_result(
                format!("bytes_written={n}"),
                json!({ "bytes_written": n, "duration_ms": elapsed_ms(start) }),
            )),
            Err(err) => Ok(tool_result(
                format!("stdin failed: {err}"),
                json!({
                    "bytes_written": 0,
                    "error": err.to_string(),
                    "duration_ms": elapsed_ms(start)
                }),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WaitToolRequest {
    pub pid: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub struct ProcWaitTool {
    registry: Arc<ProcessRegistry>,
}

impl ProcWaitTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpTool for ProcWaitTool {
    fn name(&self) -> &str {
        "proc.wait"
    }

    fn description(&self) -> &str {
        "Wait for a spawned process to exit and collect its output. \
         A deadline leaves the process running and registered."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pid": { "type": "number", "description": "Pid returned by proc.spawn" },
                "timeout_ms": {
                    "type": "number",
                    "description": "How long to wait in milliseconds (default 60000)"
                }
            },
            "required": ["pid"]
        })
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let start = Instant::now();
        let req: WaitToolRequest =
            serde_json::from_value(params).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        match self.registry.wait(req.pid, req.timeout_ms).await {
            Ok(outcome) => {
                info!(
                    target: "shellbox_mcp_tools",
                    "tool proc.wait completed | pid={} exit={} timed_out={}",
                    req.pid,
                    outcome.exit_code,
                    outcome.timed_out
                );
                let mut body = json!({
                    "exit_code": outcome.exit_code,
                    "stdout": outcome.stdout,
                    "stderr": outcome.stderr,
                    "truncated": outcome.truncated,
                    "duration_ms": elapsed_ms(start)
                });
                if outcome.timed_out {
                    body["error"] = Value::from("timeout");
                }
                Ok(tool_result(
                    format!(
                        "exit={} timed_out={}",
                        outcome.exit_code, outcome.timed_out
                    ),
                    body,
                ))
            }
            Err(err) => Ok(tool_result(
                format!("wait failed: {err}"),
                json!({
                    "exit_code": 1,
                    "error": err.to_string(),
                    "duration_ms": elapsed_ms(start)
                }),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct KillToolRequest {
    pub pid: u32,
    #[serde(default)]
    pub signal: Option<i32>,
}

pub struct ProcKillTool {
    registry: Arc<ProcessRegistry>,
}

impl ProcKillTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpTool for ProcKillTool {
    fn name(&self) -> &str {
        "proc.kill"
    }

    fn description(&self) -> &str {
        "Signal a spawned process's group (SIGTERM by default). \
         The exit code still has to be collected with proc.wait."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pid": { "type": "number", "description": "Pid returned by proc.spawn" },
                "signal": {
                    "type": "number",
                    "description": "Signal number (default 15 = SIGTERM)"
                }
            },
            "required": ["pid"]
        })
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let start = Instant::now();
        let req: KillToolRequest =
            serde_json::from_value(params).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        match self.registry.kill(req.pid, req.signal) {
            Ok(()) => {
                info!(
                    target: "shellbox_mcp_tools",
                    "tool proc.kill completed | pid={} signal={:?}",
                    req.pid,
                    req.signal
                );
                Ok(tool_result(
                    format!("killed pid={}", req.pid),
                    json!({ "killed": true, "duration_ms": elapsed_ms(start) }),
                ))
            }
            Err(err) => Ok(tool_result(
                format!("kill failed: {err}"),
                json!({
                    "killed": false,
                    "error": err.to_string(),
                    "duration_ms": elapsed_ms(start)
                }),
            )),
        }
    }
}

pub struct ProcListTool {
    registry: Arc<ProcessRegistry>,
}

impl ProcListTool {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpTool for ProcListTool {
    fn name(&self) -> &str {
        "proc.list"
    }

    fn description(&self) -> &str {
        "List registered processes that have not been collected yet"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value) -> McpResult<Value> {
        let start = Instant::now();
        let procs = self.registry.list();
        let count = procs.len();
        let body = json!({
            "processes": procs,
            "duration_ms": elapsed_ms(start)
        });
        Ok(tool_result(format!("count={count}"), body))
    }
}
