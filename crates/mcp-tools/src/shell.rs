//! shell.exec and shell.run_script: one-shot bounded execution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use mcp_core::{McpError, McpResult, McpTool};
use shellbox_exec::{ExecRequest, ExecResponse, ScriptRequest, ShellExecutor};

use crate::tool_result;

fn summarize(resp: &ExecResponse) -> String {
    let mut summary = format!("exit={} duration_ms={}", resp.exit_code, resp.duration_ms);
    if resp.stdout_truncated || resp.stderr_truncated {
        summary.push_str(" truncated=true");
    }
    if let Some(err) = &resp.error {
        summary.push_str(&format!(" error={err}"));
    }
    summary
}

fn respond(tool: &str, resp: &ExecResponse) -> McpResult<Value> {
    info!(
        target: "shellbox_mcp_tools",
        "tool {tool} completed | exit={} duration_ms={}",
        resp.exit_code,
        resp.duration_ms
    );
    let body = serde_json::to_value(resp).map_err(|e| McpError::Internal(e.to_string()))?;
    Ok(tool_result(summarize(resp), body))
}

pub struct ShellExecTool {
    executor: Arc<ShellExecutor>,
}

impl ShellExecTool {
    pub fn new(executor: Arc<ShellExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl McpTool for ShellExecTool {
    fn name(&self) -> &str {
        "shell.exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command with capped output and a hard timeout"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "Command line, run through bash -lc"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (defaults to the workspace root)"
                },
                "env": {
                    "type": "object",
                    "description": "Extra environment variables, merged over the inherited set"
                },
                "timeout_ms": {
                    "type": "number",
                    "description": "Wall-clock budget in milliseconds (default 60000)"
                },
                "stdin": {
                    "type": "string",
                    "description": "Data fed to the child's stdin, then closed"
                },
                "max_bytes": {
                    "type": "number",
                    "description": "Per-stream capture cap in bytes (default 1 MiB)"
                },
                "dry_run": {
                    "type": "boolean",
                    "description": "Report what would run without spawning anything"
                }
            },
            "required": ["cmd"]
        })
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let req: ExecRequest =
            serde_json::from_value(params).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        let resp = self.executor.run(req).await;
        respond("shell.exec", &resp)
    }
}

pub struct ShellRunScriptTool {
    executor: Arc<ShellExecutor>,
}

impl ShellRunScriptTool {
    pub fn new(executor: Arc<ShellExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl McpTool for ShellRunScriptTool {
    fn name(&self) -> &str {
        "shell.run_script"
    }

    fn description(&self) -> &str {
        "Write a script to a private temp file and execute it under the same bounds as shell.exec"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "shebang": {
                    "type": "string",
                    "description": "Interpreter line, e.g. /bin/sh or /usr/bin/env python3"
                },
                "content": {
                    "type": "string",
                    "description": "Script body"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (defaults to the workspace root)"
                },
                "env": {
                    "type": "object",
                    "description": "Extra environment variables, merged over the inherited set"
                },
                "timeout_ms": {
                    "type": "number",
                    "description": "Wall-clock budget in milliseconds (default 60000)"
                },
                "max_bytes": {
                    "type": "number",
                    "description": "Per-stream capture cap in bytes (default 1 MiB)"
                }
            },
            "required": ["shebang", "content"]
        })
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let req: ScriptRequest =
            serde_json::from_value(params).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        let resp = self.executor.run_script(req).await;
        respond("shell.run_script", &resp)
    }
}
