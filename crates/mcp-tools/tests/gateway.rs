//! End-to-end: tools assembled over shared state, every call passing
//! through the admission gate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use mcp_core::{McpError, McpTool};
use shellbox_common::AuditLog;
use shellbox_exec::{CommandPolicy, ShellExecutor};
use shellbox_gate::{Gate, GateConfig};
use shellbox_mcp_tools::gated_toolset;
use shellbox_supervisor::ProcessRegistry;

struct Fixture {
    gate: Arc<Gate>,
    tools: Vec<Arc<dyn McpTool>>,
}

impl Fixture {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let gate = Gate::new(GateConfig {
            max_concurrency: 4,
            default_rps: 1000.0,
            default_timeout: Duration::from_secs(30),
        });
        let executor = Arc::new(
            ShellExecutor::new(CommandPolicy::allow_all(), AuditLog::disabled())
                .with_workspace(std::env::temp_dir()),
        );
        let registry = Arc::new(ProcessRegistry::default());
        let tools = gated_toolset(&gate, executor, registry);
        Self { gate, tools }
    }

    fn tool(&self, name: &str) -> Arc<dyn McpTool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .unwrap_or_else(|| panic!("no tool named {name}"))
    }
}

fn body(result: &Value) -> &Value {
    result.get("structuredContent").expect("structuredContent")
}

fn summary(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("summary text")
}

#[tokio::test(flavor = "multi_thread")]
async fn toolset_exposes_all_seven_tools() {
    let fx = Fixture::new();
    let mut names: Vec<&str> = fx.tools.iter().map(|t| t.name()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "proc.kill",
            "proc.list",
            "proc.spawn",
            "proc.stdin",
            "proc.wait",
            "shell.exec",
            "shell.run_script",
        ]
    );
    for tool in &fx.tools {
        let descriptor = tool.descriptor();
        assert!(!descriptor.description.is_empty());
        assert_eq!(descriptor.input_schema["type"], "object");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_exec_round_trip_through_gate() {
    let fx = Fixture::new();
    let result = fx
        .tool("shell.exec")
        .execute(json!({"cmd": "echo hi"}))
        .await
        .expect("execute");

    assert_eq!(body(&result)["stdout"], "hi\n");
    assert_eq!(body(&result)["exit_code"], 0);
    assert!(summary(&result).contains("exit=0"));

    let stats = fx.gate.metrics().for_tool("shell.exec");
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_exec_timeout_is_classified_by_the_gate() {
    let fx = Fixture::new();
    let result = fx
        .tool("shell.exec")
        .execute(json!({"cmd": "sleep 5", "timeout_ms": 100}))
        .await
        .expect("execute");

    assert_eq!(body(&result)["exit_code"], 124);
    assert_eq!(body(&result)["stderr"], "timed out");

    let stats = fx.gate.metrics().for_tool("shell.exec");
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.timeouts, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_script_round_trip() {
    let fx = Fixture::new();
    let result = fx
        .tool("shell.run_script")
        .execute(json!({"shebang": "/bin/sh", "content": "echo from-script"}))
        .await
        .expect("execute");

    assert_eq!(body(&result)["stdout"], "from-script\n");
    assert_eq!(body(&result)["exit_code"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn proc_lifecycle_spawn_stdin_wait_list() {
    let fx = Fixture::new();

    let spawned = fx
        .tool("proc.spawn")
        .execute(json!({
            "cmd": "/bin/sh",
            "args": ["-c", "read line && echo ok-$line"]
        }))
        .await
        .expect("spawn");
    let pid = body(&spawned)["pid"].as_u64().expect("pid");

    let listed = fx
        .tool("proc.list")
        .execute(json!({}))
        .await
        .expect("list");
    assert_eq!(body(&listed)["processes"][0]["pid"], pid);

    let wrote = fx
        .tool("proc.stdin")
        .execute(json!({"pid": pid, "data": "ping\n"}))
        .await
        .expect("stdin");
    assert_eq!(body(&wrote)["bytes_written"], 5);

    let waited = fx
        .tool("proc.wait")
        .execute(json!({"pid": pid, "timeout_ms": 5000}))
        .await
        .expect("wait");
    assert_eq!(body(&waited)["exit_code"], 0);
    assert_eq!(body(&waited)["stdout"], "ok-ping\n");

    let listed = fx
        .tool("proc.list")
        .execute(json!({}))
        .await
        .expect("list");
    assert_eq!(body(&listed)["processes"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_deadline_reports_timeout_and_keeps_the_process() {
    let fx = Fixture::new();

    let spawned = fx
        .tool("proc.spawn")
        .execute(json!({"cmd": "/bin/sh", "args": ["-c", "sleep 5"]}))
        .await
        .expect("spawn");
    let pid = body(&spawned)["pid"].as_u64().expect("pid");

    let waited = fx
        .tool("proc.wait")
        .execute(json!({"pid": pid, "timeout_ms": 100}))
        .await
        .expect("wait");
    assert_eq!(body(&waited)["exit_code"], 124);
    assert_eq!(body(&waited)["error"], "timeout");

    let stats = fx.gate.metrics().for_tool("proc.wait");
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.timeouts, 1);

    // still registered; kill, then collect
    let killed = fx
        .tool("proc.kill")
        .execute(json!({"pid": pid}))
        .await
        .expect("kill");
    assert_eq!(body(&killed)["killed"], true);

    let waited = fx
        .tool("proc.wait")
        .execute(json!({"pid": pid, "timeout_ms": 5000}))
        .await
        .expect("wait");
    assert_eq!(body(&waited)["exit_code"], 128 + 15);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_pid_surfaces_in_the_result_body() {
    let fx = Fixture::new();

    let killed = fx
        .tool("proc.kill")
        .execute(json!({"pid": 999_999}))
        .await
        .expect("kill");
    assert_eq!(body(&killed)["killed"], false);
    assert!(body(&killed)["error"]
        .as_str()
        .expect("error")
        .contains("unknown pid"));

    let stats = fx.gate.metrics().for_tool("proc.kill");
    assert_eq!(stats.errors, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_params_are_a_protocol_error() {
    let fx = Fixture::new();
    let err = fx
        .tool("proc.wait")
        .execute(json!({"pid": "not-a-number"}))
        .await
        .expect_err("must fail");
    assert!(matches!(err, McpError::InvalidRequest(_)));

    let stats = fx.gate.metrics().for_tool("proc.wait");
    assert_eq!(stats.errors, 1);
}
