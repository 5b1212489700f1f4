//! MCP tool surface: the synchronous shell tools and the process-registry
//! tools, plus helpers to assemble the full gated toolset.

pub mod proc;
pub mod shell;

use std::sync::Arc;

use serde_json::{json, Value};

use mcp_core::McpTool;
use shellbox_exec::ShellExecutor;
use shellbox_gate::Gate;
use shellbox_supervisor::ProcessRegistry;

pub use proc::{ProcKillTool, ProcListTool, ProcSpawnTool, ProcStdinTool, ProcWaitTool};
pub use shell::{ShellExecTool, ShellRunScriptTool};

/// Standard result envelope: a human-readable summary line plus the flat
/// machine-readable body the admission gate classifies.
pub(crate) fn tool_result(summary: String, body: Value) -> Value {
    json!({
        "content": [
            {
                "type": "text",
                "text": summary
            }
        ],
        "structuredContent": body
    })
}

/// All seven tools over shared executor/registry state, ungated.
pub fn toolset(
    executor: Arc<ShellExecutor>,
    registry: Arc<ProcessRegistry>,
) -> Vec<Arc<dyn McpTool>> {
    vec![
        Arc::new(ShellExecTool::new(executor.clone())),
        Arc::new(ShellRunScriptTool::new(executor)),
        Arc::new(ProcSpawnTool::new(registry.clone())),
        Arc::new(ProcStdinTool::new(registry.clone())),
        Arc::new(ProcWaitTool::new(registry.clone())),
        Arc::new(ProcKillTool::new(registry.clone())),
        Arc::new(ProcListTool::new(registry)),
    ]
}

/// The toolset with every tool behind the admission gate.
pub fn gated_toolset(
    gate: &Arc<Gate>,
    executor: Arc<ShellExecutor>,
    registry: Arc<ProcessRegistry>,
) -> Vec<Arc<dyn McpTool>> {
    toolset(executor, registry)
        .into_iter()
        .map(|tool| gate.wrap(tool))
        .collect()
}
