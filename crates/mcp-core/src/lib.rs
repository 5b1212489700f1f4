use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("tool call timed out after {0} ms")]
    Timeout(u64),

    #[error("tool call cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    pub fn code(&self) -> i32 {
        match self {
            McpError::InvalidRequest(_) => -32600,
            McpError::ToolNotFound(_) => -32601,
            McpError::ExecutionFailed(_) => -32001,
            McpError::Timeout(_) => -32002,
            McpError::Cancelled => -32003,
            McpError::Internal(_) => -32603,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// One callable tool exposed to the (external) transport layer.
///
/// Implementations must be pure functions of their params plus the
/// process-wide registry/gate state: no hidden per-request globals.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, params: Value) -> McpResult<Value>;
    fn input_schema(&self) -> Value;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
