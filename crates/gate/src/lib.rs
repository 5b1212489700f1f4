//! Admission control in front of every tool.
//!
//! Each call passes, in order: the per-tool token bucket, the global
//! concurrency semaphore, and a default wall-clock deadline around the
//! inner tool. Outcomes are classified into call/error/timeout counters,
//! including sentinel exit codes embedded in otherwise-successful results.

mod bucket;
mod config;
mod metrics;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;

use mcp_core::{McpError, McpResult, McpTool};

pub use bucket::TokenBucket;
pub use config::GateConfig;
pub use metrics::{Metrics, ToolStats};

pub struct Gate {
    cfg: GateConfig,
    sem: Arc<Semaphore>,
    limiters: Mutex<HashMap<String, Arc<TokenBucket>>>,
    metrics: Arc<Metrics>,
}

impl Gate {
    pub fn new(cfg: GateConfig) -> Arc<Self> {
        Arc::new(Self {
            sem: Arc::new(Semaphore::new(cfg.max_concurrency)),
            limiters: Mutex::new(HashMap::new()),
            metrics: Arc::new(Metrics::default()),
            cfg,
        })
    }

    pub fn from_env() -> Arc<Self> {
        Self::new(GateConfig::from_env())
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    /// Wrap a tool so every call goes through admission control.
    pub fn wrap(self: &Arc<Self>, inner: Arc<dyn McpTool>) -> Arc<dyn McpTool> {
        Arc::new(GatedTool {
            gate: self.clone(),
            inner,
        })
    }

    fn limiter(&self, tool: &str) -> Arc<TokenBucket> {
        let mut map = match self.limiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(tool.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.cfg.rate_for(tool))))
            .clone()
    }
}

struct GatedTool {
    gate: Arc<Gate>,
    inner: Arc<dyn McpTool>,
}

#[async_trait]
impl McpTool for GatedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let tool = self.inner.name().to_string();

        self.gate.limiter(&tool).acquire().await;
        let _permit = match self.gate.sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            // the semaphore only closes when the gate is shutting down
            Err(_) => {
                self.gate.metrics.record_error(&tool);
                return Err(McpError::Cancelled);
            }
        };

        self.gate.metrics.record_call(&tool);
        let start = Instant::now();
        let outcome =
            tokio::time::timeout(self.gate.cfg.default_timeout, self.inner.execute(params)).await;
        self.gate.metrics.observe_duration(&tool, start.elapsed());

        match outcome {
            Err(_) => {
                warn!(target: "shellbox_gate", "deadline exceeded | tool={tool}");
                self.gate.metrics.record_timeout(&tool);
                Err(McpError::Timeout(
                    self.gate.cfg.default_timeout.as_millis() as u64
                ))
            }
            Ok(Err(err)) => {
                self.gate.metrics.record_error(&tool);
                Err(err)
            }
            Ok(Ok(value)) => {
                self.classify(&tool, &value);
                Ok(value)
            }
        }
    }
}

impl GatedTool {
    /// Tools report command failure inside a successful result; fold those
    /// into the counters too. 124 is recorded as both an error and a timeout.
    fn classify(&self, tool: &str, value: &Value) {
        let body = value.get("structuredContent").unwrap_or(value);
        let exit = body
            .get("exit_code")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let error = body.get("error").and_then(Value::as_str).unwrap_or("");
        if exit != 0 || !error.is_empty() {
            self.gate.metrics.record_error(tool);
            if exit == 124 {
                self.gate.metrics.record_timeout(tool);
            }
        }
    }
}
