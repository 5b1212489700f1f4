//! In-process per-tool counters. Snapshots are cheap clones; anything
//! that wants an external scrape surface can build on [`Metrics::snapshot`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolStats {
    pub calls: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub total_duration_ms: u64,
}

#[derive(Default)]
pub struct Metrics {
    inner: Mutex<HashMap<String, ToolStats>>,
}

impl Metrics {
    fn with<F: FnOnce(&mut ToolStats)>(&self, tool: &str, f: F) {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(map.entry(tool.to_string()).or_default());
    }

    pub fn record_call(&self, tool: &str) {
        self.with(tool, |s| s.calls += 1);
    }

    pub fn record_error(&self, tool: &str) {
        debug!(target: "shellbox_gate", "error recorded | tool={tool}");
        self.with(tool, |s| s.errors += 1);
    }

    pub fn record_timeout(&self, tool: &str) {
        debug!(target: "shellbox_gate", "timeout recorded | tool={tool}");
        self.with(tool, |s| s.timeouts += 1);
    }

    pub fn observe_duration(&self, tool: &str, elapsed: Duration) {
        self.with(tool, |s| s.total_duration_ms += elapsed.as_millis() as u64);
    }

    pub fn for_tool(&self, tool: &str) -> ToolStats {
        match self.inner.lock() {
            Ok(guard) => guard.get(tool).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(tool).cloned().unwrap_or_default(),
        }
    }

    pub fn snapshot(&self) -> HashMap<String, ToolStats> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
