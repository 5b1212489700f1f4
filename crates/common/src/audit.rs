use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

/// Append-only JSONL audit trail.
///
/// Auditing is best-effort by contract: every I/O failure here is swallowed
/// so that a full or missing log volume can never fail a tool call.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Path from `SHELLBOX_AUDIT_LOG`; default project-local
    /// `.shellbox/audit.jsonl`. An empty value disables auditing.
    pub fn from_env() -> Self {
        match std::env::var("SHELLBOX_AUDIT_LOG") {
            Ok(p) if p.is_empty() => Self { path: None },
            Ok(p) => Self {
                path: Some(PathBuf::from(p)),
            },
            Err(_) => Self {
                path: Some(PathBuf::from(".shellbox/audit.jsonl")),
            },
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Append one record, stamped with the tool name and an RFC 3339 ts.
    pub fn append<T: Serialize>(&self, tool: &str, record: &T) {
        let Some(path) = &self.path else {
            return;
        };
        let line = json!({
            "ts": Utc::now().to_rfc3339(),
            "tool": tool,
            "record": record,
        });
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{line}");
        }
    }
}
