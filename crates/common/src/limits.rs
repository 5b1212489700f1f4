use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock budget for one tool call.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Default per-stream capture cap (stdout and stderr each).
pub const DEFAULT_MAX_IO: usize = 1 << 20; // 1 MiB
/// Cap on any stdin payload fed to a child.
pub const DEFAULT_MAX_STDIN: usize = 1 << 20; // 1 MiB

pub fn parse_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse::<u64>().ok()
}

pub fn parse_env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok()?.parse::<f64>().ok()
}

pub fn clamp(v: u64, min: u64, max: u64) -> u64 {
    v.max(min).min(max)
}

/// Effective timeout for a call: param → default, floored at 1 ms.
pub fn resolve_timeout(param_timeout_ms: Option<u64>) -> Duration {
    let ms = match param_timeout_ms {
        Some(ms) if ms > 0 => ms,
        _ => DEFAULT_TIMEOUT_MS,
    };
    Duration::from_millis(ms)
}

/// Effective per-stream byte cap: param → default.
pub fn resolve_max_bytes(param_max_bytes: Option<u64>) -> usize {
    match param_max_bytes {
        Some(n) if n > 0 => n as usize,
        _ => DEFAULT_MAX_IO,
    }
}

/// Working-directory root for children that do not name a cwd.
/// `WORKSPACE` env if set, otherwise the child inherits ours.
pub fn workspace_root() -> Option<PathBuf> {
    match std::env::var("WORKSPACE") {
        Ok(ws) if !ws.is_empty() => Some(PathBuf::from(ws)),
        _ => None,
    }
}
