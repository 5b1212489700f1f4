use std::time::Duration;

use shellbox_common::limits::{parse_env_f64, parse_env_u64, DEFAULT_TIMEOUT_MS};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_RPS: f64 = 5.0;

/// Admission-control knobs. Per-tool rate overrides are looked up lazily
/// via [`GateConfig::rate_for`].
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub max_concurrency: usize,
    pub default_rps: f64,
    pub default_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_rps: DEFAULT_RPS,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = parse_env_u64("SHELLBOX_MAX_CONCURRENCY") {
            if n > 0 {
                cfg.max_concurrency = n as usize;
            }
        }
        if let Some(rps) = parse_env_f64("SHELLBOX_DEFAULT_RPS") {
            if rps > 0.0 {
                cfg.default_rps = rps;
            }
        }
        if let Some(ms) = parse_env_u64("SHELLBOX_DEFAULT_TIMEOUT_MS") {
            if ms > 0 {
                cfg.default_timeout = Duration::from_millis(ms);
            }
        }
        cfg
    }

    /// Sustained rate for one tool: `SHELLBOX_RATE_LIMIT_<TOOL>` with the
    /// tool name uppercased and dots mapped to underscores, else the default.
    pub fn rate_for(&self, tool: &str) -> f64 {
        let env_name = format!(
            "SHELLBOX_RATE_LIMIT_{}",
            tool.to_uppercase().replace('.', "_")
        );
        match parse_env_f64(&env_name) {
            Some(rps) if rps > 0.0 => rps,
            _ => self.default_rps,
        }
    }
}
