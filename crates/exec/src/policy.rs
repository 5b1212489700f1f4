use regex::Regex;
use tracing::warn;

/// Allow/deny predicate applied to command text before any spawn.
///
/// If an allow-list is present the command must match at least one allow
/// pattern; a deny match always rejects. Patterns come from comma-separated
/// regexes in `SHELLBOX_EXEC_ALLOW` / `SHELLBOX_EXEC_DENY`.
#[derive(Debug, Default)]
pub struct CommandPolicy {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl CommandPolicy {
    pub fn from_env() -> Self {
        Self {
            allow: compile_env("SHELLBOX_EXEC_ALLOW"),
            deny: compile_env("SHELLBOX_EXEC_DENY"),
        }
    }

    pub fn new(allow: Vec<Regex>, deny: Vec<Regex>) -> Self {
        Self { allow, deny }
    }

    /// Accepts everything; the default when no env patterns are set.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn allows(&self, cmd: &str) -> bool {
        if !self.allow.is_empty() && !self.allow.iter().any(|re| re.is_match(cmd)) {
            return false;
        }
        !self.deny.iter().any(|re| re.is_match(cmd))
    }
}

fn compile_env(name: &str) -> Vec<Regex> {
    let Ok(raw) = std::env::var(name) else {
        return Vec::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(err) => {
                warn!(target: "shellbox_exec", "ignoring bad pattern in {}: {}", name, err);
                None
            }
        })
        .collect()
}
