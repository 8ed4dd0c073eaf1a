//! Configuration. `spec.md` Non-goals exclude config *loading mechanics*
//! (file formats, secret stores); what's here is the settings struct itself
//! and environment-variable binding, which every other module needs.

use clap::Parser;

fn default_lease_ttl_seconds() -> i64 {
    900
}

fn default_heartbeat_timeout_seconds() -> i64 {
    120
}

fn default_max_run_minutes() -> i64 {
    45
}

fn default_max_run_tokens() -> i64 {
    120_000
}

fn default_enabled_harnesses() -> String {
    "codex".to_string()
}

/// Process-wide settings, bound from the environment.
#[derive(Debug, Clone, Parser)]
pub struct Settings {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Default ticket lease duration used by `Backlog::claim`.
    #[arg(long, env = "DEFAULT_LEASE_TTL_SECONDS", default_value_t = default_lease_ttl_seconds())]
    pub default_lease_ttl_seconds: i64,

    /// How long a run may go without a heartbeat before `recover_stale`
    /// times it out.
    #[arg(long, env = "RUN_HEARTBEAT_TIMEOUT_SECONDS", default_value_t = default_heartbeat_timeout_seconds())]
    pub run_heartbeat_timeout_seconds: i64,

    /// Default wall-clock budget for a dispatched run.
    #[arg(long, env = "MAX_RUN_MINUTES", default_value_t = default_max_run_minutes())]
    pub max_run_minutes: i64,

    /// Default token budget for a dispatched run.
    #[arg(long, env = "MAX_RUN_TOKENS", default_value_t = default_max_run_tokens())]
    pub max_run_tokens: i64,

    /// Comma-separated harness names this deployment may dispatch to.
    #[arg(long, env = "ENABLED_HARNESSES", default_value_t = default_enabled_harnesses())]
    pub enabled_harnesses: String,
}

impl Settings {
    /// Parse settings from the process environment, ignoring `argv`.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::try_parse_from(["factory-control-plane"])?)
    }

    pub fn enabled_harnesses(&self) -> Vec<&str> {
        self.enabled_harnesses.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_enabled_harnesses() {
        let settings = Settings {
            database_url: "postgres://localhost/factory".to_string(),
            default_lease_ttl_seconds: default_lease_ttl_seconds(),
            run_heartbeat_timeout_seconds: default_heartbeat_timeout_seconds(),
            max_run_minutes: default_max_run_minutes(),
            max_run_tokens: default_max_run_tokens(),
            enabled_harnesses: "codex, aider ,  claude".to_string(),
        };
        assert_eq!(settings.enabled_harnesses(), vec!["codex", "aider", "claude"]);
    }
}
