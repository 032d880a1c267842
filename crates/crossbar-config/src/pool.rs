use serde::Deserialize;

/// Tuning for the credential pool and cooldown registry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Base backoff for rate-limited keys, in milliseconds
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_base_backoff_ms: u64,
    /// Base backoff for server errors, in milliseconds
    #[serde(default = "default_server_error_backoff")]
    pub server_error_base_backoff_ms: u64,
    /// Penalty added to a key on each failure
    #[serde(default = "default_penalty_bump")]
    pub penalty_bump: f64,
    /// Penalty subtracted on each success (floored at zero)
    #[serde(default = "default_penalty_decay")]
    pub penalty_decay: f64,
    /// Rewrite the health journal once it exceeds this many records
    #[serde(default = "default_compaction_threshold")]
    pub health_compaction_threshold: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rate_limit_base_backoff_ms: default_rate_limit_backoff(),
            server_error_base_backoff_ms: default_server_error_backoff(),
            penalty_bump: default_penalty_bump(),
            penalty_decay: default_penalty_decay(),
            health_compaction_threshold: default_compaction_threshold(),
        }
    }
}

const fn default_rate_limit_backoff() -> u64 {
    2_000
}

const fn default_server_error_backoff() -> u64 {
    500
}

const fn default_penalty_bump() -> f64 {
    1.0
}

const fn default_penalty_decay() -> f64 {
    0.5
}

const fn default_compaction_threshold() -> usize {
    4_096
}
