use crossbar_config::PoolConfig;
use serde::{Deserialize, Serialize};

/// Identifies one credential: `providerId.keyAlias`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId {
    /// Provider the credential belongs to
    pub provider: String,
    /// Human-readable alias within the provider
    pub alias: String,
}

impl KeyId {
    pub fn new(provider: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            alias: alias.into(),
        }
    }

    /// Parse a `provider.alias` pair; the alias is everything after the
    /// last dot
    pub fn parse(raw: &str) -> Option<Self> {
        let (provider, alias) = raw.rsplit_once('.')?;
        if provider.is_empty() || alias.is_empty() {
            return None;
        }
        Some(Self::new(provider, alias))
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.provider, self.alias)
    }
}

/// Health state of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    /// Eligible for selection
    Healthy,
    /// Temporarily ineligible until the cooldown expires
    Cooling,
    /// Ineligible until the next config reload
    Blacklisted,
}

/// Classified upstream failure, as reported by the provider pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429
    RateLimited,
    /// 5xx, network, TLS, or read timeout
    ServerError,
    /// 401/403
    AuthError,
    /// Any other 4xx; surfaced verbatim, no key state change
    ClientError,
}

/// Exponent cap for the cooldown backoff
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Mutable health record for one credential
///
/// Only the registry mutates these, inside a per-key critical section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKey {
    /// Credential identity
    pub id: KeyId,
    /// Current health state
    pub state: KeyState,
    /// Total failures since the last success
    pub failure_count: u32,
    /// Epoch millis at which a cooling key becomes eligible again
    pub cooldown_expires_at: Option<u64>,
    /// Selection tier from config; lower is preferred
    pub priority_tier: u32,
    /// Soft ordering penalty, bumped on failure and decayed on success
    pub selection_penalty: f64,
    /// HTTP status of the most recent failure
    pub last_error_code: Option<u16>,
    /// Consecutive failures; drives the backoff exponent
    pub consecutive_error_count: u32,
}

impl ProviderKey {
    /// Fresh healthy record for a configured credential
    pub fn new(id: KeyId, priority_tier: u32) -> Self {
        Self {
            id,
            state: KeyState::Healthy,
            failure_count: 0,
            cooldown_expires_at: None,
            priority_tier,
            selection_penalty: 0.0,
            last_error_code: None,
            consecutive_error_count: 0,
        }
    }

    /// Whether the key may be handed out at `now_ms`
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        match self.state {
            KeyState::Healthy => true,
            KeyState::Blacklisted => false,
            KeyState::Cooling => self.cooldown_expires_at.is_none_or(|at| at <= now_ms),
        }
    }

    /// Record a successful call: reset counters, decay the penalty
    pub fn apply_success(&mut self, config: &PoolConfig) {
        self.state = KeyState::Healthy;
        self.failure_count = 0;
        self.consecutive_error_count = 0;
        self.cooldown_expires_at = None;
        self.last_error_code = None;
        self.selection_penalty = (self.selection_penalty - config.penalty_decay).max(0.0);
    }

    /// Record a failed call per the cooldown table
    ///
    /// Rate limits and server errors put the key into cooling with an
    /// exponential backoff (any `Retry-After` hint wins when larger);
    /// auth errors blacklist the key until config reload; other client
    /// errors leave key state untouched.
    pub fn apply_failure(
        &mut self,
        kind: FailureKind,
        status: Option<u16>,
        retry_after_hint_ms: Option<u64>,
        config: &PoolConfig,
        now_ms: u64,
    ) {
        self.last_error_code = status;

        match kind {
            FailureKind::RateLimited | FailureKind::ServerError => {
                self.failure_count += 1;
                let base = match kind {
                    FailureKind::RateLimited => config.rate_limit_base_backoff_ms,
                    _ => config.server_error_base_backoff_ms,
                };
                let exponent = self.consecutive_error_count.min(MAX_BACKOFF_EXPONENT);
                let backoff = base.saturating_mul(1u64 << exponent);
                let cooldown = retry_after_hint_ms.map_or(backoff, |hint| hint.max(backoff));

                self.consecutive_error_count += 1;
                self.state = KeyState::Cooling;
                self.cooldown_expires_at = Some(now_ms + cooldown);
                self.selection_penalty += config.penalty_bump;
            }
            FailureKind::AuthError => {
                self.failure_count += 1;
                self.consecutive_error_count += 1;
                self.state = KeyState::Blacklisted;
                self.cooldown_expires_at = None;
            }
            FailureKind::ClientError => {}
        }
    }
}
