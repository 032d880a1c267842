use std::sync::atomic::{AtomicU64, Ordering};

use crossbar_config::{Config, PoolConfig};
use dashmap::DashMap;

use crate::key::{FailureKind, KeyId, KeyState, ProviderKey};
use crate::now_ms;
use crate::persist::PersistHandle;

/// Point-in-time view of one credential, handed to the router
///
/// Callers must not hold snapshots past a single selection step; the
/// underlying record keeps changing.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    pub id: KeyId,
    pub state: KeyState,
    pub priority_tier: u32,
    pub selection_penalty: f64,
    pub cooldown_expires_at: Option<u64>,
    pub consecutive_error_count: u32,
}

impl From<&ProviderKey> for KeySnapshot {
    fn from(key: &ProviderKey) -> Self {
        Self {
            id: key.id.clone(),
            state: key.state,
            priority_tier: key.priority_tier,
            selection_penalty: key.selection_penalty,
            cooldown_expires_at: key.cooldown_expires_at,
            consecutive_error_count: key.consecutive_error_count,
        }
    }
}

/// Concurrent registry of credential health records
///
/// Every mutation happens inside the dashmap entry lock for that key,
/// so per-key updates are atomic and constant-work. Snapshots only take
/// read locks.
pub struct KeyRegistry {
    keys: DashMap<String, ProviderKey>,
    cursors: DashMap<String, AtomicU64>,
    config: PoolConfig,
    persist: Option<PersistHandle>,
}

impl KeyRegistry {
    /// Seed the registry from the provider table
    ///
    /// Existing records are discarded; call again on config reload.
    pub fn from_config(config: &Config) -> Self {
        let keys = DashMap::new();
        for (provider_id, provider) in &config.providers {
            for (alias, key_config) in &provider.auth.keys {
                let id = KeyId::new(provider_id.clone(), alias.clone());
                keys.insert(id.to_string(), ProviderKey::new(id, key_config.priority));
            }
        }

        Self {
            keys,
            cursors: DashMap::new(),
            config: config.pool.clone(),
            persist: None,
        }
    }

    /// Attach a persistence handle; subsequent updates are written through
    pub fn set_persistence(&mut self, handle: PersistHandle) {
        self.persist = Some(handle);
    }

    /// Overlay persisted state onto configured keys
    ///
    /// Keys no longer present in config are ignored; runtime state wins
    /// on any later conflict.
    pub fn hydrate(&self, persisted: Vec<ProviderKey>) {
        let now = now_ms();
        for record in persisted {
            let Some(mut entry) = self.keys.get_mut(&record.id.to_string()) else {
                continue;
            };

            // Expired cooldowns and blacklists from a previous run start fresh
            let still_cooling =
                record.state == KeyState::Cooling && record.cooldown_expires_at.is_some_and(|at| at > now);
            if still_cooling {
                entry.state = KeyState::Cooling;
                entry.cooldown_expires_at = record.cooldown_expires_at;
                entry.consecutive_error_count = record.consecutive_error_count;
                entry.failure_count = record.failure_count;
                entry.last_error_code = record.last_error_code;
            }
            entry.selection_penalty = record.selection_penalty;
        }
    }

    /// Ordered eligible credentials for a provider
    ///
    /// Excludes blacklisted keys and keys still cooling; sorts by
    /// priority tier, then selection penalty. Round-robin rotation among
    /// the survivors is the router's job via [`Self::advance_cursor`].
    pub fn snapshot(&self, provider: &str) -> Vec<KeySnapshot> {
        let now = now_ms();
        let mut eligible: Vec<KeySnapshot> = self
            .keys
            .iter()
            .filter(|entry| entry.id.provider == provider && entry.is_eligible(now))
            .map(|entry| KeySnapshot::from(entry.value()))
            .collect();

        eligible.sort_by(|a, b| {
            a.priority_tier
                .cmp(&b.priority_tier)
                .then_with(|| a.selection_penalty.total_cmp(&b.selection_penalty))
                .then_with(|| a.id.alias.cmp(&b.id.alias))
        });

        eligible
    }

    /// Whether a specific credential is currently eligible
    pub fn is_eligible(&self, id: &KeyId) -> bool {
        let now = now_ms();
        self.keys.get(&id.to_string()).is_some_and(|k| k.is_eligible(now))
    }

    /// Record a successful upstream call
    pub fn report_success(&self, id: &KeyId) {
        if let Some(mut entry) = self.keys.get_mut(&id.to_string()) {
            entry.apply_success(&self.config);
        }
        self.write_through();
    }

    /// Record a failed upstream call
    pub fn report_failure(&self, id: &KeyId, kind: FailureKind, status: Option<u16>, retry_after_ms: Option<u64>) {
        if let Some(mut entry) = self.keys.get_mut(&id.to_string()) {
            entry.apply_failure(kind, status, retry_after_ms, &self.config, now_ms());
            if kind == FailureKind::AuthError {
                tracing::error!(key = %entry.id, status, "credential blacklisted until config reload");
            } else {
                tracing::debug!(
                    key = %entry.id,
                    state = ?entry.state,
                    cooldown_until = ?entry.cooldown_expires_at,
                    "credential failure recorded"
                );
            }
        }
        self.write_through();
    }

    /// Advance a route pool's round-robin cursor
    ///
    /// Called once per successful selection; the returned value rotates
    /// ties among equal-priority healthy keys.
    pub fn advance_cursor(&self, pool: &str) -> u64 {
        self.cursors
            .entry(pool.to_owned())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }

    /// Clone every record, for persistence and health reporting
    pub fn dump(&self) -> Vec<ProviderKey> {
        self.keys.iter().map(|entry| entry.value().clone()).collect()
    }

    fn write_through(&self) {
        if let Some(persist) = &self.persist {
            persist.submit(self.dump());
        }
    }
}
