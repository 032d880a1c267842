//! Credential state persistence
//!
//! Two files live under the configured state directory:
//!
//! - `health.jsonl` — append-only journal of full pool snapshots, one
//!   JSON record per line. A background task compacts the file down to
//!   the latest record once it grows past the configured threshold.
//! - `provider-quota.json` — rolling document holding the latest view,
//!   rewritten whole on every update.
//!
//! The registry stays authoritative at runtime; disk is an eventually
//! consistent mirror used only to seed state at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::key::{KeyId, KeyState, ProviderKey};

const HEALTH_FILE: &str = "health.jsonl";
const QUOTA_FILE: &str = "provider-quota.json";

/// One line of `health.jsonl`
#[derive(Debug, Serialize, Deserialize)]
struct HealthRecord {
    kind: String,
    snapshot: HealthSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthSnapshot {
    providers: Vec<KeyRecord>,
    cooldowns: Vec<CooldownRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    key: String,
    state: KeyState,
    priority_tier: u32,
    selection_penalty: f64,
    failure_count: u32,
    consecutive_error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error_code: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CooldownRecord {
    key: String,
    until_ms: u64,
}

/// Rolling `provider-quota.json` document
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QuotaDocument {
    pub providers: BTreeMap<String, QuotaEntry>,
}

/// Per-credential entry of the quota document
#[derive(Debug, Serialize, Deserialize)]
pub struct QuotaEntry {
    pub in_pool: bool,
    pub priority_tier: u32,
    pub selection_penalty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<u16>,
    pub consecutive_error_count: u32,
}

/// Write handle given to the registry
///
/// `submit` never blocks; updates queue onto the writer task.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<Vec<ProviderKey>>,
}

impl PersistHandle {
    pub fn submit(&self, keys: Vec<ProviderKey>) {
        // A closed channel means shutdown is in progress; drop the update
        let _ = self.tx.send(keys);
    }
}

/// Journal writer owning the state directory
pub struct HealthJournal {
    dir: PathBuf,
    compaction_threshold: usize,
    lines_written: usize,
}

impl HealthJournal {
    /// Spawn the writer task and return its handle
    ///
    /// # Errors
    ///
    /// Returns an error when the state directory cannot be created.
    pub fn spawn(dir: &Path, compaction_threshold: usize) -> std::io::Result<PersistHandle> {
        std::fs::create_dir_all(dir)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ProviderKey>>();
        let mut journal = Self {
            dir: dir.to_path_buf(),
            compaction_threshold,
            lines_written: Self::count_lines(&dir.join(HEALTH_FILE)),
        };

        tokio::spawn(async move {
            while let Some(keys) = rx.recv().await {
                if let Err(e) = journal.write_update(&keys) {
                    tracing::warn!(error = %e, "failed to persist pool state");
                }
            }
        });

        Ok(PersistHandle { tx })
    }

    fn count_lines(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn write_update(&mut self, keys: &[ProviderKey]) -> std::io::Result<()> {
        let record = build_record(keys);
        let line = serde_json::to_string(&record)?;

        let health_path = self.dir.join(HEALTH_FILE);
        if self.lines_written >= self.compaction_threshold {
            // Compact: the latest snapshot subsumes the whole journal
            std::fs::write(&health_path, format!("{line}\n"))?;
            self.lines_written = 1;
        } else {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&health_path)?;
            writeln!(file, "{line}")?;
            self.lines_written += 1;
        }

        let quota = build_quota(keys);
        let quota_path = self.dir.join(QUOTA_FILE);
        let tmp = self.dir.join(format!("{QUOTA_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&quota)?)?;
        std::fs::rename(&tmp, &quota_path)?;

        Ok(())
    }
}

fn build_record(keys: &[ProviderKey]) -> HealthRecord {
    HealthRecord {
        kind: "snapshot".to_owned(),
        snapshot: HealthSnapshot {
            providers: keys
                .iter()
                .map(|k| KeyRecord {
                    key: k.id.to_string(),
                    state: k.state,
                    priority_tier: k.priority_tier,
                    selection_penalty: k.selection_penalty,
                    failure_count: k.failure_count,
                    consecutive_error_count: k.consecutive_error_count,
                    last_error_code: k.last_error_code,
                })
                .collect(),
            cooldowns: keys
                .iter()
                .filter_map(|k| {
                    k.cooldown_expires_at.map(|until_ms| CooldownRecord {
                        key: k.id.to_string(),
                        until_ms,
                    })
                })
                .collect(),
        },
    }
}

fn build_quota(keys: &[ProviderKey]) -> QuotaDocument {
    let providers = keys
        .iter()
        .map(|k| {
            (
                k.id.to_string(),
                QuotaEntry {
                    in_pool: k.state != KeyState::Blacklisted,
                    priority_tier: k.priority_tier,
                    selection_penalty: k.selection_penalty,
                    cooldown_until: k.cooldown_expires_at,
                    blacklist_until: (k.state == KeyState::Blacklisted).then(|| "config-reload".to_owned()),
                    last_error_code: k.last_error_code,
                    consecutive_error_count: k.consecutive_error_count,
                },
            )
        })
        .collect();

    QuotaDocument { providers }
}

/// Load persisted credential state from a state directory
///
/// Prefers the quota document; falls back to the last `health.jsonl`
/// snapshot. Missing or corrupt files yield an empty result rather than
/// an error, so a damaged state directory never blocks startup.
pub fn load_state(dir: &Path) -> Vec<ProviderKey> {
    if let Some(keys) = load_quota(&dir.join(QUOTA_FILE)) {
        return keys;
    }
    load_last_snapshot(&dir.join(HEALTH_FILE)).unwrap_or_default()
}

fn load_quota(path: &Path) -> Option<Vec<ProviderKey>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let doc: QuotaDocument = serde_json::from_str(&raw)
        .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt quota document"))
        .ok()?;

    let keys = doc
        .providers
        .into_iter()
        .filter_map(|(raw_id, entry)| {
            let id = KeyId::parse(&raw_id)?;
            let state = if entry.blacklist_until.is_some() {
                KeyState::Blacklisted
            } else if entry.cooldown_until.is_some() {
                KeyState::Cooling
            } else {
                KeyState::Healthy
            };
            Some(ProviderKey {
                id,
                state,
                failure_count: entry.consecutive_error_count,
                cooldown_expires_at: entry.cooldown_until,
                priority_tier: entry.priority_tier,
                selection_penalty: entry.selection_penalty,
                last_error_code: entry.last_error_code,
                consecutive_error_count: entry.consecutive_error_count,
            })
        })
        .collect();

    Some(keys)
}

fn load_last_snapshot(path: &Path) -> Option<Vec<ProviderKey>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let record: HealthRecord = raw.lines().rev().find_map(|line| serde_json::from_str(line).ok())?;

    let cooldowns: BTreeMap<String, u64> = record
        .snapshot
        .cooldowns
        .into_iter()
        .map(|c| (c.key, c.until_ms))
        .collect();

    let keys = record
        .snapshot
        .providers
        .into_iter()
        .filter_map(|k| {
            let id = KeyId::parse(&k.key)?;
            Some(ProviderKey {
                cooldown_expires_at: cooldowns.get(&k.key).copied(),
                id,
                state: k.state,
                failure_count: k.failure_count,
                priority_tier: k.priority_tier,
                selection_penalty: k.selection_penalty,
                last_error_code: k.last_error_code,
                consecutive_error_count: k.consecutive_error_count,
            })
        })
        .collect();

    Some(keys)
}
