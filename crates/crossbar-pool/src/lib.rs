//! Credential pool and cooldown registry
//!
//! Tracks per-credential health across all configured providers: rate
//! limit cooldowns with exponential backoff, blacklisting on auth
//! failures, and a selection penalty that orders keys for the router.
//! State is process-wide, mutated only through the registry's exported
//! operations, and optionally persisted under a state directory as an
//! append-only health journal plus a rolling quota document.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod key;
pub mod persist;
pub mod registry;

pub use key::{FailureKind, KeyId, KeyState, ProviderKey};
pub use persist::{HealthJournal, QuotaDocument};
pub use registry::{KeyRegistry, KeySnapshot};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
