//! Token estimation for classification
//!
//! The estimator is pluggable so tests stay deterministic and cheap;
//! production uses a BPE count.

/// Estimates token counts for routing thresholds
pub trait TokenEstimator: Send + Sync {
    /// Approximate token count of a text fragment
    fn estimate(&self, text: &str) -> usize;
}

/// BPE-backed estimator using the `o200k_base` vocabulary
///
/// Falls back to a bytes/4 heuristic when the vocabulary fails to load.
#[derive(Debug, Default)]
pub struct BpeEstimator;

impl TokenEstimator for BpeEstimator {
    fn estimate(&self, text: &str) -> usize {
        tiktoken_rs::o200k_base().map_or_else(
            |_| text.len() / 4,
            |bpe| bpe.encode_with_special_tokens(text).len(),
        )
    }
}

/// bytes/4 heuristic, for tests and constrained builds
#[derive(Debug, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.len() / 4
    }
}
