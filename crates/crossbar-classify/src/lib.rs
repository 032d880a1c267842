//! Deterministic request classification
//!
//! Maps an extracted view of an inbound request to a named route. Every
//! step is a pure function of the input and the classifier config, so
//! identical inputs always produce identical decisions. Classification
//! never fails: malformed input falls back to the `default` route.

#![allow(clippy::must_use_candidate)]

pub mod signals;
pub mod tokens;

use std::collections::HashSet;

use crossbar_config::ClassifierConfig;
use crossbar_config::classifier::ToolCategory;

pub use signals::ToolSignal;
pub use tokens::{BpeEstimator, HeuristicEstimator, TokenEstimator};

/// Reason string used when classification falls back on malformed input
pub const FALLBACK_REASON: &str = "classification-fallback";

/// Extracted request view fed to the classifier
///
/// The protocol switch builds this from whichever wire shape arrived;
/// the classifier itself is protocol-agnostic.
#[derive(Debug, Default, Clone)]
pub struct ClassifyInput {
    /// Concatenated user-authored text
    pub user_text: String,
    /// System / instructions text
    pub instructions_text: String,
    /// Tool definitions on the request
    pub tools: Vec<ToolSignal>,
    /// Requested model name
    pub model: String,
    /// Whether any message part is an image
    pub has_image_parts: bool,
    /// Bytes of non-text message parts, JSON-serialized, counted into the
    /// token estimate
    pub structured_bytes: usize,
}

/// Outcome of classification
#[derive(Debug, Clone)]
pub struct Classification {
    /// Winning route name; always configured
    pub route: String,
    /// Margin-derived confidence in `[0, 1]`
    pub confidence: f64,
    /// Rules that matched, for the decision log
    pub reasons: Vec<String>,
    /// Original winner when confidence fell below the threshold
    pub alternative: Option<String>,
    /// Estimated total tokens of the request
    pub estimated_tokens: usize,
}

/// Route classifier
pub struct Classifier {
    config: ClassifierConfig,
    estimator: Box<dyn TokenEstimator>,
}

impl Classifier {
    /// Build with the default BPE token estimator
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_estimator(config, Box::new(BpeEstimator))
    }

    /// Build with a custom token estimator
    pub fn with_estimator(config: ClassifierConfig, estimator: Box<dyn TokenEstimator>) -> Self {
        Self { config, estimator }
    }

    /// Classify a request
    ///
    /// Routes are ranked by configured priority; the highest-priority
    /// route whose gates all pass wins. `default` always qualifies.
    pub fn classify(&self, input: &ClassifyInput) -> Classification {
        let combined_text = format!("{}\n{}", input.instructions_text, input.user_text);

        let estimated_tokens = self.estimate_tokens(input);
        let categories = signals::detect_tool_categories(&input.tools, &self.config.tool_detector);
        let has_vision = input.has_image_parts;
        let has_thinking = signals::detect_thinking(&combined_text, &self.config.thinking_keywords);
        let has_coding = signals::detect_coding(&combined_text);

        let mut qualifiers: Vec<(&str, u32, Vec<String>)> = Vec::new();

        for (route, rule) in &self.config.routing_decisions {
            let mut reasons = Vec::new();

            if !rule.tool_types.iter().all(|t| categories.contains(t)) {
                continue;
            }
            if estimated_tokens < rule.token_threshold {
                continue;
            }
            if !self.route_gate(route, has_vision, has_thinking, has_coding, estimated_tokens, &categories) {
                continue;
            }

            match route.as_str() {
                "vision" => reasons.push("image-part-detected".to_owned()),
                "thinking" => reasons.push("thinking-keyword".to_owned()),
                "longContext" => reasons.push(format!("token-estimate:{estimated_tokens}")),
                "coding" => reasons.push("coding-signal".to_owned()),
                _ => {}
            }
            for category in rule.tool_types.iter().filter(|t| categories.contains(t)) {
                reasons.push(format!("tool-category:{category:?}"));
            }
            if reasons.is_empty() {
                reasons.push(format!("route-rule:{route}"));
            }

            qualifiers.push((route, rule.priority, reasons));
        }

        // `default` is the fallback even when the config omits it
        if !qualifiers.iter().any(|(route, ..)| *route == "default") {
            qualifiers.push(("default", 0, vec![FALLBACK_REASON.to_owned()]));
        }

        qualifiers.sort_by(|a, b| b.1.cmp(&a.1));

        let max_priority = self
            .config
            .routing_decisions
            .values()
            .map(|r| r.priority)
            .max()
            .unwrap_or(1)
            .max(1);

        // Margin-derived confidence: 0.5 at a dead tie, 1.0 when the winner
        // outranks everything by the full priority range
        let (winner, winner_priority, reasons) = qualifiers[0].clone();
        let runner_up_priority = qualifiers.get(1).map_or(0, |(_, p, _)| *p);
        let confidence = if winner == "default" {
            1.0
        } else {
            0.5 + f64::from(winner_priority - runner_up_priority) / (2.0 * f64::from(max_priority))
        };

        self.log_shadow_decision(winner, estimated_tokens);

        if winner != "default" && confidence < self.config.confidence_threshold {
            return Classification {
                route: "default".to_owned(),
                confidence,
                reasons: vec![FALLBACK_REASON.to_owned()],
                alternative: Some(winner.to_owned()),
                estimated_tokens,
            };
        }

        Classification {
            route: winner.to_owned(),
            confidence,
            reasons,
            alternative: None,
            estimated_tokens,
        }
    }

    /// Estimate total request tokens: text plus serialized tool schemas
    /// plus structured (non-text) part bytes
    fn estimate_tokens(&self, input: &ClassifyInput) -> usize {
        let mut total = self.estimator.estimate(&input.user_text) + self.estimator.estimate(&input.instructions_text);

        for tool in &input.tools {
            total += self.estimator.estimate(&tool.name);
            if let Some(desc) = &tool.description {
                total += self.estimator.estimate(desc);
            }
        }

        total + input.structured_bytes / 4
    }

    /// Route-specific gates beyond thresholds and tool-type subsets
    fn route_gate(
        &self,
        route: &str,
        has_vision: bool,
        has_thinking: bool,
        has_coding: bool,
        tokens: usize,
        categories: &HashSet<ToolCategory>,
    ) -> bool {
        match route {
            "vision" => has_vision,
            "thinking" => has_thinking,
            "coding" => has_coding,
            "tools" => !categories.is_empty(),
            "longContext" => tokens >= self.config.long_context_threshold_tokens,
            _ => true,
        }
    }

    /// Diagnostic-only shadow of the token-ordering routing variant
    ///
    /// The priority table stays authoritative; a disagreement is logged
    /// and otherwise ignored.
    fn log_shadow_decision(&self, winner: &str, tokens: usize) {
        let shadow = if tokens >= self.config.long_context_threshold_tokens {
            "longContext"
        } else {
            "default"
        };
        if shadow != winner {
            tracing::debug!(authoritative = winner, shadow, tokens, "shadow routing disagreement");
        }
    }
}
