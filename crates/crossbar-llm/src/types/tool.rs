use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical tool record
///
/// Provider-specific wrappers (`function` nesting, string-encoded
/// schemas) are stripped during normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Normalized tool name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

/// How the model should select tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolChoice {
    /// One of the standard modes
    Mode(ToolChoiceMode),
    /// Force a specific tool by name
    Tool(String),
}

/// Standard tool-choice modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Never call tools
    None,
    /// Model decides
    Auto,
    /// Must call at least one tool
    Required,
}

/// Rename map recorded when normalization had to de-collide tool names
///
/// Keys are the normalized (possibly suffixed) names; values the
/// original wire names. Reverse translation restores originals on the
/// way out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasMap {
    renames: HashMap<String, String>,
}

impl AliasMap {
    /// Record that `normalized` stands for `original`
    pub fn insert(&mut self, normalized: impl Into<String>, original: impl Into<String>) {
        self.renames.insert(normalized.into(), original.into());
    }

    /// Original wire name for a normalized name, if renamed
    pub fn original(&self, normalized: &str) -> Option<&str> {
        self.renames.get(normalized).map(String::as_str)
    }

    /// Restore a possibly-renamed name to its original
    pub fn restore(&self, normalized: &str) -> String {
        self.original(normalized).unwrap_or(normalized).to_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }
}
