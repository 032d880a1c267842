//! Tool-schema normalization
//!
//! Canonicalizes tool definitions arriving in any wire shape: unwraps
//! `function` nesting, enforces the name grammar, parses string-encoded
//! schemas, de-collides duplicate names, and validates tool-call
//! arguments against known schemas.

use std::collections::HashSet;

use crate::error::GatewayError;
use crate::types::{AliasMap, ToolDefinition};

/// Markup fragments that betray a model echoing tool-use syntax into the
/// arguments channel instead of JSON
const MARKUP_TOKENS: &[&str] = &["<tool_use", "</tool_use", "<function", "```", "<invoke"];

/// Whether `name` matches `[A-Za-z_][A-Za-z0-9_]*`
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replace grammar-violating characters so the name parses upstream
fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Normalize a raw tool list into canonical records plus a rename map
///
/// - names failing the grammar are sanitized (recorded in the alias map)
/// - `parameters` delivered as a JSON string is parsed
/// - colliding normalized names get a deterministic `_2`, `_3`… suffix
///
/// Tools without a usable name are dropped with a warning.
pub fn normalize_tools(raw: Vec<RawTool>) -> (Vec<ToolDefinition>, AliasMap) {
    let mut tools = Vec::with_capacity(raw.len());
    let mut aliases = AliasMap::default();
    let mut taken: HashSet<String> = HashSet::new();

    for tool in raw {
        let Some(original_name) = tool.name.filter(|n| !n.is_empty()) else {
            tracing::warn!("dropping tool definition without a name");
            continue;
        };

        let mut name = if is_valid_name(&original_name) {
            original_name.clone()
        } else {
            sanitize_name(&original_name)
        };

        if taken.contains(&name) {
            let mut suffix = 2;
            while taken.contains(&format!("{name}_{suffix}")) {
                suffix += 1;
            }
            name = format!("{name}_{suffix}");
        }

        if name != original_name {
            aliases.insert(name.clone(), original_name);
        }
        taken.insert(name.clone());

        let parameters = match tool.parameters {
            Some(serde_json::Value::String(encoded)) => serde_json::from_str(&encoded)
                .unwrap_or_else(|e| {
                    tracing::warn!(tool = %name, error = %e, "unparseable string-encoded schema, substituting empty object schema");
                    empty_schema()
                }),
            Some(value) => value,
            None => empty_schema(),
        };

        tools.push(ToolDefinition {
            name,
            description: tool.description,
            parameters,
        });
    }

    (tools, aliases)
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Wire-agnostic raw tool, produced by the protocol codecs before
/// normalization
#[derive(Debug, Clone, Default)]
pub struct RawTool {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<serde_json::Value>,
}

impl RawTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Validate a tool call's arguments string
///
/// Parse failures are tolerated (the raw string is forwarded) unless the
/// payload contains known markup tokens, which marks a structurally
/// broken call. For tools whose schema declares `properties`, top-level
/// argument keys outside the schema fail validation.
pub fn validate_arguments(name: &str, arguments: &str, tools: &[ToolDefinition]) -> Result<(), GatewayError> {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(arguments);

    let Ok(value) = parsed else {
        if MARKUP_TOKENS.iter().any(|t| arguments.contains(t)) {
            return Err(GatewayError::SwitchFailed(format!(
                "tool call '{name}' carries markup instead of JSON arguments"
            )));
        }
        // Unparseable but markup-free: forwarded as-is
        return Ok(());
    };

    let Some(tool) = tools.iter().find(|t| t.name == name) else {
        return Ok(());
    };

    let Some(allowed) = tool.parameters.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    if allowed.is_empty() {
        return Ok(());
    }

    if let Some(object) = value.as_object() {
        for key in object.keys() {
            if !allowed.contains_key(key) {
                return Err(GatewayError::SwitchFailed(format!(
                    "tool call '{name}' argument '{key}' is not in the tool schema"
                )));
            }
        }
    }

    Ok(())
}
