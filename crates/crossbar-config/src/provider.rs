use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Configuration for a single upstream provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Wire protocol the provider speaks
    #[serde(rename = "type")]
    pub protocol: ProviderProtocol,
    /// API base URL
    pub base_url: Url,
    /// Header template applied to every upstream request; values may
    /// contain the `{key}` placeholder which expands to the selected
    /// credential secret
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Credential pool for this provider
    #[serde(default)]
    pub auth: AuthConfig,
    /// Models served by this provider
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
}

/// Wire protocols an upstream provider can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProtocol {
    /// OpenAI-style chat completions
    Chat,
    /// OpenAI-style responses API
    Responses,
    /// Anthropic messages API
    Anthropic,
}

impl ProviderProtocol {
    /// Protocol name as used in logs and routing decisions
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Responses => "responses",
            Self::Anthropic => "anthropic",
        }
    }
}

/// Credential configuration for a provider
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Ordered credential table: alias -> key
    #[serde(default)]
    pub keys: IndexMap<String, KeyConfig>,
}

/// One credential belonging to a provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    /// Secret value sent to the provider
    pub value: SecretString,
    /// Selection tier; lower tiers are preferred
    #[serde(default)]
    pub priority: u32,
}

/// Per-model settings
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Context budget advertised for this model
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Whether the provider can stream this model
    #[serde(default = "default_true")]
    pub supports_streaming: bool,
}

const fn default_true() -> bool {
    true
}
