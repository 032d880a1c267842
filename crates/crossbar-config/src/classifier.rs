use indexmap::IndexMap;
use serde::Deserialize;

/// Request classification configuration
///
/// Defaults reproduce the stock route table, so a config file only needs
/// to override what differs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Model tiers referenced by routing decisions
    #[serde(default = "default_model_tiers")]
    pub model_tiers: IndexMap<String, ModelTier>,
    /// Case-insensitive substrings that flag an extended-reasoning request
    #[serde(default = "default_thinking_keywords")]
    pub thinking_keywords: Vec<String>,
    /// Per-route qualification rules
    #[serde(default = "default_routing_decisions")]
    pub routing_decisions: IndexMap<String, RouteRule>,
    /// Substring patterns that put a tool into a category
    #[serde(default)]
    pub tool_detector: ToolDetectorConfig,
    /// Token count at which a request counts as long-context
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold_tokens: usize,
    /// Decisions scoring below this margin fall back to `default`
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_tiers: default_model_tiers(),
            thinking_keywords: default_thinking_keywords(),
            routing_decisions: default_routing_decisions(),
            tool_detector: ToolDetectorConfig::default(),
            long_context_threshold_tokens: default_long_context_threshold(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// A named capability tier of models
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelTier {
    /// Model names belonging to the tier
    #[serde(default)]
    pub models: Vec<String>,
    /// Context budget shared by the tier
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Qualification rule for one route
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteRule {
    /// Tier the route draws from (informational; pools pick the model)
    #[serde(default)]
    pub model_tier: Option<String>,
    /// Minimum estimated tokens for the route to qualify
    #[serde(default)]
    pub token_threshold: usize,
    /// Tool categories that must all be present (empty matches any)
    #[serde(default)]
    pub tool_types: Vec<ToolCategory>,
    /// Rank among qualifying routes; highest wins
    pub priority: u32,
}

/// Categories a tool definition can be classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolCategory {
    WebSearch,
    CodeExecution,
    FileSearch,
    DataAnalysis,
}

/// Substring patterns matched against tool names and descriptions
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDetectorConfig {
    #[serde(default = "default_web_search_patterns")]
    pub web_search: Vec<String>,
    #[serde(default = "default_code_execution_patterns")]
    pub code_execution: Vec<String>,
    #[serde(default = "default_file_search_patterns")]
    pub file_search: Vec<String>,
    #[serde(default = "default_data_analysis_patterns")]
    pub data_analysis: Vec<String>,
}

impl Default for ToolDetectorConfig {
    fn default() -> Self {
        Self {
            web_search: default_web_search_patterns(),
            code_execution: default_code_execution_patterns(),
            file_search: default_file_search_patterns(),
            data_analysis: default_data_analysis_patterns(),
        }
    }
}

const fn default_long_context_threshold() -> usize {
    32_768
}

const fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_model_tiers() -> IndexMap<String, ModelTier> {
    let mut tiers = IndexMap::new();
    tiers.insert(
        "basic".to_owned(),
        ModelTier {
            models: Vec::new(),
            max_tokens: Some(32_768),
        },
    );
    tiers.insert(
        "advanced".to_owned(),
        ModelTier {
            models: Vec::new(),
            max_tokens: Some(262_144),
        },
    );
    tiers
}

fn default_thinking_keywords() -> Vec<String> {
    [
        "think step by step",
        "step-by-step reasoning",
        "reason through",
        "chain of thought",
        "逐步推理",
        "深入思考",
    ]
    .map(str::to_owned)
    .to_vec()
}

fn default_routing_decisions() -> IndexMap<String, RouteRule> {
    let rule = |tier: &str, tokens: usize, tools: &[ToolCategory], priority: u32| RouteRule {
        model_tier: Some(tier.to_owned()),
        token_threshold: tokens,
        tool_types: tools.to_vec(),
        priority,
    };

    let mut decisions = IndexMap::new();
    decisions.insert("vision".to_owned(), rule("advanced", 0, &[], 70));
    decisions.insert("thinking".to_owned(), rule("advanced", 0, &[], 60));
    decisions.insert("tools".to_owned(), rule("advanced", 0, &[ToolCategory::CodeExecution], 50));
    decisions.insert("longContext".to_owned(), rule("advanced", 32_768, &[], 40));
    decisions.insert("coding".to_owned(), rule("advanced", 0, &[], 30));
    decisions.insert("webSearch".to_owned(), rule("basic", 0, &[ToolCategory::WebSearch], 20));
    decisions.insert("default".to_owned(), rule("basic", 0, &[], 0));
    decisions
}

fn default_web_search_patterns() -> Vec<String> {
    ["web_search", "search_web", "browse", "google", "bing", "duckduckgo"]
        .map(str::to_owned)
        .to_vec()
}

fn default_code_execution_patterns() -> Vec<String> {
    ["shell", "exec", "bash", "python", "run_code", "code_interpreter", "terminal"]
        .map(str::to_owned)
        .to_vec()
}

fn default_file_search_patterns() -> Vec<String> {
    ["file_search", "list_files", "read_file", "glob", "grep"]
        .map(str::to_owned)
        .to_vec()
}

fn default_data_analysis_patterns() -> Vec<String> {
    ["sql", "query_data", "dataframe", "analyze_data", "spreadsheet"]
        .map(str::to_owned)
        .to_vec()
}
