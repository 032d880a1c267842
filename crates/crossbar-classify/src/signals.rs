//! Signal extraction helpers for classification
//!
//! Pure substring heuristics over lowercased text; no ML pipeline.

use std::collections::HashSet;

use crossbar_config::classifier::{ToolCategory, ToolDetectorConfig};

/// Name and description of one tool, as seen by the classifier
#[derive(Debug, Clone)]
pub struct ToolSignal {
    pub name: String,
    pub description: Option<String>,
}

/// Match tools against the detector patterns and collect category flags
pub fn detect_tool_categories(tools: &[ToolSignal], detector: &ToolDetectorConfig) -> HashSet<ToolCategory> {
    let mut categories = HashSet::new();

    for tool in tools {
        let mut haystack = tool.name.to_lowercase();
        if let Some(desc) = &tool.description {
            haystack.push(' ');
            haystack.push_str(&desc.to_lowercase());
        }

        let sets = [
            (ToolCategory::WebSearch, &detector.web_search),
            (ToolCategory::CodeExecution, &detector.code_execution),
            (ToolCategory::FileSearch, &detector.file_search),
            (ToolCategory::DataAnalysis, &detector.data_analysis),
        ];
        for (category, patterns) in sets {
            if patterns.iter().any(|p| haystack.contains(&p.to_lowercase())) {
                categories.insert(category);
            }
        }
    }

    categories
}

/// Whether any thinking keyword appears in the combined request text
pub fn detect_thinking(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

/// Whether the request text reads like a coding task
///
/// Code fences, programming keywords, or source-file extensions.
pub fn detect_coding(text: &str) -> bool {
    let lower = text.to_lowercase();

    if lower.contains("```") {
        return true;
    }

    const KEYWORDS: &[&str] = &[
        "implement",
        "refactor",
        "debug",
        "compile",
        "stack trace",
        "unit test",
        "write a program",
        "write code",
        "fix this code",
        "syntax error",
    ];
    if KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    const EXTENSIONS: &[&str] = &[".rs", ".ts", ".py", ".js", ".go", ".java", ".cpp", ".tsx"];
    EXTENSIONS.iter().any(|ext| lower.contains(ext))
}
