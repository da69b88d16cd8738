//! Engine configuration.
//!
//! Defaults match the context budgets the engine was tuned with; every knob
//! can be overridden with a builder method or an environment variable.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Limits on how much story memory goes into one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBudget {
    /// Maximum characters and, separately, world settings injected.
    pub top_k: usize,
    /// Chapters before a planned reveal during which a thread is hinted at.
    pub buildup_window: u32,
    /// Maximum dormant foreshadowing threads listed as constraints.
    pub max_background: usize,
    /// Number of preceding chapters summarized in the recency digest.
    pub recent_chapters: usize,
    /// Body prefix length used when a preceding chapter has no outline.
    pub digest_prefix_chars: usize,
    /// Budget for each retrieval snippet.
    pub snippet_chars: usize,
    /// Chapters before the target that count as "recent" for world settings.
    pub setting_window: u32,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            top_k: 12,
            buildup_window: 5,
            max_background: 6,
            recent_chapters: 2,
            digest_prefix_chars: 300,
            snippet_chars: 1200,
            setting_window: 3,
        }
    }
}

/// Parameters for the chapter generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model override; the provider default is used when unset.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Desired chapter length in chars, stated in the prompt.
    pub target_chapter_chars: usize,
    /// Parameters for the (cheaper, deterministic) extraction call.
    pub extraction_temperature: f32,
    pub extraction_max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.8,
            max_tokens: 8192,
            target_chapter_chars: 3000,
            extraction_temperature: 0.0,
            extraction_max_tokens: 2048,
        }
    }
}

/// Allowed length of a proposed annotation replacement relative to the quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBounds {
    pub min_ratio: f32,
    pub max_ratio: f32,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for AnnotationBounds {
    fn default() -> Self {
        Self {
            min_ratio: 0.3,
            max_ratio: 4.0,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl AnnotationBounds {
    /// Inclusive char-length range for a replacement of a `quote_len`-char quote.
    pub fn range_for(&self, quote_len: usize) -> (usize, usize) {
        let min = (quote_len as f32 * self.min_ratio).floor() as usize;
        let max = (quote_len as f32 * self.max_ratio).ceil() as usize;
        (min.max(1), max.max(1))
    }
}

/// Where the semantic retrieval indexes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub narrative_url: Option<String>,
    pub technique_url: Option<String>,
    pub api_key: Option<String>,
    /// Query mode passed through to the index (e.g. "hybrid", "local").
    pub mode: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            narrative_url: None,
            technique_url: None,
            api_key: None,
            mode: "hybrid".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub budget: ContextBudget,
    pub generation: GenerationConfig,
    pub annotation: AnnotationBounds,
    pub retrieval: RetrievalConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from defaults plus environment overrides.
    ///
    /// Unparseable values are ignored with a warning rather than failing
    /// startup.
    pub fn from_env() -> Self {
        Self::new().apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup("NOVEL_MODEL").filter(|m| !m.trim().is_empty()) {
            self.generation.model = Some(model);
        }
        override_parsed(&lookup, "NOVEL_TEMPERATURE", &mut self.generation.temperature);
        override_parsed(&lookup, "NOVEL_MAX_TOKENS", &mut self.generation.max_tokens);
        override_parsed(
            &lookup,
            "NOVEL_TARGET_CHARS",
            &mut self.generation.target_chapter_chars,
        );
        override_parsed(&lookup, "NOVEL_TOP_K", &mut self.budget.top_k);
        override_parsed(&lookup, "NOVEL_BUILDUP_WINDOW", &mut self.budget.buildup_window);
        override_parsed(&lookup, "NOVEL_MAX_BACKGROUND", &mut self.budget.max_background);
        override_parsed(&lookup, "NOVEL_RECENT_CHAPTERS", &mut self.budget.recent_chapters);
        override_parsed(&lookup, "NOVEL_SNIPPET_CHARS", &mut self.budget.snippet_chars);

        if let Some(url) = lookup("NARRATIVE_INDEX_URL").filter(|u| !u.trim().is_empty()) {
            self.retrieval.narrative_url = Some(url);
        }
        if let Some(url) = lookup("TECHNIQUE_INDEX_URL").filter(|u| !u.trim().is_empty()) {
            self.retrieval.technique_url = Some(url);
        }
        if let Some(key) = lookup("RETRIEVAL_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.retrieval.api_key = Some(key);
        }
        if let Some(mode) = lookup("RETRIEVAL_MODE").filter(|m| !m.trim().is_empty()) {
            self.retrieval.mode = mode;
        }
        self
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_annotation_bounds(mut self, bounds: AnnotationBounds) -> Self {
        self.annotation = bounds;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.generation.model = Some(model.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.budget.top_k = top_k;
        self
    }

    pub fn with_buildup_window(mut self, window: u32) -> Self {
        self.budget.buildup_window = window;
        self
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.budget.top_k, 12);
        assert_eq!(config.budget.buildup_window, 5);
        assert_eq!(config.budget.max_background, 6);
        assert_eq!(config.budget.recent_chapters, 2);
        assert_eq!(config.budget.snippet_chars, 1200);
        assert_eq!(config.retrieval.mode, "hybrid");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NOVEL_MODEL", "claude-3-opus"),
            ("NOVEL_TOP_K", "8"),
            ("NOVEL_BUILDUP_WINDOW", "not-a-number"),
            ("NARRATIVE_INDEX_URL", "http://localhost:9621"),
            ("TECHNIQUE_INDEX_URL", ""),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::new().apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.generation.model.as_deref(), Some("claude-3-opus"));
        assert_eq!(config.budget.top_k, 8);
        assert_eq!(config.budget.buildup_window, 5);
        assert_eq!(
            config.retrieval.narrative_url.as_deref(),
            Some("http://localhost:9621")
        );
        assert!(config.retrieval.technique_url.is_none());
    }

    #[test]
    fn test_annotation_bounds_range() {
        let bounds = AnnotationBounds::default();
        assert_eq!(bounds.range_for(10), (3, 40));
        assert_eq!(bounds.range_for(1), (1, 4));
    }
}
