//! Best-effort work that follows a persisted chapter.
//!
//! Each step runs in isolation. A failed step is logged and recorded in the
//! [`SideEffectReport`]; it never rolls back the chapter or stops the other
//! steps.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::Chapter;
use crate::prompt::PromptComposer;
use crate::provider::{Generator, RetrievalIndex};
use crate::store::Store;

/// Outcome of one side-effect step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// No collaborator configured for this step.
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// What the post-persistence pipeline did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectReport {
    pub extraction: StepOutcome,
    pub indexing: StepOutcome,
    pub characters_updated: usize,
    pub settings_updated: usize,
    pub foreshadowing_revealed: usize,
}

impl Default for SideEffectReport {
    fn default() -> Self {
        Self {
            extraction: StepOutcome::Skipped,
            indexing: StepOutcome::Skipped,
            characters_updated: 0,
            settings_updated: 0,
            foreshadowing_revealed: 0,
        }
    }
}

impl SideEffectReport {
    pub fn has_failures(&self) -> bool {
        self.extraction.is_failed() || self.indexing.is_failed()
    }
}

/// Continuity facts the generator reports for a chapter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedFacts {
    #[serde(default)]
    pub characters: Vec<ExtractedCharacter>,
    #[serde(default)]
    pub settings: Vec<ExtractedSetting>,
    #[serde(default)]
    pub revealed_foreshadowing: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedCharacter {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedSetting {
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

/// Extract JSON from a response that might have markdown code blocks or
/// prose around it.
pub(crate) fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Outermost braces
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

pub(crate) fn parse_facts(response: &str) -> Result<ExtractedFacts, String> {
    let json = extract_json(response);
    serde_json::from_str(json).map_err(|e| format!("unparseable extraction: {e}"))
}

/// Runs extraction and indexing for a freshly persisted chapter.
#[derive(Clone)]
pub struct SideEffectPipeline {
    store: Arc<Store>,
    generator: Arc<dyn Generator>,
    composer: PromptComposer,
    narrative_index: Option<Arc<dyn RetrievalIndex>>,
    extract: bool,
}

impl SideEffectPipeline {
    pub fn new(store: Arc<Store>, generator: Arc<dyn Generator>, composer: PromptComposer) -> Self {
        Self {
            store,
            generator,
            composer,
            narrative_index: None,
            extract: true,
        }
    }

    pub fn with_narrative_index(mut self, index: Option<Arc<dyn RetrievalIndex>>) -> Self {
        self.narrative_index = index;
        self
    }

    /// Turn entity extraction on or off.
    pub fn with_extraction(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub async fn run(&self, chapter: &Chapter) -> SideEffectReport {
        let mut report = SideEffectReport::default();

        if self.extract {
            report.extraction = match self.extract_facts(chapter, &mut report).await {
                Ok(()) => StepOutcome::Ok,
                Err(reason) => {
                    tracing::warn!(chapter = %chapter.id, %reason, "extraction failed");
                    StepOutcome::Failed(reason)
                }
            };
        }

        report.indexing = match &self.narrative_index {
            None => StepOutcome::Skipped,
            Some(index) => {
                let description = format!("Chapter {}: {}", chapter.number, chapter.title);
                match index.upload(&chapter.content, &description).await {
                    Ok(doc) => {
                        tracing::debug!(chapter = %chapter.id, doc = %doc, "chapter indexed");
                        StepOutcome::Ok
                    }
                    Err(e) => {
                        tracing::warn!(chapter = %chapter.id, error = %e, "narrative index upload failed");
                        StepOutcome::Failed(e.to_string())
                    }
                }
            }
        };

        tracing::info!(
            chapter = %chapter.id,
            characters = report.characters_updated,
            settings = report.settings_updated,
            revealed = report.foreshadowing_revealed,
            failures = report.has_failures(),
            "side effects finished"
        );
        report
    }

    async fn extract_facts(
        &self,
        chapter: &Chapter,
        report: &mut SideEffectReport,
    ) -> Result<(), String> {
        let open = self
            .store
            .list_unrevealed_foreshadowing(chapter.novel_id)
            .map_err(|e| e.to_string())?;
        let request = self.composer.extraction_request(chapter, &open);
        let reply = self
            .generator
            .generate(request)
            .await
            .map_err(|e| e.to_string())?;
        let facts = parse_facts(&reply.content)?;

        // Apply row by row; one bad row does not discard the rest.
        let mut first_error: Option<String> = None;
        let mut note = |e: crate::error::NovelError| {
            tracing::warn!(error = %e, "could not apply extracted fact");
            first_error.get_or_insert(e.to_string());
        };

        for c in &facts.characters {
            match self.store.record_character_appearance(
                chapter.novel_id,
                &c.name,
                &c.description,
                chapter.number,
            ) {
                Ok(_) => report.characters_updated += 1,
                Err(e) => note(e),
            }
        }
        for s in &facts.settings {
            match self.store.record_setting_mention(
                chapter.novel_id,
                &s.title,
                &s.category,
                &s.description,
                chapter.number,
            ) {
                Ok(_) => report.settings_updated += 1,
                Err(e) => note(e),
            }
        }
        for title in &facts.revealed_foreshadowing {
            let Some(thread) = open.iter().find(|f| f.title == title.trim()) else {
                tracing::debug!(%title, "extracted reveal matches no open thread");
                continue;
            };
            match self.store.reveal_foreshadowing(thread.id, chapter.number) {
                Ok(_) => report.foreshadowing_revealed += 1,
                Err(e) => note(e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"characters": []}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_extract_json_markdown() {
        let text = "```json\n{\"characters\": [{\"name\": \"Lin\"}]}\n```";
        assert_eq!(extract_json(text), r#"{"characters": [{"name": "Lin"}]}"#);
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Here you go: {\"settings\": []} Hope that helps.";
        assert_eq!(extract_json(text), r#"{"settings": []}"#);
    }

    #[test]
    fn test_parse_facts_defaults_missing_fields() {
        let facts = parse_facts(r#"{"characters": [{"name": "Lin"}]}"#).unwrap();
        assert_eq!(facts.characters[0].name, "Lin");
        assert!(facts.characters[0].description.is_empty());
        assert!(facts.settings.is_empty());
        assert!(facts.revealed_foreshadowing.is_empty());
        assert!(parse_facts("no json here").is_err());
    }

    #[test]
    fn test_step_outcome_wire_shape() {
        assert_eq!(
            serde_json::to_string(&StepOutcome::Failed("down".into())).unwrap(),
            r#"{"status":"failed","reason":"down"}"#
        );
        assert_eq!(
            serde_json::to_string(&StepOutcome::Ok).unwrap(),
            r#"{"status":"ok"}"#
        );
    }
}
