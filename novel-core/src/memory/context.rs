//! Bounded context assembly for a chapter generation request.
//!
//! The assembled context always has the same shape, in this order:
//!
//! 1. a recency digest of the chapters just before the target
//! 2. ranked characters and settings
//! 3. the three foreshadowing buckets, each with its instruction
//! 4. retrieval snippets from the narrative and technique indexes
//!
//! Only the outline is mandatory. Every other step degrades to "absent" on
//! failure instead of failing the request.

use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

use super::foreshadowing::{ForeshadowingPlan, ForeshadowingScheduler};
use super::relevance::{Ranked, RelevanceRanker};
use crate::config::ContextBudget;
use crate::error::{NovelError, Result};
use crate::model::{Character, Foreshadowing, NovelId, WorldSetting};
use crate::provider::RetrievalIndex;
use crate::store::Store;
use crate::text::truncate_chars;

pub const BUILDUP_INSTRUCTION: &str = "hint, do not reveal";
pub const DUE_INSTRUCTION: &str = "resolve or advance";
pub const BACKGROUND_INSTRUCTION: &str = "background constraint, avoid contradiction";

/// A previous chapter reduced to a few lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterDigest {
    pub number: u32,
    pub title: String,
    pub summary: String,
}

/// Which index a snippet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetSource {
    Narrative,
    Technique,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalSnippet {
    pub source: SnippetSource,
    pub text: String,
}

/// Everything injected into one generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub target_chapter: u32,
    pub outline: String,
    pub recent: Vec<ChapterDigest>,
    pub characters: Vec<Ranked<Character>>,
    pub settings: Vec<Ranked<WorldSetting>>,
    pub foreshadowing: ForeshadowingPlan,
    pub snippets: Vec<RetrievalSnippet>,
    /// Optional steps that failed and were left out.
    pub omitted: Vec<String>,
}

fn push_foreshadowing(out: &mut String, heading: &str, instruction: &str, items: &[Foreshadowing]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n### {heading} ({instruction})");
    for item in items {
        let reveal = item
            .planned_reveal_chapter
            .map(|r| format!(", planned reveal ch. {r}"))
            .unwrap_or_default();
        let _ = write!(out, "- {} (planted ch. {}{reveal})", item.title, item.planted_chapter);
        if !item.content.is_empty() {
            let _ = write!(out, ": {}", item.content);
        }
        out.push('\n');
    }
}

impl AssembledContext {
    /// Render the context sections as prompt text, in fixed order.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.recent.is_empty() {
            out.push_str("## Previously\n");
            for digest in &self.recent {
                let _ = writeln!(
                    out,
                    "- Chapter {} \"{}\": {}",
                    digest.number, digest.title, digest.summary
                );
            }
        }

        if !self.characters.is_empty() {
            out.push_str("\n## Characters\n");
            for ranked in &self.characters {
                let c = &ranked.item;
                let _ = write!(out, "- {}", c.name);
                if let (Some(first), Some(last)) = (c.first_appearance, c.last_appearance) {
                    let _ = write!(out, " (ch. {first}-{last})");
                }
                if !c.description.is_empty() {
                    let _ = write!(out, ": {}", c.description);
                }
                out.push('\n');
            }
        }

        if !self.settings.is_empty() {
            out.push_str("\n## World\n");
            for ranked in &self.settings {
                let s = &ranked.item;
                let _ = write!(out, "- {}", s.title);
                if !s.category.is_empty() {
                    let _ = write!(out, " [{}]", s.category);
                }
                if !s.description.is_empty() {
                    let _ = write!(out, ": {}", s.description);
                }
                out.push('\n');
            }
        }

        if !self.foreshadowing.is_empty() {
            out.push_str("\n## Foreshadowing\n");
            push_foreshadowing(&mut out, "Building up", BUILDUP_INSTRUCTION, &self.foreshadowing.buildup);
            push_foreshadowing(&mut out, "Due", DUE_INSTRUCTION, &self.foreshadowing.due_for_reveal);
            push_foreshadowing(
                &mut out,
                "Background",
                BACKGROUND_INSTRUCTION,
                &self.foreshadowing.background,
            );
        }

        for snippet in &self.snippets {
            let heading = match snippet.source {
                SnippetSource::Narrative => "Related story memory",
                SnippetSource::Technique => "Craft notes",
            };
            let _ = write!(out, "\n## {heading}\n{}\n", snippet.text);
        }

        out.trim_start().to_string()
    }
}

/// Builds an [`AssembledContext`] from the store and the optional indexes.
pub struct ContextAssembler {
    store: Arc<Store>,
    budget: ContextBudget,
    narrative_index: Option<Arc<dyn RetrievalIndex>>,
    technique_index: Option<Arc<dyn RetrievalIndex>>,
    retrieval_mode: String,
}

impl ContextAssembler {
    pub fn new(store: Arc<Store>, budget: ContextBudget) -> Self {
        Self {
            store,
            budget,
            narrative_index: None,
            technique_index: None,
            retrieval_mode: "hybrid".to_string(),
        }
    }

    pub fn with_narrative_index(mut self, index: Option<Arc<dyn RetrievalIndex>>) -> Self {
        self.narrative_index = index;
        self
    }

    pub fn with_technique_index(mut self, index: Option<Arc<dyn RetrievalIndex>>) -> Self {
        self.technique_index = index;
        self
    }

    pub fn with_retrieval_mode(mut self, mode: impl Into<String>) -> Self {
        self.retrieval_mode = mode.into();
        self
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    fn digest(&self, chapter: &crate::model::Chapter) -> ChapterDigest {
        let source = if chapter.outline.trim().is_empty() {
            chapter.content.as_str()
        } else {
            chapter.outline.as_str()
        };
        ChapterDigest {
            number: chapter.number,
            title: chapter.title.clone(),
            summary: truncate_chars(source.trim(), self.budget.digest_prefix_chars),
        }
    }

    async fn retrieve(
        &self,
        index: Option<&Arc<dyn RetrievalIndex>>,
        source: SnippetSource,
        outline: &str,
        omitted: &mut Vec<String>,
    ) -> Option<RetrievalSnippet> {
        let index = index?;
        match index.query(outline, &self.retrieval_mode).await {
            Ok(text) if !text.trim().is_empty() => Some(RetrievalSnippet {
                source,
                text: truncate_chars(text.trim(), self.budget.snippet_chars),
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(?source, error = %e, "retrieval failed, continuing without it");
                omitted.push(format!("{source:?} retrieval: {e}"));
                None
            }
        }
    }

    /// Assemble the context for chapter `target` of `novel_id`.
    pub async fn assemble(
        &self,
        novel_id: NovelId,
        target: u32,
        outline: &str,
    ) -> Result<AssembledContext> {
        let outline = outline.trim();
        if outline.is_empty() {
            return Err(NovelError::Validation("an outline is required to generate".into()));
        }

        let mut omitted = Vec::new();

        let recent = match self
            .store
            .chapters_before(novel_id, target, self.budget.recent_chapters)
        {
            Ok(chapters) => chapters.iter().map(|c| self.digest(c)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "recent chapters unavailable");
                omitted.push(format!("recent chapters: {e}"));
                Vec::new()
            }
        };

        let ranker = RelevanceRanker::new(self.budget.top_k, self.budget.setting_window);
        let characters = match self.store.list_characters(novel_id) {
            Ok(pool) => ranker.rank_characters(outline, target, &pool),
            Err(e) => {
                tracing::warn!(error = %e, "characters unavailable");
                omitted.push(format!("characters: {e}"));
                Vec::new()
            }
        };
        let settings = match self.store.list_settings(novel_id) {
            Ok(pool) => ranker.rank_settings(outline, target, &pool),
            Err(e) => {
                tracing::warn!(error = %e, "settings unavailable");
                omitted.push(format!("settings: {e}"));
                Vec::new()
            }
        };

        let scheduler =
            ForeshadowingScheduler::new(self.budget.buildup_window, self.budget.max_background);
        let foreshadowing = match self.store.list_unrevealed_foreshadowing(novel_id) {
            Ok(items) => scheduler.schedule(&items, target, outline),
            Err(e) => {
                tracing::warn!(error = %e, "foreshadowing unavailable");
                omitted.push(format!("foreshadowing: {e}"));
                ForeshadowingPlan::default()
            }
        };

        let mut snippets = Vec::new();
        if let Some(s) = self
            .retrieve(self.narrative_index.as_ref(), SnippetSource::Narrative, outline, &mut omitted)
            .await
        {
            snippets.push(s);
        }
        if let Some(s) = self
            .retrieve(self.technique_index.as_ref(), SnippetSource::Technique, outline, &mut omitted)
            .await
        {
            snippets.push(s);
        }

        tracing::debug!(
            target_chapter = target,
            recent = recent.len(),
            characters = characters.len(),
            settings = settings.len(),
            snippets = snippets.len(),
            omitted = omitted.len(),
            "context assembled"
        );

        Ok(AssembledContext {
            target_chapter: target,
            outline: outline.to_string(),
            recent,
            characters,
            settings,
            foreshadowing,
            snippets,
            omitted,
        })
    }
}
