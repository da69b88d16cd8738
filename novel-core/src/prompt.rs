//! Prompt composition: turns assembled context into generation requests.

use crate::config::{AnnotationBounds, GenerationConfig};
use crate::memory::AssembledContext;
use crate::model::{Chapter, Foreshadowing, Novel};
use crate::provider::{GenerationRequest, PromptMessage};

/// Chars of surrounding text shown on each side of an annotated passage.
const ANNOTATION_SURROUNDING_CHARS: usize = 400;

/// Builds the requests sent to the generator.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    generation: GenerationConfig,
    annotation: AnnotationBounds,
}

impl PromptComposer {
    pub fn new(generation: GenerationConfig, annotation: AnnotationBounds) -> Self {
        Self {
            generation,
            annotation,
        }
    }

    fn chapter_system_prompt(&self, novel: &Novel) -> String {
        let mut prompt = String::new();
        prompt.push_str(include_str!("prompts/chapter_system.txt"));

        prompt.push_str("\n\n## Novel: ");
        prompt.push_str(&novel.title);
        prompt.push('\n');
        if !novel.genre.is_empty() {
            prompt.push_str(&format!("**Genre:** {}\n", novel.genre));
        }
        if !novel.description.is_empty() {
            prompt.push_str(&format!("**Premise:** {}\n", novel.description));
        }
        prompt.push_str(&format!(
            "**Chapter length:** about {} characters\n",
            self.generation.target_chapter_chars
        ));
        prompt
    }

    /// The chapter-writing request for `context`.
    pub fn chapter_request(
        &self,
        novel: &Novel,
        context: &AssembledContext,
        title: &str,
    ) -> GenerationRequest {
        let mut user = String::new();
        let memory = context.render();
        if !memory.is_empty() {
            user.push_str(&memory);
            user.push_str("\n\n");
        }

        user.push_str(&format!("## Chapter {}", context.target_chapter));
        if !title.trim().is_empty() {
            user.push_str(&format!(": {}", title.trim()));
        }
        user.push_str("\n### Outline\n");
        user.push_str(&context.outline);
        user.push_str("\n\nWrite the chapter now.");

        GenerationRequest::new(vec![PromptMessage::user(user)])
            .with_system(self.chapter_system_prompt(novel))
            .with_model(self.generation.model.clone())
            .with_temperature(self.generation.temperature)
            .with_max_tokens(self.generation.max_tokens)
    }

    /// The request asking the generator to extract continuity facts from a
    /// freshly written chapter.
    pub fn extraction_request(
        &self,
        chapter: &Chapter,
        open_threads: &[Foreshadowing],
    ) -> GenerationRequest {
        let mut user = String::new();
        user.push_str(include_str!("prompts/extraction.txt"));

        user.push_str("\n\n## Open foreshadowing threads\n");
        if open_threads.is_empty() {
            user.push_str("(none)\n");
        }
        for thread in open_threads {
            user.push_str(&format!("- {}", thread.title));
            if !thread.content.is_empty() {
                user.push_str(&format!(": {}", thread.content));
            }
            user.push('\n');
        }

        user.push_str(&format!(
            "\n## Chapter {}: {}\n{}",
            chapter.number, chapter.title, chapter.content
        ));

        GenerationRequest::new(vec![PromptMessage::user(user)])
            .with_model(self.generation.model.clone())
            .with_temperature(self.generation.extraction_temperature)
            .with_max_tokens(self.generation.extraction_max_tokens)
    }

    /// The request for a replacement of `quote`, which sits at char range
    /// `[start, end)` of `content`.
    pub fn annotation_request(
        &self,
        content: &str,
        start: usize,
        end: usize,
        quote: &str,
        note: &str,
    ) -> GenerationRequest {
        let before_start = start.saturating_sub(ANNOTATION_SURROUNDING_CHARS);
        let before: String = content.chars().skip(before_start).take(start - before_start).collect();
        let after: String = content
            .chars()
            .skip(end)
            .take(ANNOTATION_SURROUNDING_CHARS)
            .collect();
        let (min, max) = self.annotation.range_for(crate::text::char_len(quote));

        let mut user = String::new();
        user.push_str(&format!("## Text before\n{before}\n\n"));
        user.push_str(&format!("## Passage to rewrite\n{quote}\n\n"));
        user.push_str(&format!("## Text after\n{after}\n\n"));
        user.push_str(&format!("## Editor's note\n{note}\n\n"));
        user.push_str(&format!(
            "The replacement must be between {min} and {max} characters long."
        ));

        GenerationRequest::new(vec![PromptMessage::user(user)])
            .with_system(include_str!("prompts/annotation_rewrite.txt"))
            .with_model(self.generation.model.clone())
            .with_temperature(self.annotation.temperature)
            .with_max_tokens(self.annotation.max_tokens)
    }
}
