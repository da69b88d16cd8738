//! Reviewer annotations: record, propose a rewrite, apply.
//!
//! Every write re-reads the chapter and re-resolves the quote inside the
//! write transaction; the offsets stored on the annotation are only a hint.

use serde::Serialize;
use std::sync::Arc;

use crate::config::AnnotationBounds;
use crate::error::{NovelError, Result};
use crate::model::{AnnotationId, AnnotationStatus, Chapter, ChapterAnnotation, ChapterId, ContentVersion};
use crate::prompt::PromptComposer;
use crate::provider::Generator;
use crate::reconcile::{AnnotationReconciler, Span};
use crate::store::{annotations, chapters, Store};
use crate::text::{char_len, replace_char_range};
use crate::versioning::{snapshot_and_write_on, AUTHOR_ANNOTATION};

/// A suggested replacement, not yet written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub annotation_id: AnnotationId,
    pub span: Span,
    pub original: String,
    pub replacement: String,
}

/// The chapter after an annotation was applied.
#[derive(Debug, Clone)]
pub struct Applied {
    pub chapter: Chapter,
    /// Snapshot of the chapter before the replacement.
    pub snapshot: ContentVersion,
    pub span: Span,
}

/// Annotation workflows over one store and generator.
pub struct AnnotationService {
    store: Arc<Store>,
    generator: Arc<dyn Generator>,
    composer: PromptComposer,
    bounds: AnnotationBounds,
    reconciler: AnnotationReconciler,
}

impl AnnotationService {
    pub fn new(
        store: Arc<Store>,
        generator: Arc<dyn Generator>,
        composer: PromptComposer,
        bounds: AnnotationBounds,
    ) -> Self {
        Self {
            store,
            generator,
            composer,
            bounds,
            reconciler: AnnotationReconciler,
        }
    }

    /// Record a note on `quote`, seen near char offset `start`.
    ///
    /// The quote must occur in the chapter now; the stored offset is the
    /// occurrence nearest to `start`.
    pub fn annotate(
        &self,
        chapter_id: ChapterId,
        quote: &str,
        start: usize,
        note: &str,
    ) -> Result<ChapterAnnotation> {
        if quote.is_empty() {
            return Err(NovelError::Validation("annotation quote is empty".into()));
        }
        let chapter = self.store.get_chapter(chapter_id)?;
        let span = self.reconciler.locate(&chapter.content, quote, start)?;
        self.store
            .create_annotation(chapter_id, quote, span.start, note)
    }

    /// Where the annotation's quote sits in the chapter's current content.
    pub fn locate(&self, id: AnnotationId) -> Result<(ChapterAnnotation, Span)> {
        let annotation = self.store.get_annotation(id)?;
        let chapter = self.store.get_chapter(annotation.chapter_id)?;
        let span = self
            .reconciler
            .locate(&chapter.content, &annotation.quote, annotation.start)?;
        Ok((annotation, span))
    }

    fn open(&self, id: AnnotationId) -> Result<ChapterAnnotation> {
        let annotation = self.store.get_annotation(id)?;
        if annotation.status != AnnotationStatus::Open {
            return Err(NovelError::Conflict(format!(
                "annotation {id} is already {}",
                annotation.status.as_str()
            )));
        }
        Ok(annotation)
    }

    /// Reject a replacement whose length is out of proportion to the quote.
    pub fn check_bounds(&self, quote: &str, replacement: &str) -> Result<()> {
        let (min, max) = self.bounds.range_for(char_len(quote));
        let actual = char_len(replacement);
        if actual < min || actual > max {
            return Err(NovelError::BoundsViolation { actual, min, max });
        }
        Ok(())
    }

    /// Ask the generator for a rewrite of the annotated passage. Writes nothing.
    pub async fn propose(&self, id: AnnotationId) -> Result<Proposal> {
        let annotation = self.open(id)?;
        let chapter = self.store.get_chapter(annotation.chapter_id)?;
        let span = self
            .reconciler
            .locate(&chapter.content, &annotation.quote, annotation.start)?;

        let request = self.composer.annotation_request(
            &chapter.content,
            span.start,
            span.end,
            &annotation.quote,
            &annotation.note,
        );
        let reply = self.generator.generate(request).await?;
        let replacement = reply.content.trim().to_string();
        if replacement.is_empty() {
            return Err(NovelError::Upstream("generator returned no replacement".into()));
        }
        self.check_bounds(&annotation.quote, &replacement)?;

        tracing::debug!(annotation = %id, start = span.start, "replacement proposed");
        Ok(Proposal {
            annotation_id: id,
            span,
            original: annotation.quote,
            replacement,
        })
    }

    /// Replace the annotated passage with `replacement` and close the
    /// annotation as applied. The prior chapter text becomes a version.
    pub fn apply(&self, id: AnnotationId, replacement: &str) -> Result<Applied> {
        let applied = self.store.transaction(|tx| {
            let annotation = annotations::get_annotation_on(tx, id)?;
            if annotation.status != AnnotationStatus::Open {
                return Err(NovelError::Conflict(format!(
                    "annotation {id} is already {}",
                    annotation.status.as_str()
                )));
            }
            let chapter = chapters::get_chapter_on(tx, annotation.chapter_id)?;
            let span = self
                .reconciler
                .locate(&chapter.content, &annotation.quote, annotation.start)?;
            let content = replace_char_range(&chapter.content, span.start, span.end, replacement);

            let description = if annotation.note.is_empty() {
                format!("before applying annotation {id}")
            } else {
                format!("before applying annotation: {}", annotation.note)
            };
            let snapshot = snapshot_and_write_on(
                tx,
                crate::model::VersionParent::Chapter(chapter.id),
                None,
                &content,
                AUTHOR_ANNOTATION,
                &description,
            )?;
            annotations::close_annotation_on(tx, id, AnnotationStatus::Applied)?;

            Ok(Applied {
                chapter: chapters::get_chapter_on(tx, chapter.id)?,
                snapshot,
                span,
            })
        })?;
        tracing::info!(
            annotation = %id,
            chapter = %applied.chapter.id,
            version = applied.snapshot.number,
            "annotation applied"
        );
        Ok(applied)
    }

    /// Propose a rewrite and save it in one go.
    pub async fn apply_generated(&self, id: AnnotationId) -> Result<Applied> {
        let proposal = self.propose(id).await?;
        self.apply(id, &proposal.replacement)
    }

    pub fn dismiss(&self, id: AnnotationId) -> Result<ChapterAnnotation> {
        self.store.dismiss_annotation(id)
    }
}
