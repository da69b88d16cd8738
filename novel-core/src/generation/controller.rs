//! The chapter generation state machine.
//!
//! ```text
//! Idle -> Requested -> Streaming -> Completed
//!                  \           \--> Cancelled
//!                   \-----------\-> Failed
//! ```
//!
//! A chapter row is written exactly once, on `Completed`, in one store
//! transaction. `Cancelled` and `Failed` leave nothing behind.

use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::GenerationEvent;
use super::side_effects::{SideEffectPipeline, SideEffectReport};
use crate::config::EngineConfig;
use crate::error::{NovelError, Result};
use crate::memory::ContextAssembler;
use crate::model::{Chapter, Novel, NovelId, PlanId, PlanStatus, VolumeId};
use crate::prompt::PromptComposer;
use crate::provider::{GenerationRequest, Generator, RetrievalIndex};
use crate::store::{NewChapter, Store};

/// Capacity of the event channel handed out by [`StreamingGenerationController::spawn_stream`].
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// What to generate.
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterRequest {
    /// Generate from a seed outline. `number` defaults to the next free one.
    Direct {
        novel_id: NovelId,
        outline: String,
        title: Option<String>,
        number: Option<u32>,
        volume_id: Option<VolumeId>,
    },
    /// Generate from a confirmed plan.
    Plan { plan_id: PlanId },
}

impl ChapterRequest {
    pub fn direct(novel_id: NovelId, outline: impl Into<String>) -> Self {
        ChapterRequest::Direct {
            novel_id,
            outline: outline.into(),
            title: None,
            number: None,
            volume_id: None,
        }
    }

    pub fn plan(plan_id: PlanId) -> Self {
        ChapterRequest::Plan { plan_id }
    }
}

/// Lifecycle state of one generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    Requested,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Cancelled | GenerationState::Failed
        )
    }

    pub fn can_advance_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Requested, Streaming)
                | (Requested, Failed)
                | (Requested, Cancelled)
                | (Streaming, Completed)
                | (Streaming, Cancelled)
                | (Streaming, Failed)
        )
    }
}

/// A persisted generation and what happened after it.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub chapter: Chapter,
    pub side_effects: SideEffectReport,
}

/// How a streaming run ended, when it did not fail.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    Completed(GenerationOutcome),
    Cancelled,
}

/// A resolved request: every input the generator and the insert need.
#[derive(Debug, Clone)]
struct Resolved {
    novel: Novel,
    number: u32,
    title: String,
    outline: String,
    volume_id: Option<VolumeId>,
    plan_id: Option<PlanId>,
}

/// Tracks one run through the state machine and logs transitions.
struct Run {
    state: GenerationState,
}

impl Run {
    fn new() -> Self {
        Self {
            state: GenerationState::Idle,
        }
    }

    fn advance(&mut self, next: GenerationState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?next, "generation state");
        self.state = next;
    }
}

/// Drives generation requests from resolution to persistence.
pub struct StreamingGenerationController {
    store: Arc<Store>,
    generator: Arc<dyn Generator>,
    assembler: ContextAssembler,
    composer: PromptComposer,
    side_effects: SideEffectPipeline,
    event_buffer: usize,
}

impl StreamingGenerationController {
    pub fn new(store: Arc<Store>, generator: Arc<dyn Generator>, config: &EngineConfig) -> Self {
        let composer = PromptComposer::new(config.generation.clone(), config.annotation.clone());
        let assembler = ContextAssembler::new(store.clone(), config.budget.clone())
            .with_retrieval_mode(config.retrieval.mode.clone());
        let side_effects = SideEffectPipeline::new(store.clone(), generator.clone(), composer.clone());
        Self {
            store,
            generator,
            assembler,
            composer,
            side_effects,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Query this index for context and upload finished chapters to it.
    pub fn with_narrative_index(mut self, index: Option<Arc<dyn RetrievalIndex>>) -> Self {
        self.assembler = self.assembler.with_narrative_index(index.clone());
        self.side_effects = self.side_effects.with_narrative_index(index);
        self
    }

    /// Query this index for craft notes.
    pub fn with_technique_index(mut self, index: Option<Arc<dyn RetrievalIndex>>) -> Self {
        self.assembler = self.assembler.with_technique_index(index);
        self
    }

    pub fn with_extraction(mut self, extract: bool) -> Self {
        self.side_effects = self.side_effects.with_extraction(extract);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Check preconditions and fill in defaults. Any chapter already holding
    /// the target number or plan is a conflict.
    fn resolve(&self, request: &ChapterRequest) -> Result<Resolved> {
        let resolved = match request {
            ChapterRequest::Plan { plan_id } => {
                let plan = self.store.get_plan(*plan_id)?;
                if plan.status != PlanStatus::Confirmed {
                    return Err(NovelError::Conflict(format!(
                        "plan {plan_id} is {}, only confirmed plans can be generated",
                        plan.status.as_str()
                    )));
                }
                Resolved {
                    novel: self.store.get_novel(plan.novel_id)?,
                    number: plan.chapter_number,
                    title: plan.title,
                    outline: plan.outline,
                    volume_id: Some(plan.volume_id),
                    plan_id: Some(plan.id),
                }
            }
            ChapterRequest::Direct {
                novel_id,
                outline,
                title,
                number,
                volume_id,
            } => {
                let novel = self.store.get_novel(*novel_id)?;
                let number = match number {
                    Some(0) => {
                        return Err(NovelError::Validation("chapter numbers start at 1".into()))
                    }
                    Some(n) => *n,
                    None => self.store.next_chapter_number(*novel_id)?,
                };
                Resolved {
                    novel,
                    number,
                    title: title.clone().unwrap_or_default(),
                    outline: outline.clone(),
                    volume_id: *volume_id,
                    plan_id: None,
                }
            }
        };

        if resolved.outline.trim().is_empty() {
            return Err(NovelError::Validation("an outline is required to generate".into()));
        }
        if self
            .store
            .chapter_exists(resolved.novel.id, resolved.number, resolved.plan_id)?
        {
            return Err(NovelError::Conflict(format!(
                "chapter {} already exists",
                resolved.number
            )));
        }
        Ok(resolved)
    }

    async fn prepare(&self, request: &ChapterRequest) -> Result<(Resolved, GenerationRequest)> {
        let resolved = self.resolve(request)?;
        let context = self
            .assembler
            .assemble(resolved.novel.id, resolved.number, &resolved.outline)
            .await?;
        let generation = self
            .composer
            .chapter_request(&resolved.novel, &context, &resolved.title);
        Ok((resolved, generation))
    }

    fn persist(&self, resolved: Resolved, content: String) -> Result<Chapter> {
        if content.trim().is_empty() {
            return Err(NovelError::Upstream("generator returned no text".into()));
        }
        let title = if resolved.title.trim().is_empty() {
            format!("Chapter {}", resolved.number)
        } else {
            resolved.title
        };
        self.store.insert_generated_chapter(NewChapter {
            novel_id: resolved.novel.id,
            volume_id: resolved.volume_id,
            plan_id: resolved.plan_id,
            number: resolved.number,
            title,
            content,
            outline: resolved.outline,
        })
    }

    /// Generate and persist a chapter in one blocking call.
    pub async fn generate(&self, request: ChapterRequest) -> Result<GenerationOutcome> {
        let mut run = Run::new();
        run.advance(GenerationState::Requested);

        let result = async {
            let (resolved, generation) = self.prepare(&request).await?;
            run.advance(GenerationState::Streaming);
            let reply = self.generator.generate(generation).await?;
            self.persist(resolved, reply.content)
        }
        .await;

        match result {
            Ok(chapter) => {
                run.advance(GenerationState::Completed);
                let side_effects = self.side_effects.run(&chapter).await;
                Ok(GenerationOutcome {
                    chapter,
                    side_effects,
                })
            }
            Err(e) => {
                run.advance(GenerationState::Failed);
                tracing::warn!(error = %e, "generation failed");
                Err(e)
            }
        }
    }

    /// Generate a chapter, forwarding every chunk to `events` as it arrives.
    ///
    /// Events are `Start`, `Delta`s, then exactly one `Done` or `Error`; a
    /// cancelled run sends no terminal event. Cancelling `cancel` or dropping
    /// the receiver stops the run and nothing is persisted.
    ///
    /// `Start` carries the resolved chapter number, so a run refused before
    /// streaming opens (an invalid or conflicting request, or a generator
    /// that cannot be reached) sends a lone `Error`.
    pub async fn stream(
        &self,
        request: ChapterRequest,
        events: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome> {
        let mut run = Run::new();
        run.advance(GenerationState::Requested);

        match self.stream_inner(&mut run, request, &events, &cancel).await {
            Ok(Some(outcome)) => Ok(StreamOutcome::Completed(outcome)),
            Ok(None) => {
                run.advance(GenerationState::Cancelled);
                tracing::info!("generation cancelled, nothing persisted");
                Ok(StreamOutcome::Cancelled)
            }
            Err(e) => {
                run.advance(GenerationState::Failed);
                tracing::warn!(error = %e, "generation failed");
                let _ = events
                    .send(GenerationEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// `Ok(None)` means cancelled.
    async fn stream_inner(
        &self,
        run: &mut Run,
        request: ChapterRequest,
        events: &mpsc::Sender<GenerationEvent>,
        cancel: &CancellationToken,
    ) -> Result<Option<GenerationOutcome>> {
        let (resolved, generation) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            prepared = self.prepare(&request) => prepared?,
        };

        let mut chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            stream = self.generator.stream(generation) => stream?,
        };
        run.advance(GenerationState::Streaming);

        if !forward(
            events,
            GenerationEvent::Start {
                chapter_number: resolved.number,
            },
            cancel,
        )
        .await
        {
            return Ok(None);
        }

        let mut accumulated = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = events.closed() => return Ok(None),
                next = chunks.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&chunk);
                    if !forward(events, GenerationEvent::Delta { text: chunk }, cancel).await {
                        return Ok(None);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        // Last chance to observe a cancel before the write.
        if cancel.is_cancelled() || events.is_closed() {
            return Ok(None);
        }

        let chapter = self.persist(resolved, accumulated)?;
        run.advance(GenerationState::Completed);
        let _ = events
            .send(GenerationEvent::Done {
                chapter_id: chapter.id,
            })
            .await;

        let side_effects = self.side_effects.run(&chapter).await;
        Ok(Some(GenerationOutcome {
            chapter,
            side_effects,
        }))
    }

    /// Run [`stream`](Self::stream) on a background task, returning the
    /// event receiver and the task handle.
    pub fn spawn_stream(
        self: &Arc<Self>,
        request: ChapterRequest,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<GenerationEvent>,
        JoinHandle<Result<StreamOutcome>>,
    ) {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move { controller.stream(request, tx, cancel).await });
        (rx, handle)
    }
}

/// Send one event unless cancelled first. `false` means stop: cancelled or
/// the receiver is gone.
async fn forward(
    events: &mpsc::Sender<GenerationEvent>,
    event: GenerationEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use GenerationState::*;
        assert!(Idle.can_advance_to(Requested));
        assert!(Requested.can_advance_to(Streaming));
        assert!(Streaming.can_advance_to(Completed));
        assert!(Streaming.can_advance_to(Cancelled));
        assert!(!Idle.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Streaming));
        assert!(!Cancelled.can_advance_to(Completed));
        for terminal in [Completed, Cancelled, Failed] {
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_direct_request_defaults() {
        let novel_id = NovelId::new();
        match ChapterRequest::direct(novel_id, "outline") {
            ChapterRequest::Direct { number, title, .. } => {
                assert!(number.is_none());
                assert!(title.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
