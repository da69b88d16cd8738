//! End-to-end chapter generation against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use novel_core::store::NewForeshadowing;
use novel_core::testing::{MemoryIndex, Script, ScriptedGenerator, TestNovel};
use novel_core::{
    ChapterRequest, EngineConfig, GenerationEvent, NovelError, PlanStatus, ProviderError,
    RetrievalIndex, StepOutcome, StreamOutcome, StreamingGenerationController,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EXTRACTION_REPLY: &str = r#"Sure, here is what changed:
```json
{
  "characters": [{"name": "Lin", "description": "a courier with salt-cracked hands"}],
  "settings": [{"title": "Salt Gate", "category": "place", "description": "the only way into the drowned city"}],
  "revealed_foreshadowing": ["The black key"]
}
```"#;

fn controller(
    novel: &TestNovel,
    generator: Arc<ScriptedGenerator>,
) -> StreamingGenerationController {
    StreamingGenerationController::new(novel.store.clone(), generator, &EngineConfig::new())
}

fn drain(rx: &mut mpsc::Receiver<GenerationEvent>) -> Vec<GenerationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_streamed_chapter_is_persisted_and_enriched() {
    let novel = TestNovel::new().unwrap();
    novel
        .write_chapter(1, "Lin left the harbor at dawn with a black key sewn into her coat.")
        .unwrap();
    let key = novel
        .store
        .create_foreshadowing(
            novel.novel_id,
            NewForeshadowing {
                title: "The black key".into(),
                content: "What the key opens".into(),
                planted_chapter: 1,
                planned_reveal_chapter: Some(3),
            },
        )
        .unwrap();

    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_chunks(["Lin reached ", "the Salt Gate. ", "The black key turned."])
            .with_reply(EXTRACTION_REPLY),
    );
    let index = Arc::new(MemoryIndex::new());
    let controller = Arc::new(
        controller(&novel, generator.clone())
            .with_narrative_index(Some(index.clone() as Arc<dyn RetrievalIndex>)),
    );

    let (mut rx, handle) = controller.spawn_stream(
        ChapterRequest::direct(novel.novel_id, "Lin reaches the salt gate"),
        CancellationToken::new(),
    );
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let outcome = match handle.await.unwrap().unwrap() {
        StreamOutcome::Completed(outcome) => outcome,
        StreamOutcome::Cancelled => panic!("run was not cancelled"),
    };

    let chapter = outcome.chapter;
    assert_eq!(chapter.number, 2);
    assert_eq!(
        chapter.content,
        "Lin reached the Salt Gate. The black key turned."
    );
    assert_eq!(chapter.title, "Chapter 2");

    // Start, one delta per chunk, then done.
    assert_eq!(events.len(), 5);
    assert_eq!(events[0], GenerationEvent::Start { chapter_number: 2 });
    let streamed: String = events[1..4]
        .iter()
        .map(|e| match e {
            GenerationEvent::Delta { text } => text.as_str(),
            other => panic!("expected delta, got {other:?}"),
        })
        .collect();
    assert_eq!(streamed, chapter.content);
    assert_eq!(
        events[4],
        GenerationEvent::Done {
            chapter_id: chapter.id
        }
    );

    // The prompt carried the previous chapter and the building-up thread.
    let requests = generator.requests();
    let prompt = requests[0].transcript();
    assert!(prompt.contains("Lin left the harbor"));
    assert!(prompt.contains("The black key"));
    assert!(prompt.contains("hint, do not reveal"));
    assert!(requests[1].transcript().contains("The black key"));

    let report = outcome.side_effects;
    assert_eq!(report.extraction, StepOutcome::Ok);
    assert_eq!(report.indexing, StepOutcome::Ok);
    assert_eq!(report.characters_updated, 1);
    assert_eq!(report.settings_updated, 1);
    assert_eq!(report.foreshadowing_revealed, 1);

    let lin = novel
        .store
        .list_characters(novel.novel_id)
        .unwrap()
        .into_iter()
        .find(|c| c.name == "Lin")
        .unwrap();
    assert_eq!(lin.last_appearance, Some(2));
    let gate = &novel.store.list_settings(novel.novel_id).unwrap()[0];
    assert_eq!(gate.related_chapters, vec![2]);
    let key = novel.store.get_foreshadowing(key.id).unwrap();
    assert!(key.revealed);
    assert_eq!(key.revealed_chapter, Some(2));

    let documents = index.documents();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].content, chapter.content);

    let stored = novel.store.get_novel(novel.novel_id).unwrap();
    assert_eq!(stored.chapter_count, 2);
}

#[tokio::test]
async fn test_cancel_mid_stream_persists_nothing() {
    let novel = TestNovel::new().unwrap();
    let cancel = CancellationToken::new();
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_chunks(["The rain ", "kept ", "falling."])
            .cancel_after(2, cancel.clone()),
    );
    let controller = controller(&novel, generator);

    let (tx, mut rx) = mpsc::channel(16);
    let outcome = controller
        .stream(
            ChapterRequest::direct(novel.novel_id, "Rain over the salt road"),
            tx,
            cancel,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, StreamOutcome::Cancelled));
    let events = drain(&mut rx);
    assert_eq!(events[0], GenerationEvent::Start { chapter_number: 1 });
    assert!(events.iter().all(|e| !e.is_terminal()));
    assert_eq!(novel.chapter_count(), 0);
}

#[tokio::test]
async fn test_cancel_before_start_persists_nothing() {
    let novel = TestNovel::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_reply("Never sent."));
    let controller = controller(&novel, generator.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (tx, mut rx) = mpsc::channel(16);
    let outcome = controller
        .stream(ChapterRequest::direct(novel.novel_id, "anything"), tx, cancel)
        .await
        .unwrap();

    assert!(matches!(outcome, StreamOutcome::Cancelled));
    assert!(drain(&mut rx).is_empty());
    assert!(generator.requests().is_empty());
    assert_eq!(novel.chapter_count(), 0);
}

#[tokio::test]
async fn test_dropped_receiver_stops_a_stalled_stream() {
    let novel = TestNovel::new().unwrap();
    let generator = Arc::new(
        ScriptedGenerator::new().with_script(Script::ChunksThenHang(vec!["The tide ".into()])),
    );
    let controller = Arc::new(controller(&novel, generator));

    let (mut rx, handle) = controller.spawn_stream(
        ChapterRequest::direct(novel.novel_id, "The tide comes in"),
        CancellationToken::new(),
    );
    assert!(matches!(rx.recv().await, Some(GenerationEvent::Start { .. })));
    assert!(matches!(rx.recv().await, Some(GenerationEvent::Delta { .. })));
    drop(rx);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("stream should stop once the receiver is gone")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, StreamOutcome::Cancelled));
    assert_eq!(novel.chapter_count(), 0);
}

#[tokio::test]
async fn test_mid_stream_failure_sends_one_error_event() {
    let novel = TestNovel::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_script(Script::ChunksThenFail(
        vec!["Half a ".into()],
        ProviderError::Stream("connection reset".into()),
    )));
    let controller = controller(&novel, generator);

    let (tx, mut rx) = mpsc::channel(16);
    let result = controller
        .stream(ChapterRequest::direct(novel.novel_id, "outline"), tx, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(NovelError::Upstream(_))));
    let events = drain(&mut rx);
    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    match events.last() {
        Some(GenerationEvent::Error { message }) => assert!(message.contains("connection reset")),
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(novel.chapter_count(), 0);
}

#[tokio::test]
async fn test_empty_generation_is_rejected() {
    let novel = TestNovel::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_chunks(Vec::<String>::new()));
    let controller = controller(&novel, generator);

    let (tx, mut rx) = mpsc::channel(16);
    let result = controller
        .stream(ChapterRequest::direct(novel.novel_id, "outline"), tx, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(NovelError::Upstream(_))));
    assert!(matches!(drain(&mut rx).last(), Some(GenerationEvent::Error { .. })));
    assert_eq!(novel.chapter_count(), 0);
}

#[tokio::test]
async fn test_plan_generation_is_idempotent() {
    let novel = TestNovel::new().unwrap();
    let plan = novel
        .store
        .create_plan(novel.volume_id, 1, "Arrival", "Lin arrives at the gate")
        .unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_reply("Lin arrived at the gate."));
    let controller = controller(&novel, generator.clone()).with_extraction(false);

    // Draft plans cannot be generated.
    assert!(matches!(
        controller.generate(ChapterRequest::plan(plan.id)).await,
        Err(NovelError::Conflict(_))
    ));
    assert!(generator.requests().is_empty());

    novel.store.confirm_plan(plan.id).unwrap();
    let outcome = controller.generate(ChapterRequest::plan(plan.id)).await.unwrap();
    assert_eq!(outcome.chapter.plan_id, Some(plan.id));
    assert_eq!(outcome.chapter.title, "Arrival");
    assert_eq!(outcome.chapter.outline, "Lin arrives at the gate");
    assert_eq!(outcome.side_effects.extraction, StepOutcome::Skipped);
    assert_eq!(
        novel.store.get_plan(plan.id).unwrap().status,
        PlanStatus::Drafted
    );

    // A fulfilled plan is a conflict and produces no second chapter.
    assert!(matches!(
        controller.generate(ChapterRequest::plan(plan.id)).await,
        Err(NovelError::Conflict(_))
    ));
    assert_eq!(novel.chapter_count(), 1);
    assert_eq!(generator.requests().len(), 1);
}

#[tokio::test]
async fn test_taken_chapter_number_conflicts_before_generating() {
    let novel = TestNovel::new().unwrap();
    novel.write_chapter(1, "Already written.").unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_reply("Unused."));
    let controller = controller(&novel, generator.clone());

    let request = ChapterRequest::Direct {
        novel_id: novel.novel_id,
        outline: "Rewrite chapter one".into(),
        title: None,
        number: Some(1),
        volume_id: None,
    };
    assert!(matches!(
        controller.generate(request).await,
        Err(NovelError::Conflict(_))
    ));
    assert!(generator.requests().is_empty());
    assert_eq!(novel.chapter_count(), 1);
}

#[tokio::test]
async fn test_refused_stream_sends_only_an_error() {
    let novel = TestNovel::new().unwrap();
    novel.write_chapter(1, "Already written.").unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_reply("Unused."));
    let controller = controller(&novel, generator.clone());

    let request = ChapterRequest::Direct {
        novel_id: novel.novel_id,
        outline: "Rewrite chapter one".into(),
        title: None,
        number: Some(1),
        volume_id: None,
    };
    let (tx, mut rx) = mpsc::channel(16);
    let result = controller
        .stream(request, tx, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(NovelError::Conflict(_))));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], GenerationEvent::Error { .. }));
    assert!(generator.requests().is_empty());
    assert_eq!(novel.chapter_count(), 1);
}

#[tokio::test]
async fn test_empty_outline_is_a_validation_error() {
    let novel = TestNovel::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new());
    let controller = controller(&novel, generator);

    assert!(matches!(
        controller
            .generate(ChapterRequest::direct(novel.novel_id, "   "))
            .await,
        Err(NovelError::Validation(_))
    ));
}

#[tokio::test]
async fn test_enrichment_failures_do_not_block_generation() {
    let novel = TestNovel::new().unwrap();
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_reply("Lin slept under the bridge.")
            .with_reply("I could not find any facts, sorry."),
    );
    let index = Arc::new(MemoryIndex::new());
    // Fails the context query; the upload afterwards succeeds.
    index.fail_next("index offline");
    let controller = controller(&novel, generator)
        .with_narrative_index(Some(index.clone() as Arc<dyn RetrievalIndex>));

    let outcome = controller
        .generate(ChapterRequest::direct(novel.novel_id, "Lin sleeps"))
        .await
        .unwrap();

    assert_eq!(novel.chapter_count(), 1);
    assert!(outcome.side_effects.extraction.is_failed());
    assert_eq!(outcome.side_effects.indexing, StepOutcome::Ok);
    assert!(outcome.side_effects.has_failures());
    assert_eq!(index.documents().len(), 1);
}
