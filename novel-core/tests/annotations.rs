//! Annotation workflows: record, propose, apply, and survive edits.

use std::sync::Arc;

use novel_core::testing::{ScriptedGenerator, TestNovel};
use novel_core::versioning::AUTHOR_USER;
use novel_core::{
    AnnotationBounds, AnnotationService, AnnotationStatus, Chapter, NovelError, PromptComposer,
    VersionLedger, VersionParent,
};

const CHAPTER: &str = "The rain fell on the salt road. Lin waited by the gate.";
const QUOTE: &str = "Lin waited by the gate.";

struct Fixture {
    novel: TestNovel,
    chapter: Chapter,
    generator: Arc<ScriptedGenerator>,
    service: AnnotationService,
    ledger: VersionLedger,
}

fn fixture(generator: ScriptedGenerator) -> Fixture {
    let novel = TestNovel::new().unwrap();
    let chapter = novel.write_chapter(1, CHAPTER).unwrap();
    let generator = Arc::new(generator);
    let service = AnnotationService::new(
        novel.store.clone(),
        generator.clone(),
        PromptComposer::default(),
        AnnotationBounds::default(),
    );
    let ledger = VersionLedger::new(novel.store.clone());
    Fixture {
        novel,
        chapter,
        generator,
        service,
        ledger,
    }
}

fn quote_offset(content: &str) -> usize {
    content.chars().count() - QUOTE.chars().count()
}

#[tokio::test]
async fn test_propose_then_apply_after_an_unrelated_edit() {
    let f = fixture(ScriptedGenerator::new().with_reply("  Lin counted the seconds by the gate.\n"));
    let annotation = f
        .service
        .annotate(f.chapter.id, QUOTE, 0, "make it tenser")
        .unwrap();
    assert_eq!(annotation.start, quote_offset(CHAPTER));
    assert_eq!(annotation.end, annotation.start + QUOTE.chars().count());

    let proposal = f.service.propose(annotation.id).await.unwrap();
    assert_eq!(proposal.replacement, "Lin counted the seconds by the gate.");
    assert_eq!(proposal.original, QUOTE);
    let prompt = f.generator.requests()[0].transcript();
    assert!(prompt.contains("make it tenser"));
    assert!(prompt.contains(QUOTE));

    // Proposing writes nothing.
    assert_eq!(f.novel.store.get_chapter(f.chapter.id).unwrap().content, CHAPTER);
    assert_eq!(
        f.novel.store.get_annotation(annotation.id).unwrap().status,
        AnnotationStatus::Open
    );

    // An edit before the quote shifts it; apply relocates it.
    let edited = format!("Thunder. {CHAPTER}");
    f.ledger
        .update_chapter_content(f.chapter.id, None, &edited, AUTHOR_USER, "add thunder")
        .unwrap();

    let applied = f.service.apply(annotation.id, &proposal.replacement).unwrap();
    assert_eq!(applied.span.start, quote_offset(&edited));
    assert_eq!(
        applied.chapter.content,
        "Thunder. The rain fell on the salt road. Lin counted the seconds by the gate."
    );
    assert_eq!(applied.snapshot.content, edited);
    assert_eq!(applied.snapshot.number, 2);

    let history = f
        .ledger
        .history(VersionParent::Chapter(f.chapter.id))
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, CHAPTER);
    assert_eq!(
        f.novel.store.get_annotation(annotation.id).unwrap().status,
        AnnotationStatus::Applied
    );

    // Closed annotations stay closed.
    assert!(matches!(
        f.service.apply(annotation.id, "again"),
        Err(NovelError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_out_of_bounds_proposal_is_rejected() {
    let f = fixture(ScriptedGenerator::new().with_reply("No."));
    let annotation = f.service.annotate(f.chapter.id, QUOTE, 32, "shorter").unwrap();

    match f.service.propose(annotation.id).await {
        Err(NovelError::BoundsViolation { actual, min, max }) => {
            assert_eq!(actual, 3);
            assert_eq!((min, max), AnnotationBounds::default().range_for(QUOTE.len()));
        }
        other => panic!("expected bounds violation, got {other:?}"),
    }
    assert_eq!(
        f.novel.store.get_annotation(annotation.id).unwrap().status,
        AnnotationStatus::Open
    );
    assert_eq!(f.novel.store.get_chapter(f.chapter.id).unwrap().content, CHAPTER);
}

#[tokio::test]
async fn test_apply_generated_saves_in_one_step() {
    let f = fixture(ScriptedGenerator::new().with_reply("Lin paced before the gate."));
    let annotation = f.service.annotate(f.chapter.id, QUOTE, 32, "more motion").unwrap();

    let applied = f.service.apply_generated(annotation.id).await.unwrap();
    assert!(applied.chapter.content.ends_with("Lin paced before the gate."));
    assert_eq!(applied.snapshot.content, CHAPTER);
}

#[tokio::test]
async fn test_removed_quote_is_not_locatable() {
    let f = fixture(ScriptedGenerator::new().with_reply("unused replacement text"));
    let annotation = f.service.annotate(f.chapter.id, QUOTE, 32, "").unwrap();

    f.ledger
        .update_chapter_content(
            f.chapter.id,
            None,
            "The rain fell on the salt road. Nobody was at the gate.",
            AUTHOR_USER,
            "",
        )
        .unwrap();

    assert!(matches!(
        f.service.propose(annotation.id).await,
        Err(NovelError::NotLocatable)
    ));
    assert!(matches!(
        f.service.apply(annotation.id, "Lin left."),
        Err(NovelError::NotLocatable)
    ));
    // Only the manual edit produced a version.
    let history = f
        .ledger
        .history(VersionParent::Chapter(f.chapter.id))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(f.generator.requests().is_empty());
}

#[tokio::test]
async fn test_annotating_missing_text_fails() {
    let f = fixture(ScriptedGenerator::new());
    assert!(matches!(
        f.service.annotate(f.chapter.id, "the sea", 0, ""),
        Err(NovelError::NotLocatable)
    ));
    assert!(matches!(
        f.service.annotate(f.chapter.id, "", 0, ""),
        Err(NovelError::Validation(_))
    ));
}

#[tokio::test]
async fn test_dismissed_annotation_cannot_be_proposed() {
    let f = fixture(ScriptedGenerator::new().with_reply("Lin paced before the gate."));
    let annotation = f.service.annotate(f.chapter.id, QUOTE, 32, "").unwrap();
    let dismissed = f.service.dismiss(annotation.id).unwrap();
    assert_eq!(dismissed.status, AnnotationStatus::Dismissed);

    assert!(matches!(
        f.service.propose(annotation.id).await,
        Err(NovelError::Conflict(_))
    ));
    assert!(f.generator.requests().is_empty());
}
