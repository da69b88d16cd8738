//! Version history through the engine facade, on a file-backed store.

use std::sync::Arc;

use novel_core::testing::{MemoryIndex, ScriptedGenerator};
use novel_core::versioning::{AUTHOR_RESTORE, AUTHOR_USER};
use novel_core::{
    ChapterRequest, EngineConfig, NovelEngine, NovelError, RestoredEntity, RetrievalIndex,
    StepOutcome, VersionParent,
};

fn engine(dir: &tempfile::TempDir, generator: ScriptedGenerator) -> NovelEngine {
    NovelEngine::open(dir.path().join("novel.db"), Arc::new(generator), EngineConfig::new())
        .unwrap()
        .with_indexes(None, None)
        .with_extraction(false)
}

#[tokio::test]
async fn test_chapter_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (chapter_id, first_version) = {
        let engine = engine(&dir, ScriptedGenerator::new().with_reply("The gate opened."));
        let novel = engine.store().create_novel("The Salt Road", "fantasy", "").unwrap();
        let outcome = engine
            .controller()
            .generate(ChapterRequest::direct(novel.id, "The gate opens"))
            .await
            .unwrap();
        let edit = engine
            .ledger()
            .update_chapter_content(
                outcome.chapter.id,
                None,
                "The gate opened slowly.",
                AUTHOR_USER,
                "slow it down",
            )
            .unwrap();
        (outcome.chapter.id, edit.snapshot)
    };

    let engine = engine(&dir, ScriptedGenerator::new());
    let ledger = engine.ledger();
    let parent = VersionParent::Chapter(chapter_id);
    assert_eq!(ledger.history(parent).unwrap().len(), 1);

    let restored = ledger.restore(first_version.id, AUTHOR_RESTORE).unwrap();
    assert!(matches!(restored, RestoredEntity::Chapter(_)));
    let live = engine.store().get_chapter(chapter_id).unwrap();
    assert_eq!(live.content.as_bytes(), first_version.content.as_bytes());

    let history = ledger.history(parent).unwrap();
    let numbers: Vec<u32> = history.iter().map(|v| v.number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(history[1].content, "The gate opened slowly.");
    assert_eq!(history[1].author, AUTHOR_RESTORE);
}

#[tokio::test]
async fn test_technique_edits_are_versioned_and_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryIndex::new());
    let engine = engine(&dir, ScriptedGenerator::new())
        .with_indexes(None, Some(index.clone() as Arc<dyn RetrievalIndex>));
    let technique = engine
        .store()
        .create_technique("Cliffhangers", "End on a question.", &["structure".to_string()])
        .unwrap();

    let (edited, upload) = engine
        .ledger()
        .update_technique(
            technique.id,
            None,
            "End on an unanswered question.",
            AUTHOR_USER,
            "",
        )
        .await
        .unwrap();
    assert_eq!(upload, StepOutcome::Ok);
    assert_eq!(edited.snapshot.content, "End on a question.");
    assert_eq!(edited.entity.tags, vec!["structure".to_string()]);
    assert_eq!(index.documents()[0].content, "End on an unanswered question.");

    // A failed upload does not undo the edit.
    index.fail_next("index offline");
    let (edited, upload) = engine
        .ledger()
        .update_technique(technique.id, Some("Endings"), "Stop mid-scene.", AUTHOR_USER, "")
        .await
        .unwrap();
    assert!(upload.is_failed());
    assert_eq!(edited.entity.title, "Endings");
    assert_eq!(
        engine.store().get_technique(technique.id).unwrap().content,
        "Stop mid-scene."
    );

    let restored = engine
        .ledger()
        .restore(edited.snapshot.id, AUTHOR_RESTORE)
        .unwrap();
    assert_eq!(restored.content(), "End on an unanswered question.");
    match restored {
        RestoredEntity::Technique(t) => assert_eq!(t.title, "Cliffhangers"),
        other => panic!("expected technique, got {other:?}"),
    }
}

#[tokio::test]
async fn test_plan_outline_freezes_once_drafted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir, ScriptedGenerator::new().with_reply("Lin crossed."));
    let store = engine.store();
    let novel = store.create_novel("The Salt Road", "", "").unwrap();
    let volume = store.create_volume(novel.id, "Book One", 1).unwrap();
    let plan = store.create_plan(volume.id, 1, "Crossing", "Lin crosses").unwrap();

    let ledger = engine.ledger();
    let edited = ledger
        .update_plan_outline(plan.id, None, "Lin crosses the flats", AUTHOR_USER, "")
        .unwrap();
    assert_eq!(edited.entity.outline, "Lin crosses the flats");
    assert_eq!(edited.snapshot.content, "Lin crosses");

    store.confirm_plan(plan.id).unwrap();
    let outcome = engine
        .controller()
        .generate(ChapterRequest::plan(plan.id))
        .await
        .unwrap();
    assert_eq!(outcome.chapter.outline, "Lin crosses the flats");

    assert!(matches!(
        ledger.update_plan_outline(plan.id, None, "too late", AUTHOR_USER, ""),
        Err(NovelError::Conflict(_))
    ));
    assert_eq!(ledger.history(VersionParent::Plan(plan.id)).unwrap().len(), 1);
}
