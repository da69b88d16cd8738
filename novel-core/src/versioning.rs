//! Append-only version ledger for chapters, plans and technique notes.
//!
//! Every overwrite of a versioned entity's text first snapshots the live
//! state. Restore is itself an overwrite, so it snapshots too, and history
//! only ever grows. Snapshot, overwrite and (for chapters) the novel
//! aggregate recompute share one store transaction.

use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{NovelError, Result};
use crate::generation::StepOutcome;
use crate::model::{
    Chapter, ChapterId, ChapterPlan, ContentVersion, PlanId, PlanStatus, Technique, TechniqueId,
    VersionId, VersionParent,
};
use crate::provider::RetrievalIndex;
use crate::store::{chapters, novels, techniques, versions, Store};

/// Author tag for edits made directly by a person.
pub const AUTHOR_USER: &str = "user";
/// Author tag for snapshots taken before applying an annotation.
pub const AUTHOR_ANNOTATION: &str = "annotation";
/// Author tag for snapshots taken before a restore.
pub const AUTHOR_RESTORE: &str = "restore";

/// The live entity after a restore.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoredEntity {
    Chapter(Chapter),
    Plan(ChapterPlan),
    Technique(Technique),
}

impl RestoredEntity {
    /// The restored text: chapter body, plan outline or technique content.
    pub fn content(&self) -> &str {
        match self {
            RestoredEntity::Chapter(c) => &c.content,
            RestoredEntity::Plan(p) => &p.outline,
            RestoredEntity::Technique(t) => &t.content,
        }
    }
}

/// Result of an edit made through the ledger.
#[derive(Debug, Clone)]
pub struct Edited<T> {
    pub entity: T,
    /// Snapshot of the state before the edit.
    pub snapshot: ContentVersion,
}

/// Live `(title, content)` of a versioned entity.
fn live_text_on(conn: &Connection, parent: VersionParent) -> Result<(String, String)> {
    Ok(match parent {
        VersionParent::Chapter(id) => {
            let c = chapters::get_chapter_on(conn, id)?;
            (c.title, c.content)
        }
        VersionParent::Plan(id) => {
            let p = chapters::get_plan_on(conn, id)?;
            (p.title, p.outline)
        }
        VersionParent::Technique(id) => {
            let t = techniques::get_technique_on(conn, id)?;
            (t.title, t.content)
        }
    })
}

/// A plan's outline is frozen once a chapter has been drafted from it.
fn ensure_plan_editable_on(conn: &Connection, id: PlanId) -> Result<()> {
    let plan = chapters::get_plan_on(conn, id)?;
    match plan.status {
        PlanStatus::Draft | PlanStatus::Confirmed => Ok(()),
        status => Err(NovelError::Conflict(format!(
            "plan {id} is {} and can no longer be edited",
            status.as_str()
        ))),
    }
}

fn write_text_on(conn: &Connection, parent: VersionParent, title: &str, content: &str) -> Result<()> {
    match parent {
        VersionParent::Chapter(id) => {
            chapters::write_chapter_text_on(conn, id, title, content)?;
            let chapter = chapters::get_chapter_on(conn, id)?;
            novels::recompute_aggregates_on(conn, chapter.novel_id)
        }
        VersionParent::Plan(id) => chapters::write_plan_text_on(conn, id, title, content),
        VersionParent::Technique(id) => techniques::write_technique_text_on(conn, id, title, content),
    }
}

/// Snapshot the live state of `parent`, then overwrite it. One transaction.
pub(crate) fn snapshot_and_write_on(
    conn: &Connection,
    parent: VersionParent,
    title: Option<&str>,
    content: &str,
    author: &str,
    description: &str,
) -> Result<ContentVersion> {
    let (live_title, live_content) = live_text_on(conn, parent)?;
    let snapshot =
        versions::insert_version_on(conn, parent, &live_title, &live_content, author, description)?;
    write_text_on(conn, parent, title.unwrap_or(&live_title), content)?;
    Ok(snapshot)
}

/// Snapshot and restore operations over the shared store.
#[derive(Clone)]
pub struct VersionLedger {
    store: Arc<Store>,
    technique_index: Option<Arc<dyn RetrievalIndex>>,
}

impl VersionLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            technique_index: None,
        }
    }

    /// Upload edited technique notes to this index, best-effort.
    pub fn with_technique_index(mut self, index: Option<Arc<dyn RetrievalIndex>>) -> Self {
        self.technique_index = index;
        self
    }

    /// Record the live state of `parent` without changing it.
    pub fn snapshot(
        &self,
        parent: VersionParent,
        author: &str,
        description: &str,
    ) -> Result<ContentVersion> {
        self.store.transaction(|tx| {
            let (title, content) = live_text_on(tx, parent)?;
            versions::insert_version_on(tx, parent, &title, &content, author, description)
        })
    }

    pub fn history(&self, parent: VersionParent) -> Result<Vec<ContentVersion>> {
        self.store.list_versions(parent)
    }

    /// Overwrite a chapter's text, keeping the prior text as a version.
    pub fn update_chapter_content(
        &self,
        id: ChapterId,
        title: Option<&str>,
        content: &str,
        author: &str,
        description: &str,
    ) -> Result<Edited<Chapter>> {
        let parent = VersionParent::Chapter(id);
        let (entity, snapshot) = self.store.transaction(|tx| {
            let snapshot = snapshot_and_write_on(tx, parent, title, content, author, description)?;
            Ok((chapters::get_chapter_on(tx, id)?, snapshot))
        })?;
        tracing::info!(chapter = %id, version = snapshot.number, "chapter content updated");
        Ok(Edited { entity, snapshot })
    }

    /// Overwrite a plan's outline. Plans that already produced a chapter are frozen.
    pub fn update_plan_outline(
        &self,
        id: PlanId,
        title: Option<&str>,
        outline: &str,
        author: &str,
        description: &str,
    ) -> Result<Edited<ChapterPlan>> {
        let parent = VersionParent::Plan(id);
        let (entity, snapshot) = self.store.transaction(|tx| {
            ensure_plan_editable_on(tx, id)?;
            let snapshot = snapshot_and_write_on(tx, parent, title, outline, author, description)?;
            Ok((chapters::get_plan_on(tx, id)?, snapshot))
        })?;
        Ok(Edited { entity, snapshot })
    }

    /// Overwrite a technique note, then push it to the technique index.
    ///
    /// The upload never fails the edit; its outcome is returned alongside.
    pub async fn update_technique(
        &self,
        id: TechniqueId,
        title: Option<&str>,
        content: &str,
        author: &str,
        description: &str,
    ) -> Result<(Edited<Technique>, StepOutcome)> {
        let parent = VersionParent::Technique(id);
        let (entity, snapshot) = self.store.transaction(|tx| {
            let snapshot = snapshot_and_write_on(tx, parent, title, content, author, description)?;
            Ok((techniques::get_technique_on(tx, id)?, snapshot))
        })?;

        let upload = match &self.technique_index {
            Some(index) => match index.upload(&entity.content, &entity.title).await {
                Ok(doc) => {
                    tracing::debug!(technique = %id, doc = %doc, "technique indexed");
                    StepOutcome::Ok
                }
                Err(e) => {
                    tracing::warn!(technique = %id, error = %e, "technique index upload failed");
                    StepOutcome::Failed(e.to_string())
                }
            },
            None => StepOutcome::Skipped,
        };
        Ok((Edited { entity, snapshot }, upload))
    }

    /// Make `version_id`'s content live again.
    ///
    /// The current live state is snapshotted first, so restoring never loses
    /// anything and restoring repeatedly only appends. Plans follow the same
    /// freeze as [`VersionLedger::update_plan_outline`].
    pub fn restore(&self, version_id: VersionId, author: &str) -> Result<RestoredEntity> {
        let restored = self.store.transaction(|tx| {
            let target = versions::get_version_on(tx, version_id)?;
            if let VersionParent::Plan(id) = target.parent {
                ensure_plan_editable_on(tx, id)?;
            }
            let description = format!("before restoring version {}", target.number);
            snapshot_and_write_on(
                tx,
                target.parent,
                Some(&target.title),
                &target.content,
                author,
                &description,
            )?;
            Ok(match target.parent {
                VersionParent::Chapter(id) => {
                    RestoredEntity::Chapter(chapters::get_chapter_on(tx, id)?)
                }
                VersionParent::Plan(id) => RestoredEntity::Plan(chapters::get_plan_on(tx, id)?),
                VersionParent::Technique(id) => {
                    RestoredEntity::Technique(techniques::get_technique_on(tx, id)?)
                }
            })
        })?;
        tracing::info!(version = %version_id, "version restored");
        Ok(restored)
    }
}
