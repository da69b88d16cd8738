use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::novels::{get_novel_on, recompute_aggregates_on};
use super::{conflict_on_unique, enum_column, Store};
use crate::error::{NovelError, Result};
use crate::model::{Chapter, ChapterId, ChapterPlan, NovelId, PlanId, PlanStatus, VolumeId};
use crate::text;

const CHAPTER_COLUMNS: &str =
    "id, novel_id, volume_id, plan_id, number, title, content, outline, word_count, created_at, updated_at";

const PLAN_COLUMNS: &str = "id, novel_id, volume_id, chapter_number, title, outline, status";

/// A chapter about to be written by a completed generation.
#[derive(Debug, Clone)]
pub struct NewChapter {
    pub novel_id: NovelId,
    pub volume_id: Option<VolumeId>,
    pub plan_id: Option<PlanId>,
    pub number: u32,
    pub title: String,
    pub content: String,
    pub outline: String,
}

fn chapter_from_row(row: &Row<'_>) -> rusqlite::Result<Chapter> {
    Ok(Chapter {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        volume_id: row.get(2)?,
        plan_id: row.get(3)?,
        number: row.get(4)?,
        title: row.get(5)?,
        content: row.get(6)?,
        outline: row.get(7)?,
        word_count: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<ChapterPlan> {
    Ok(ChapterPlan {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        volume_id: row.get(2)?,
        chapter_number: row.get(3)?,
        title: row.get(4)?,
        outline: row.get(5)?,
        status: enum_column(row.get(6)?, 6, PlanStatus::parse)?,
    })
}

pub(crate) fn get_chapter_on(conn: &Connection, id: ChapterId) -> Result<Chapter> {
    conn.query_row(
        &format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?1"),
        params![id],
        chapter_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("Chapter", id))
}

pub(crate) fn get_plan_on(conn: &Connection, id: PlanId) -> Result<ChapterPlan> {
    conn.query_row(
        &format!("SELECT {PLAN_COLUMNS} FROM chapter_plans WHERE id = ?1"),
        params![id],
        plan_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("ChapterPlan", id))
}

/// Overwrite a chapter's live text and re-derive its word count.
pub(crate) fn write_chapter_text_on(
    conn: &Connection,
    id: ChapterId,
    title: &str,
    content: &str,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE chapters SET title = ?2, content = ?3, word_count = ?4, updated_at = ?5 WHERE id = ?1",
        params![id, title, content, text::word_count(content), Utc::now()],
    )?;
    if changed == 0 {
        return Err(NovelError::not_found("Chapter", id));
    }
    Ok(())
}

pub(crate) fn write_plan_text_on(
    conn: &Connection,
    id: PlanId,
    title: &str,
    outline: &str,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE chapter_plans SET title = ?2, outline = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, title, outline, Utc::now()],
    )?;
    if changed == 0 {
        return Err(NovelError::not_found("ChapterPlan", id));
    }
    Ok(())
}

/// Move a plan from `from` to its successor. Any other current state is a conflict.
fn advance_plan_on(conn: &Connection, id: PlanId, from: PlanStatus) -> Result<ChapterPlan> {
    let mut plan = get_plan_on(conn, id)?;
    let Some(next) = from.successor() else {
        return Err(NovelError::Conflict(format!("plan {id} is already done")));
    };
    if plan.status != from {
        return Err(NovelError::Conflict(format!(
            "plan {id} is {}, expected {}",
            plan.status.as_str(),
            from.as_str()
        )));
    }
    conn.execute(
        "UPDATE chapter_plans SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
        params![id, next.as_str(), Utc::now(), from.as_str()],
    )?;
    plan.status = next;
    Ok(plan)
}

impl Store {
    pub fn create_plan(
        &self,
        volume_id: VolumeId,
        chapter_number: u32,
        title: &str,
        outline: &str,
    ) -> Result<ChapterPlan> {
        if chapter_number == 0 {
            return Err(NovelError::Validation("chapter numbers start at 1".into()));
        }
        let volume = self.get_volume(volume_id)?;
        let plan = ChapterPlan {
            id: PlanId::new(),
            novel_id: volume.novel_id,
            volume_id,
            chapter_number,
            title: title.to_string(),
            outline: outline.to_string(),
            status: PlanStatus::Draft,
        };
        let now = Utc::now();
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO chapter_plans
                     (id, novel_id, volume_id, chapter_number, title, outline, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    plan.id,
                    plan.novel_id,
                    plan.volume_id,
                    plan.chapter_number,
                    plan.title,
                    plan.outline,
                    plan.status.as_str(),
                    now
                ],
            )?;
            Ok(())
        })?;
        Ok(plan)
    }

    pub fn get_plan(&self, id: PlanId) -> Result<ChapterPlan> {
        self.read(|conn| get_plan_on(conn, id))
    }

    pub fn list_plans(&self, volume_id: VolumeId) -> Result<Vec<ChapterPlan>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PLAN_COLUMNS} FROM chapter_plans WHERE volume_id = ?1 ORDER BY chapter_number"
            ))?;
            let plans = stmt
                .query_map(params![volume_id], plan_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(plans)
        })
    }

    /// `draft → confirmed`. Only confirmed plans may be generated from.
    pub fn confirm_plan(&self, id: PlanId) -> Result<ChapterPlan> {
        let plan = self.transaction(|tx| advance_plan_on(tx, id, PlanStatus::Draft))?;
        tracing::info!(plan = %id, "plan confirmed");
        Ok(plan)
    }

    /// `drafted → done`, once the author has signed off on the written chapter.
    pub fn mark_plan_done(&self, id: PlanId) -> Result<ChapterPlan> {
        let plan = self.transaction(|tx| advance_plan_on(tx, id, PlanStatus::Drafted))?;
        tracing::info!(plan = %id, "plan done");
        Ok(plan)
    }

    pub fn get_chapter(&self, id: ChapterId) -> Result<Chapter> {
        self.read(|conn| get_chapter_on(conn, id))
    }

    pub fn get_chapter_by_number(&self, novel_id: NovelId, number: u32) -> Result<Option<Chapter>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE novel_id = ?1 AND number = ?2"),
                    params![novel_id, number],
                    chapter_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_chapters(&self, novel_id: NovelId) -> Result<Vec<Chapter>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE novel_id = ?1 ORDER BY number"
            ))?;
            let chapters = stmt
                .query_map(params![novel_id], chapter_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(chapters)
        })
    }

    /// The last `limit` chapters numbered strictly below `target`, oldest first.
    pub fn chapters_before(
        &self,
        novel_id: NovelId,
        target: u32,
        limit: usize,
    ) -> Result<Vec<Chapter>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAPTER_COLUMNS} FROM chapters
                 WHERE novel_id = ?1 AND number < ?2
                 ORDER BY number DESC LIMIT ?3"
            ))?;
            let mut chapters = stmt
                .query_map(
                    params![novel_id, target, super::to_i64(limit)],
                    chapter_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            chapters.reverse();
            Ok(chapters)
        })
    }

    /// One past the highest written chapter number.
    pub fn next_chapter_number(&self, novel_id: NovelId) -> Result<u32> {
        self.read(|conn| {
            get_novel_on(conn, novel_id)?;
            let max: u32 = conn.query_row(
                "SELECT COALESCE(MAX(number), 0) FROM chapters WHERE novel_id = ?1",
                params![novel_id],
                |row| row.get(0),
            )?;
            Ok(max + 1)
        })
    }

    /// Whether a chapter already fulfils `plan_id`, or already holds `number`.
    pub fn chapter_exists(
        &self,
        novel_id: NovelId,
        number: u32,
        plan_id: Option<PlanId>,
    ) -> Result<bool> {
        self.read(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM chapters
                     WHERE (novel_id = ?1 AND number = ?2) OR (?3 IS NOT NULL AND plan_id = ?3))",
                params![novel_id, number, plan_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Persist a completed generation: insert the chapter, advance its plan to
    /// `drafted` and recompute the novel aggregates, all or nothing.
    ///
    /// The unique keys on `(novel_id, number)` and `plan_id` decide races; a
    /// violation surfaces as [`NovelError::Conflict`].
    pub fn insert_generated_chapter(&self, new: NewChapter) -> Result<Chapter> {
        let now = Utc::now();
        let chapter = Chapter {
            id: ChapterId::new(),
            novel_id: new.novel_id,
            volume_id: new.volume_id,
            plan_id: new.plan_id,
            number: new.number,
            word_count: text::word_count(&new.content),
            title: new.title,
            content: new.content,
            outline: new.outline,
            created_at: now,
            updated_at: now,
        };

        self.transaction(|tx| {
            if let Some(plan_id) = chapter.plan_id {
                let plan = get_plan_on(tx, plan_id)?;
                if plan.status != PlanStatus::Confirmed {
                    return Err(NovelError::Conflict(format!(
                        "plan {plan_id} is {}, not confirmed",
                        plan.status.as_str()
                    )));
                }
            }

            tx.execute(
                &format!(
                    "INSERT INTO chapters ({CHAPTER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    chapter.id,
                    chapter.novel_id,
                    chapter.volume_id,
                    chapter.plan_id,
                    chapter.number,
                    chapter.title,
                    chapter.content,
                    chapter.outline,
                    chapter.word_count,
                    chapter.created_at,
                    chapter.updated_at
                ],
            )
            .map_err(|e| {
                conflict_on_unique(
                    e,
                    format!("chapter {} already exists for this novel or plan", chapter.number),
                )
            })?;

            if let Some(plan_id) = chapter.plan_id {
                advance_plan_on(tx, plan_id, PlanStatus::Confirmed)?;
            }
            recompute_aggregates_on(tx, chapter.novel_id)?;
            Ok(())
        })?;

        tracing::info!(
            chapter = %chapter.id,
            number = chapter.number,
            words = chapter.word_count,
            "chapter persisted"
        );
        Ok(chapter)
    }
}
