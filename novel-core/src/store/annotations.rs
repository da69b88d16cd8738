use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::chapters::get_chapter_on;
use super::{enum_column, to_i64, Store};
use crate::error::{NovelError, Result};
use crate::model::{AnnotationId, AnnotationStatus, ChapterAnnotation, ChapterId};

const ANNOTATION_COLUMNS: &str =
    "id, chapter_id, quote, start_offset, end_offset, note, status, created_at";

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<ChapterAnnotation> {
    Ok(ChapterAnnotation {
        id: row.get(0)?,
        chapter_id: row.get(1)?,
        quote: row.get(2)?,
        start: row.get::<_, i64>(3)?.max(0) as usize,
        end: row.get::<_, i64>(4)?.max(0) as usize,
        note: row.get(5)?,
        status: enum_column(row.get(6)?, 6, AnnotationStatus::parse)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn get_annotation_on(conn: &Connection, id: AnnotationId) -> Result<ChapterAnnotation> {
    conn.query_row(
        &format!("SELECT {ANNOTATION_COLUMNS} FROM chapter_annotations WHERE id = ?1"),
        params![id],
        annotation_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("ChapterAnnotation", id))
}

/// Close an open annotation. Closed annotations never reopen.
pub(crate) fn close_annotation_on(
    conn: &Connection,
    id: AnnotationId,
    status: AnnotationStatus,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE chapter_annotations SET status = ?2 WHERE id = ?1 AND status = 'open'",
        params![id, status.as_str()],
    )?;
    if changed == 0 {
        let current = get_annotation_on(conn, id)?;
        return Err(NovelError::Conflict(format!(
            "annotation {id} is already {}",
            current.status.as_str()
        )));
    }
    Ok(())
}

impl Store {
    /// Record a reviewer note against `quote`, seen at char offset `start`.
    pub fn create_annotation(
        &self,
        chapter_id: ChapterId,
        quote: &str,
        start: usize,
        note: &str,
    ) -> Result<ChapterAnnotation> {
        if quote.is_empty() {
            return Err(NovelError::Validation("annotation quote is empty".into()));
        }
        let annotation = ChapterAnnotation {
            id: AnnotationId::new(),
            chapter_id,
            quote: quote.to_string(),
            start,
            end: start + crate::text::char_len(quote),
            note: note.to_string(),
            status: AnnotationStatus::Open,
            created_at: Utc::now(),
        };
        self.transaction(|tx| {
            get_chapter_on(tx, chapter_id)?;
            tx.execute(
                &format!(
                    "INSERT INTO chapter_annotations ({ANNOTATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    annotation.id,
                    annotation.chapter_id,
                    annotation.quote,
                    to_i64(annotation.start),
                    to_i64(annotation.end),
                    annotation.note,
                    annotation.status.as_str(),
                    annotation.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(annotation)
    }

    pub fn get_annotation(&self, id: AnnotationId) -> Result<ChapterAnnotation> {
        self.read(|conn| get_annotation_on(conn, id))
    }

    pub fn list_annotations(&self, chapter_id: ChapterId) -> Result<Vec<ChapterAnnotation>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ANNOTATION_COLUMNS} FROM chapter_annotations
                 WHERE chapter_id = ?1 ORDER BY start_offset, created_at"
            ))?;
            let annotations = stmt
                .query_map(params![chapter_id], annotation_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(annotations)
        })
    }

    pub fn dismiss_annotation(&self, id: AnnotationId) -> Result<ChapterAnnotation> {
        self.transaction(|tx| {
            close_annotation_on(tx, id, AnnotationStatus::Dismissed)?;
            get_annotation_on(tx, id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewChapter;

    fn setup() -> (Store, ChapterId) {
        let store = Store::open_in_memory().unwrap();
        let novel = store.create_novel("Tide", "", "").unwrap();
        let chapter = store
            .insert_generated_chapter(NewChapter {
                novel_id: novel.id,
                volume_id: None,
                plan_id: None,
                number: 1,
                title: "One".into(),
                content: "雨夜，林风推门而入。".into(),
                outline: String::new(),
            })
            .unwrap();
        (store, chapter.id)
    }

    #[test]
    fn test_create_records_char_offsets() {
        let (store, chapter_id) = setup();
        let annotation = store
            .create_annotation(chapter_id, "林风", 3, "give him a surname")
            .unwrap();
        assert_eq!(annotation.end, 5);

        let loaded = store.get_annotation(annotation.id).unwrap();
        assert_eq!(loaded.start, 3);
        assert_eq!(loaded.status, AnnotationStatus::Open);
    }

    #[test]
    fn test_dismiss_is_terminal() {
        let (store, chapter_id) = setup();
        let annotation = store.create_annotation(chapter_id, "雨夜", 0, "").unwrap();
        let dismissed = store.dismiss_annotation(annotation.id).unwrap();
        assert_eq!(dismissed.status, AnnotationStatus::Dismissed);
        assert!(matches!(
            store.dismiss_annotation(annotation.id),
            Err(NovelError::Conflict(_))
        ));
    }

    #[test]
    fn test_annotation_requires_chapter() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.create_annotation(ChapterId::new(), "x", 0, ""),
            Err(NovelError::NotFound { .. })
        ));
    }
}
