use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Store;
use crate::error::{NovelError, Result};
use crate::model::{Novel, NovelId, Volume, VolumeId};

const NOVEL_COLUMNS: &str = "id, title, genre, description, chapter_count, word_count, created_at";

fn novel_from_row(row: &Row<'_>) -> rusqlite::Result<Novel> {
    Ok(Novel {
        id: row.get(0)?,
        title: row.get(1)?,
        genre: row.get(2)?,
        description: row.get(3)?,
        chapter_count: row.get(4)?,
        word_count: row.get::<_, i64>(5)?.max(0) as u64,
        created_at: row.get(6)?,
    })
}

fn volume_from_row(row: &Row<'_>) -> rusqlite::Result<Volume> {
    Ok(Volume {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        title: row.get(2)?,
        ordinal: row.get(3)?,
    })
}

/// Recompute a novel's chapter and word counts from its chapter rows.
pub(crate) fn recompute_aggregates_on(conn: &Connection, novel_id: NovelId) -> Result<()> {
    conn.execute(
        "UPDATE novels SET
             chapter_count = (SELECT COUNT(*) FROM chapters WHERE novel_id = ?1),
             word_count = (SELECT COALESCE(SUM(word_count), 0) FROM chapters WHERE novel_id = ?1)
         WHERE id = ?1",
        params![novel_id],
    )?;
    Ok(())
}

pub(crate) fn get_novel_on(conn: &Connection, id: NovelId) -> Result<Novel> {
    conn.query_row(
        &format!("SELECT {NOVEL_COLUMNS} FROM novels WHERE id = ?1"),
        params![id],
        novel_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("Novel", id))
}

impl Store {
    pub fn create_novel(&self, title: &str, genre: &str, description: &str) -> Result<Novel> {
        if title.trim().is_empty() {
            return Err(NovelError::Validation("novel title is required".into()));
        }
        let novel = Novel {
            id: NovelId::new(),
            title: title.trim().to_string(),
            genre: genre.to_string(),
            description: description.to_string(),
            chapter_count: 0,
            word_count: 0,
            created_at: Utc::now(),
        };
        self.transaction(|tx| {
            tx.execute(
                &format!("INSERT INTO novels ({NOVEL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)"),
                params![
                    novel.id,
                    novel.title,
                    novel.genre,
                    novel.description,
                    novel.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(novel)
    }

    pub fn get_novel(&self, id: NovelId) -> Result<Novel> {
        self.read(|conn| get_novel_on(conn, id))
    }

    pub fn list_novels(&self) -> Result<Vec<Novel>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOVEL_COLUMNS} FROM novels ORDER BY created_at"
            ))?;
            let novels = stmt
                .query_map([], novel_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(novels)
        })
    }

    pub fn create_volume(&self, novel_id: NovelId, title: &str, ordinal: u32) -> Result<Volume> {
        let volume = Volume {
            id: VolumeId::new(),
            novel_id,
            title: title.to_string(),
            ordinal,
        };
        self.transaction(|tx| {
            get_novel_on(tx, novel_id)?;
            tx.execute(
                "INSERT INTO volumes (id, novel_id, title, ordinal) VALUES (?1, ?2, ?3, ?4)",
                params![volume.id, volume.novel_id, volume.title, volume.ordinal],
            )
            .map_err(|e| {
                super::conflict_on_unique(e, format!("volume {ordinal} already exists"))
            })?;
            Ok(())
        })?;
        Ok(volume)
    }

    pub fn get_volume(&self, id: VolumeId) -> Result<Volume> {
        self.read(|conn| {
            conn.query_row(
                "SELECT id, novel_id, title, ordinal FROM volumes WHERE id = ?1",
                params![id],
                volume_from_row,
            )
            .optional()?
            .ok_or_else(|| NovelError::not_found("Volume", id))
        })
    }

    pub fn list_volumes(&self, novel_id: NovelId) -> Result<Vec<Volume>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, novel_id, title, ordinal FROM volumes WHERE novel_id = ?1 ORDER BY ordinal",
            )?;
            let volumes = stmt
                .query_map(params![novel_id], volume_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(volumes)
        })
    }
}
