use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{json_column, Store};
use crate::error::{NovelError, Result};
use crate::model::{Technique, TechniqueId};

const TECHNIQUE_COLUMNS: &str = "id, title, content, tags, updated_at";

fn technique_from_row(row: &Row<'_>) -> rusqlite::Result<Technique> {
    Ok(Technique {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        tags: json_column(row.get(3)?, 3)?,
        updated_at: row.get(4)?,
    })
}

pub(crate) fn get_technique_on(conn: &Connection, id: TechniqueId) -> Result<Technique> {
    conn.query_row(
        &format!("SELECT {TECHNIQUE_COLUMNS} FROM techniques WHERE id = ?1"),
        params![id],
        technique_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("Technique", id))
}

pub(crate) fn write_technique_text_on(
    conn: &Connection,
    id: TechniqueId,
    title: &str,
    content: &str,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE techniques SET title = ?2, content = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, title, content, Utc::now()],
    )?;
    if changed == 0 {
        return Err(NovelError::not_found("Technique", id));
    }
    Ok(())
}

impl Store {
    pub fn create_technique(&self, title: &str, content: &str, tags: &[String]) -> Result<Technique> {
        if title.trim().is_empty() {
            return Err(NovelError::Validation("technique title is required".into()));
        }
        let technique = Technique {
            id: TechniqueId::new(),
            title: title.trim().to_string(),
            content: content.to_string(),
            tags: tags.to_vec(),
            updated_at: Utc::now(),
        };
        self.transaction(|tx| {
            tx.execute(
                &format!("INSERT INTO techniques ({TECHNIQUE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    technique.id,
                    technique.title,
                    technique.content,
                    serde_json::to_string(&technique.tags)?,
                    technique.updated_at
                ],
            )?;
            Ok(())
        })?;
        Ok(technique)
    }

    pub fn get_technique(&self, id: TechniqueId) -> Result<Technique> {
        self.read(|conn| get_technique_on(conn, id))
    }

    pub fn list_techniques(&self) -> Result<Vec<Technique>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TECHNIQUE_COLUMNS} FROM techniques ORDER BY title"
            ))?;
            let techniques = stmt
                .query_map([], technique_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(techniques)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_survive_storage() {
        let store = Store::open_in_memory().unwrap();
        let tags = vec!["pacing".to_string(), "cliffhanger".to_string()];
        let technique = store
            .create_technique("End on a question", "Close scenes unresolved.", &tags)
            .unwrap();
        let loaded = store.get_technique(technique.id).unwrap();
        assert_eq!(loaded.tags, tags);
        assert_eq!(store.list_techniques().unwrap().len(), 1);
    }
}
