use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::novels::get_novel_on;
use super::{conflict_on_unique, json_column, Store};
use crate::error::{NovelError, Result};
use crate::model::{
    Character, CharacterId, Foreshadowing, ForeshadowingId, NovelId, SettingId, WorldSetting,
};

const CHARACTER_COLUMNS: &str =
    "id, novel_id, name, description, first_appearance, last_appearance, created_at";
const SETTING_COLUMNS: &str =
    "id, novel_id, title, category, description, related_chapters, created_at";
const FORESHADOWING_COLUMNS: &str = "id, novel_id, title, content, planted_chapter, \
     planned_reveal_chapter, revealed, revealed_chapter, created_at";

#[derive(Debug, Clone, Default)]
pub struct NewCharacter {
    pub name: String,
    pub description: String,
    pub first_appearance: Option<u32>,
    pub last_appearance: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSetting {
    pub title: String,
    pub category: String,
    pub description: String,
    pub related_chapters: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct NewForeshadowing {
    pub title: String,
    pub content: String,
    pub planted_chapter: u32,
    pub planned_reveal_chapter: Option<u32>,
}

fn character_from_row(row: &Row<'_>) -> rusqlite::Result<Character> {
    Ok(Character {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        first_appearance: row.get(4)?,
        last_appearance: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn setting_from_row(row: &Row<'_>) -> rusqlite::Result<WorldSetting> {
    Ok(WorldSetting {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        title: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        related_chapters: json_column(row.get(5)?, 5)?,
        created_at: row.get(6)?,
    })
}

fn foreshadowing_from_row(row: &Row<'_>) -> rusqlite::Result<Foreshadowing> {
    Ok(Foreshadowing {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        planted_chapter: row.get(4)?,
        planned_reveal_chapter: row.get(5)?,
        revealed: row.get(6)?,
        revealed_chapter: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn find_character_on(conn: &Connection, novel_id: NovelId, name: &str) -> Result<Option<Character>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CHARACTER_COLUMNS} FROM characters WHERE novel_id = ?1 AND name = ?2"),
            params![novel_id, name],
            character_from_row,
        )
        .optional()?)
}

fn find_setting_on(conn: &Connection, novel_id: NovelId, title: &str) -> Result<Option<WorldSetting>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SETTING_COLUMNS} FROM world_settings WHERE novel_id = ?1 AND title = ?2"),
            params![novel_id, title],
            setting_from_row,
        )
        .optional()?)
}

fn get_foreshadowing_on(conn: &Connection, id: ForeshadowingId) -> Result<Foreshadowing> {
    conn.query_row(
        &format!("SELECT {FORESHADOWING_COLUMNS} FROM foreshadowings WHERE id = ?1"),
        params![id],
        foreshadowing_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("Foreshadowing", id))
}

fn insert_character_on(conn: &Connection, character: &Character) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO characters ({CHARACTER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            character.id,
            character.novel_id,
            character.name,
            character.description,
            character.first_appearance,
            character.last_appearance,
            character.created_at
        ],
    )
    .map_err(|e| conflict_on_unique(e, format!("character '{}' already exists", character.name)))?;
    Ok(())
}

fn insert_setting_on(conn: &Connection, setting: &WorldSetting) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO world_settings ({SETTING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            setting.id,
            setting.novel_id,
            setting.title,
            setting.category,
            setting.description,
            serde_json::to_string(&setting.related_chapters)?,
            setting.created_at
        ],
    )
    .map_err(|e| conflict_on_unique(e, format!("setting '{}' already exists", setting.title)))?;
    Ok(())
}

fn required(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NovelError::Validation(format!("{what} is required")));
    }
    Ok(trimmed.to_string())
}

impl Store {
    pub fn create_character(&self, novel_id: NovelId, new: NewCharacter) -> Result<Character> {
        let character = Character {
            id: CharacterId::new(),
            novel_id,
            name: required(&new.name, "character name")?,
            description: new.description,
            first_appearance: new.first_appearance,
            last_appearance: new.last_appearance,
            created_at: Utc::now(),
        };
        self.transaction(|tx| {
            get_novel_on(tx, novel_id)?;
            insert_character_on(tx, &character)
        })?;
        Ok(character)
    }

    pub fn list_characters(&self, novel_id: NovelId) -> Result<Vec<Character>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHARACTER_COLUMNS} FROM characters WHERE novel_id = ?1 ORDER BY name"
            ))?;
            let characters = stmt
                .query_map(params![novel_id], character_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(characters)
        })
    }

    /// Record that `name` appeared in `chapter`, creating the character if new.
    ///
    /// A non-empty `description` replaces the stored one.
    pub fn record_character_appearance(
        &self,
        novel_id: NovelId,
        name: &str,
        description: &str,
        chapter: u32,
    ) -> Result<Character> {
        let name = required(name, "character name")?;
        self.transaction(|tx| match find_character_on(tx, novel_id, &name)? {
            Some(mut character) => {
                character.record_appearance(chapter);
                if !description.trim().is_empty() {
                    character.description = description.trim().to_string();
                }
                tx.execute(
                    "UPDATE characters SET description = ?2, first_appearance = ?3, last_appearance = ?4
                     WHERE id = ?1",
                    params![
                        character.id,
                        character.description,
                        character.first_appearance,
                        character.last_appearance
                    ],
                )?;
                Ok(character)
            }
            None => {
                let character = Character {
                    id: CharacterId::new(),
                    novel_id,
                    name: name.clone(),
                    description: description.trim().to_string(),
                    first_appearance: Some(chapter),
                    last_appearance: Some(chapter),
                    created_at: Utc::now(),
                };
                insert_character_on(tx, &character)?;
                Ok(character)
            }
        })
    }

    pub fn create_setting(&self, novel_id: NovelId, new: NewSetting) -> Result<WorldSetting> {
        let mut related = new.related_chapters;
        related.sort_unstable();
        related.dedup();
        let setting = WorldSetting {
            id: SettingId::new(),
            novel_id,
            title: required(&new.title, "setting title")?,
            category: new.category,
            description: new.description,
            related_chapters: related,
            created_at: Utc::now(),
        };
        self.transaction(|tx| {
            get_novel_on(tx, novel_id)?;
            insert_setting_on(tx, &setting)
        })?;
        Ok(setting)
    }

    pub fn list_settings(&self, novel_id: NovelId) -> Result<Vec<WorldSetting>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SETTING_COLUMNS} FROM world_settings WHERE novel_id = ?1 ORDER BY title"
            ))?;
            let settings = stmt
                .query_map(params![novel_id], setting_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(settings)
        })
    }

    /// Relate `chapter` to the setting titled `title`, creating it if new.
    pub fn record_setting_mention(
        &self,
        novel_id: NovelId,
        title: &str,
        category: &str,
        description: &str,
        chapter: u32,
    ) -> Result<WorldSetting> {
        let title = required(title, "setting title")?;
        self.transaction(|tx| match find_setting_on(tx, novel_id, &title)? {
            Some(mut setting) => {
                setting.relate_chapter(chapter);
                if !description.trim().is_empty() {
                    setting.description = description.trim().to_string();
                }
                tx.execute(
                    "UPDATE world_settings SET description = ?2, related_chapters = ?3 WHERE id = ?1",
                    params![
                        setting.id,
                        setting.description,
                        serde_json::to_string(&setting.related_chapters)?
                    ],
                )?;
                Ok(setting)
            }
            None => {
                let setting = WorldSetting {
                    id: SettingId::new(),
                    novel_id,
                    title: title.clone(),
                    category: category.to_string(),
                    description: description.trim().to_string(),
                    related_chapters: vec![chapter],
                    created_at: Utc::now(),
                };
                insert_setting_on(tx, &setting)?;
                Ok(setting)
            }
        })
    }

    pub fn create_foreshadowing(
        &self,
        novel_id: NovelId,
        new: NewForeshadowing,
    ) -> Result<Foreshadowing> {
        let item = Foreshadowing {
            id: ForeshadowingId::new(),
            novel_id,
            title: required(&new.title, "foreshadowing title")?,
            content: new.content,
            planted_chapter: new.planted_chapter,
            planned_reveal_chapter: new.planned_reveal_chapter,
            revealed: false,
            revealed_chapter: None,
            created_at: Utc::now(),
        };
        self.transaction(|tx| {
            get_novel_on(tx, novel_id)?;
            tx.execute(
                &format!(
                    "INSERT INTO foreshadowings ({FORESHADOWING_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7)"
                ),
                params![
                    item.id,
                    item.novel_id,
                    item.title,
                    item.content,
                    item.planted_chapter,
                    item.planned_reveal_chapter,
                    item.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(item)
    }

    pub fn get_foreshadowing(&self, id: ForeshadowingId) -> Result<Foreshadowing> {
        self.read(|conn| get_foreshadowing_on(conn, id))
    }

    pub fn list_foreshadowing(&self, novel_id: NovelId) -> Result<Vec<Foreshadowing>> {
        self.list_foreshadowing_where(novel_id, "")
    }

    pub fn list_unrevealed_foreshadowing(&self, novel_id: NovelId) -> Result<Vec<Foreshadowing>> {
        self.list_foreshadowing_where(novel_id, "AND revealed = 0")
    }

    fn list_foreshadowing_where(&self, novel_id: NovelId, filter: &str) -> Result<Vec<Foreshadowing>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FORESHADOWING_COLUMNS} FROM foreshadowings
                 WHERE novel_id = ?1 {filter} ORDER BY planted_chapter, created_at"
            ))?;
            let items = stmt
                .query_map(params![novel_id], foreshadowing_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    /// Mark a thread revealed in `chapter`. Revealing is one-way: a second
    /// reveal is a conflict and never moves `revealed_chapter`.
    pub fn reveal_foreshadowing(&self, id: ForeshadowingId, chapter: u32) -> Result<Foreshadowing> {
        self.transaction(|tx| {
            let mut item = get_foreshadowing_on(tx, id)?;
            if item.revealed {
                return Err(NovelError::Conflict(format!(
                    "foreshadowing '{}' was already revealed",
                    item.title
                )));
            }
            tx.execute(
                "UPDATE foreshadowings SET revealed = 1, revealed_chapter = ?2 WHERE id = ?1 AND revealed = 0",
                params![id, chapter],
            )?;
            item.revealed = true;
            item.revealed_chapter = Some(chapter);
            tracing::info!(foreshadowing = %id, chapter, "foreshadowing revealed");
            Ok(item)
        })
    }
}
