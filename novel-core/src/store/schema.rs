use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    // The unique keys on chapters and content_versions are the authoritative
    // guards against duplicate generation and duplicate version numbers.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS novels (
            id            TEXT PRIMARY KEY,
            title         TEXT NOT NULL,
            genre         TEXT NOT NULL DEFAULT '',
            description   TEXT NOT NULL DEFAULT '',
            chapter_count INTEGER NOT NULL DEFAULT 0,
            word_count    INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS volumes (
            id       TEXT PRIMARY KEY,
            novel_id TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            title    TEXT NOT NULL,
            ordinal  INTEGER NOT NULL,
            UNIQUE (novel_id, ordinal)
        );

        CREATE TABLE IF NOT EXISTS chapter_plans (
            id             TEXT PRIMARY KEY,
            novel_id       TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            volume_id      TEXT NOT NULL REFERENCES volumes(id) ON DELETE CASCADE,
            chapter_number INTEGER NOT NULL,
            title          TEXT NOT NULL DEFAULT '',
            outline        TEXT NOT NULL DEFAULT '',
            status         TEXT NOT NULL DEFAULT 'draft',
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chapters (
            id          TEXT PRIMARY KEY,
            novel_id    TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            volume_id   TEXT REFERENCES volumes(id) ON DELETE SET NULL,
            plan_id     TEXT UNIQUE REFERENCES chapter_plans(id) ON DELETE SET NULL,
            number      INTEGER NOT NULL,
            title       TEXT NOT NULL DEFAULT '',
            content     TEXT NOT NULL DEFAULT '',
            outline     TEXT NOT NULL DEFAULT '',
            word_count  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE (novel_id, number)
        );

        CREATE TABLE IF NOT EXISTS techniques (
            id         TEXT PRIMARY KEY,
            title      TEXT NOT NULL,
            content    TEXT NOT NULL DEFAULT '',
            tags       TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS content_versions (
            id             TEXT PRIMARY KEY,
            parent_kind    TEXT NOT NULL,
            parent_id      TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            title          TEXT NOT NULL DEFAULT '',
            content        TEXT NOT NULL,
            author         TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            created_at     TEXT NOT NULL,
            UNIQUE (parent_kind, parent_id, version_number)
        );

        CREATE TABLE IF NOT EXISTS characters (
            id               TEXT PRIMARY KEY,
            novel_id         TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            name             TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            first_appearance INTEGER,
            last_appearance  INTEGER,
            created_at       TEXT NOT NULL,
            UNIQUE (novel_id, name)
        );

        CREATE TABLE IF NOT EXISTS world_settings (
            id               TEXT PRIMARY KEY,
            novel_id         TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            title            TEXT NOT NULL,
            category         TEXT NOT NULL DEFAULT '',
            description      TEXT NOT NULL DEFAULT '',
            related_chapters TEXT NOT NULL DEFAULT '[]',
            created_at       TEXT NOT NULL,
            UNIQUE (novel_id, title)
        );

        CREATE TABLE IF NOT EXISTS foreshadowings (
            id                     TEXT PRIMARY KEY,
            novel_id               TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
            title                  TEXT NOT NULL,
            content                TEXT NOT NULL DEFAULT '',
            planted_chapter        INTEGER NOT NULL,
            planned_reveal_chapter INTEGER,
            revealed               INTEGER NOT NULL DEFAULT 0,
            revealed_chapter       INTEGER,
            created_at             TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chapter_annotations (
            id           TEXT PRIMARY KEY,
            chapter_id   TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
            quote        TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset   INTEGER NOT NULL,
            note         TEXT NOT NULL DEFAULT '',
            status       TEXT NOT NULL DEFAULT 'open',
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chapters_novel ON chapters(novel_id, number);
        CREATE INDEX IF NOT EXISTS idx_plans_volume ON chapter_plans(volume_id, chapter_number);
        CREATE INDEX IF NOT EXISTS idx_versions_parent ON content_versions(parent_kind, parent_id);
        CREATE INDEX IF NOT EXISTS idx_characters_novel ON characters(novel_id);
        CREATE INDEX IF NOT EXISTS idx_settings_novel ON world_settings(novel_id);
        CREATE INDEX IF NOT EXISTS idx_foreshadowings_novel ON foreshadowings(novel_id, revealed);
        CREATE INDEX IF NOT EXISTS idx_annotations_chapter ON chapter_annotations(chapter_id, status);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    tracing::debug!(version = SCHEMA_VERSION, "store schema initialized");
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for table in &[
            "novels",
            "volumes",
            "chapter_plans",
            "chapters",
            "techniques",
            "content_versions",
            "characters",
            "world_settings",
            "foreshadowings",
            "chapter_annotations",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "table {table} should exist and be empty");
        }
    }

    #[test]
    fn test_idempotent_initialize() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_version_numbers_are_unique_per_parent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let insert = "INSERT INTO content_versions
            (id, parent_kind, parent_id, version_number, content, author, created_at)
            VALUES (?1, 'chapter', 'p1', ?2, 'x', 'test', '2024-01-01')";
        conn.execute(insert, rusqlite::params!["v1", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["v2", 2]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["v3", 1]).is_err());
    }
}
