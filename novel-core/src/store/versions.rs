use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Store;
use crate::error::{NovelError, Result};
use crate::model::{ContentVersion, VersionId, VersionParent, VersionedKind};

const VERSION_COLUMNS: &str =
    "id, parent_kind, parent_id, version_number, title, content, author, description, created_at";

fn parent_from_columns(kind: &str, id: &str) -> rusqlite::Result<VersionParent> {
    let bad = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
    };
    let kind = VersionedKind::parse(kind).ok_or_else(|| bad(1, format!("unknown parent kind '{kind}'")))?;
    let parent = match kind {
        VersionedKind::Chapter => id.parse().map(VersionParent::Chapter),
        VersionedKind::Plan => id.parse().map(VersionParent::Plan),
        VersionedKind::Technique => id.parse().map(VersionParent::Technique),
    };
    parent.map_err(|e| bad(2, e.to_string()))
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ContentVersion> {
    let kind: String = row.get(1)?;
    let parent_id: String = row.get(2)?;
    Ok(ContentVersion {
        id: row.get(0)?,
        parent: parent_from_columns(&kind, &parent_id)?,
        number: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        author: row.get(6)?,
        description: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// `max(existing) + 1` for `parent`, read inside the caller's transaction.
pub(crate) fn next_version_number_on(conn: &Connection, parent: VersionParent) -> Result<u32> {
    let max: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version_number), 0) FROM content_versions
         WHERE parent_kind = ?1 AND parent_id = ?2",
        params![parent.kind().as_str(), parent.id_string()],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

/// Append a snapshot row. The unique key on `(parent_kind, parent_id,
/// version_number)` rejects a concurrently taken number.
pub(crate) fn insert_version_on(
    conn: &Connection,
    parent: VersionParent,
    title: &str,
    content: &str,
    author: &str,
    description: &str,
) -> Result<ContentVersion> {
    let version = ContentVersion {
        id: VersionId::new(),
        parent,
        number: next_version_number_on(conn, parent)?,
        title: title.to_string(),
        content: content.to_string(),
        author: author.to_string(),
        description: description.to_string(),
        created_at: Utc::now(),
    };
    conn.execute(
        &format!(
            "INSERT INTO content_versions ({VERSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            version.id,
            parent.kind().as_str(),
            parent.id_string(),
            version.number,
            version.title,
            version.content,
            version.author,
            version.description,
            version.created_at
        ],
    )
    .map_err(|e| {
        super::conflict_on_unique(
            e,
            format!("version {} of {} was taken concurrently", version.number, parent.id_string()),
        )
    })?;
    tracing::debug!(
        parent = %parent.id_string(),
        kind = parent.kind().as_str(),
        number = version.number,
        "version snapshot"
    );
    Ok(version)
}

pub(crate) fn get_version_on(conn: &Connection, id: VersionId) -> Result<ContentVersion> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM content_versions WHERE id = ?1"),
        params![id],
        version_from_row,
    )
    .optional()?
    .ok_or_else(|| NovelError::not_found("ContentVersion", id))
}

impl Store {
    pub fn get_version(&self, id: VersionId) -> Result<ContentVersion> {
        self.read(|conn| get_version_on(conn, id))
    }

    /// All snapshots of `parent`, oldest first.
    pub fn list_versions(&self, parent: VersionParent) -> Result<Vec<ContentVersion>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM content_versions
                 WHERE parent_kind = ?1 AND parent_id = ?2
                 ORDER BY version_number"
            ))?;
            let versions = stmt
                .query_map(
                    params![parent.kind().as_str(), parent.id_string()],
                    version_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(versions)
        })
    }
}
