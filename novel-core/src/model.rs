//! Domain types for novels, chapters and story memory.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new unique ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                Uuid::parse_str(text)
                    .map(Self)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

id_type!(
    /// Unique identifier for a novel.
    NovelId
);
id_type!(
    /// Unique identifier for a volume.
    VolumeId
);
id_type!(
    /// Unique identifier for a chapter.
    ChapterId
);
id_type!(
    /// Unique identifier for a chapter plan.
    PlanId
);
id_type!(
    /// Unique identifier for a technique note.
    TechniqueId
);
id_type!(
    /// Unique identifier for a version snapshot.
    VersionId
);
id_type!(
    /// Unique identifier for a character.
    CharacterId
);
id_type!(
    /// Unique identifier for a world setting.
    SettingId
);
id_type!(
    /// Unique identifier for a foreshadowing thread.
    ForeshadowingId
);
id_type!(
    /// Unique identifier for a chapter annotation.
    AnnotationId
);

/// A serialized novel with aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Novel {
    pub id: NovelId,
    pub title: String,
    pub genre: String,
    pub description: String,
    /// Recomputed from chapter rows after every chapter write.
    pub chapter_count: u32,
    /// Recomputed from chapter rows after every chapter write.
    pub word_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub novel_id: NovelId,
    pub title: String,
    pub ordinal: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub novel_id: NovelId,
    pub volume_id: Option<VolumeId>,
    pub plan_id: Option<PlanId>,
    /// Sequence number, unique within the novel.
    pub number: u32,
    pub title: String,
    pub content: String,
    pub outline: String,
    pub word_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a chapter plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Confirmed,
    Drafted,
    Done,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Confirmed => "confirmed",
            PlanStatus::Drafted => "drafted",
            PlanStatus::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(PlanStatus::Draft),
            "confirmed" => Some(PlanStatus::Confirmed),
            "drafted" => Some(PlanStatus::Drafted),
            "done" => Some(PlanStatus::Done),
            _ => None,
        }
    }

    /// The only state a plan may move to next.
    pub fn successor(&self) -> Option<PlanStatus> {
        match self {
            PlanStatus::Draft => Some(PlanStatus::Confirmed),
            PlanStatus::Confirmed => Some(PlanStatus::Drafted),
            PlanStatus::Drafted => Some(PlanStatus::Done),
            PlanStatus::Done => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlan {
    pub id: PlanId,
    pub novel_id: NovelId,
    pub volume_id: VolumeId,
    pub chapter_number: u32,
    pub title: String,
    /// The generation seed.
    pub outline: String,
    pub status: PlanStatus,
}

/// A reusable craft or style note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technique {
    pub id: TechniqueId,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Which kind of entity a version snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionedKind {
    Chapter,
    Plan,
    Technique,
}

impl VersionedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionedKind::Chapter => "chapter",
            VersionedKind::Plan => "plan",
            VersionedKind::Technique => "technique",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "chapter" => Some(VersionedKind::Chapter),
            "plan" => Some(VersionedKind::Plan),
            "technique" => Some(VersionedKind::Technique),
            _ => None,
        }
    }
}

/// The parent entity of a version snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VersionParent {
    Chapter(ChapterId),
    Plan(PlanId),
    Technique(TechniqueId),
}

impl VersionParent {
    pub fn kind(&self) -> VersionedKind {
        match self {
            VersionParent::Chapter(_) => VersionedKind::Chapter,
            VersionParent::Plan(_) => VersionedKind::Plan,
            VersionParent::Technique(_) => VersionedKind::Technique,
        }
    }

    /// The parent id in its stored text form.
    pub fn id_string(&self) -> String {
        match self {
            VersionParent::Chapter(id) => id.to_string(),
            VersionParent::Plan(id) => id.to_string(),
            VersionParent::Technique(id) => id.to_string(),
        }
    }
}

/// An immutable snapshot of a parent's mutable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVersion {
    pub id: VersionId,
    pub parent: VersionParent,
    /// Unique and increasing within the parent, starting at 1.
    pub number: u32,
    pub title: String,
    pub content: String,
    pub author: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub novel_id: NovelId,
    pub name: String,
    pub description: String,
    pub first_appearance: Option<u32>,
    pub last_appearance: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Character {
    /// Widen the appearance range to include `chapter`.
    pub fn record_appearance(&mut self, chapter: u32) {
        self.first_appearance = Some(self.first_appearance.map_or(chapter, |f| f.min(chapter)));
        self.last_appearance = Some(self.last_appearance.map_or(chapter, |l| l.max(chapter)));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSetting {
    pub id: SettingId,
    pub novel_id: NovelId,
    pub title: String,
    pub category: String,
    pub description: String,
    pub related_chapters: Vec<u32>,
    pub created_at: DateTime<Utc>,
}

impl WorldSetting {
    pub fn relate_chapter(&mut self, chapter: u32) {
        if !self.related_chapters.contains(&chapter) {
            self.related_chapters.push(chapter);
            self.related_chapters.sort_unstable();
        }
    }
}

/// A planted plot thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Foreshadowing {
    pub id: ForeshadowingId,
    pub novel_id: NovelId,
    pub title: String,
    pub content: String,
    pub planted_chapter: u32,
    pub planned_reveal_chapter: Option<u32>,
    pub revealed: bool,
    pub revealed_chapter: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Open,
    Applied,
    Dismissed,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationStatus::Open => "open",
            AnnotationStatus::Applied => "applied",
            AnnotationStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(AnnotationStatus::Open),
            "applied" => Some(AnnotationStatus::Applied),
            "dismissed" => Some(AnnotationStatus::Dismissed),
            _ => None,
        }
    }
}

/// A reviewer's note pinned to a quoted span of a chapter.
///
/// `start`/`end` are the char offsets at recording time. They are a hint for
/// reconciliation only and are never used directly for a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterAnnotation {
    pub id: AnnotationId,
    pub chapter_id: ChapterId,
    pub quote: String,
    pub start: usize,
    pub end: usize,
    pub note: String,
    pub status: AnnotationStatus,
    pub created_at: DateTime<Utc>,
}
