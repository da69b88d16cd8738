//! Events delivered to a streaming generation caller, one JSON object per line.

use serde::{Deserialize, Serialize};

use crate::model::ChapterId;

/// One line of a streaming generation response.
///
/// A stream is `Start`, zero or more `Delta`s, then exactly one of `Done`
/// or `Error`. A request refused before streaming opens gets only `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    Start {
        #[serde(rename = "chapterNumber")]
        chapter_number: u32,
    },
    Delta {
        text: String,
    },
    Done {
        #[serde(rename = "chapterId")]
        chapter_id: ChapterId,
    },
    Error {
        message: String,
    },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationEvent::Done { .. } | GenerationEvent::Error { .. })
    }

    /// Serialize as a single NDJSON line, newline included.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
