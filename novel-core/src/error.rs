//! Error types for the narrative engine.
//!
//! Uses thiserror for ergonomic error definition. The taxonomy mirrors what
//! a caller has to do next: fix the input, pick another entity, wait for a
//! state change, re-select text, or retry the collaborator.

use crate::provider::ProviderError;

/// Main error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum NovelError {
    /// Malformed or missing required input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A state precondition was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The annotated quote no longer occurs in the chapter.
    #[error("Quoted text could not be located in the current content")]
    NotLocatable,

    /// Generated or replacement text length is outside the allowed ratio.
    #[error("Length {actual} is outside the allowed range {min}..={max}")]
    BoundsViolation {
        actual: usize,
        min: usize,
        max: usize,
    },

    /// The generation or retrieval collaborator failed or returned unusable output.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Relational store failure.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NovelError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        NovelError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Short machine-readable code, used in NDJSON error events and logs.
    pub fn code(&self) -> &'static str {
        match self {
            NovelError::Validation(_) => "validation",
            NovelError::NotFound { .. } => "not_found",
            NovelError::Conflict(_) => "conflict",
            NovelError::NotLocatable => "not_locatable",
            NovelError::BoundsViolation { .. } => "bounds_violation",
            NovelError::Upstream(_) => "upstream",
            NovelError::Store(_) => "store",
            NovelError::Serialization(_) => "serialization",
        }
    }

    /// Whether this is a storage-level uniqueness violation.
    pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    }
}

impl From<ProviderError> for NovelError {
    fn from(e: ProviderError) -> Self {
        NovelError::Upstream(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NovelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            NovelError::Validation("x".into()),
            NovelError::not_found("Chapter", 3),
            NovelError::Conflict("x".into()),
            NovelError::NotLocatable,
            NovelError::BoundsViolation {
                actual: 1,
                min: 2,
                max: 3,
            },
            NovelError::Upstream("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_not_found_message() {
        let err = NovelError::not_found("ChapterPlan", "abc");
        assert_eq!(err.to_string(), "ChapterPlan not found: abc");
    }
}
