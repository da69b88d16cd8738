//! Story memory selection: what the model gets to see for a chapter.
//!
//! Ranking and scheduling are pure functions over rows already loaded from
//! the store; [`ContextAssembler`] does the loading and the optional
//! retrieval calls around them.

mod context;
mod foreshadowing;
mod relevance;

pub use context::{
    AssembledContext, ChapterDigest, ContextAssembler, RetrievalSnippet, SnippetSource,
    BACKGROUND_INSTRUCTION, BUILDUP_INSTRUCTION, DUE_INSTRUCTION,
};
pub use foreshadowing::{ForeshadowingPlan, ForeshadowingScheduler, OUTLINE_MENTION_BONUS};
pub use relevance::{recency_bonus, Ranked, RelevanceRanker, MENTION_BONUS, RECENT_SETTING_BONUS};
