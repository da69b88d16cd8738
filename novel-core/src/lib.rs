//! Narrative memory and consistency engine for serialized fiction.
//!
//! This crate provides:
//! - Relevance-ranked story memory (characters, world settings)
//! - Foreshadowing scheduling across the buildup window
//! - Context assembly and prompt composition for chapter generation
//! - Streaming generation with cancellation and exactly-once persistence
//! - Reviewer annotations that survive edits to the chapter text
//! - An append-only version ledger for chapters, plans and technique notes
//!
//! # Quick Start
//!
//! ```ignore
//! use novel_core::{ChapterRequest, EngineConfig, NovelEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let claude = Arc::new(claude::Claude::from_env()?);
//!     let engine = NovelEngine::open("novel.db", claude, EngineConfig::from_env())?;
//!
//!     let novel = engine.store().create_novel("The Salt Road", "fantasy", "")?;
//!     let outcome = engine
//!         .controller()
//!         .generate(ChapterRequest::direct(novel.id, "Lin reaches the salt gate"))
//!         .await?;
//!     println!("{}", outcome.chapter.content);
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod memory;
pub mod model;
pub mod prompt;
pub mod provider;
pub mod reconcile;
pub mod retrieval;
pub mod store;
pub mod testing;
pub mod text;
pub mod versioning;

// Primary public API
pub use annotation::{AnnotationService, Applied, Proposal};
pub use config::{AnnotationBounds, ContextBudget, EngineConfig, GenerationConfig, RetrievalConfig};
pub use engine::{HealthReport, NovelEngine};
pub use error::{NovelError, Result};
pub use generation::{
    ChapterRequest, GenerationEvent, GenerationOutcome, SideEffectReport, StepOutcome,
    StreamOutcome, StreamingGenerationController,
};
pub use memory::{AssembledContext, ContextAssembler, ForeshadowingScheduler, RelevanceRanker};
pub use model::*;
pub use prompt::PromptComposer;
pub use provider::{GenerationRequest, Generator, ProviderError, RetrievalIndex};
pub use reconcile::{AnnotationReconciler, Span};
pub use retrieval::HttpRetrievalIndex;
pub use store::Store;
pub use testing::{MemoryIndex, ScriptedGenerator, TestNovel};
pub use versioning::{RestoredEntity, VersionLedger};
