//! High-level entry point wiring the store, the collaborators and the
//! configuration into the engine's services.

use std::path::Path;
use std::sync::Arc;

use crate::annotation::AnnotationService;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::generation::StreamingGenerationController;
use crate::prompt::PromptComposer;
use crate::provider::{Generator, IndexHealth, RetrievalIndex};
use crate::retrieval::HttpRetrievalIndex;
use crate::store::Store;
use crate::versioning::VersionLedger;

/// Health of each configured collaborator. `None` means not configured.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub narrative_index: Option<IndexHealth>,
    pub technique_index: Option<IndexHealth>,
}

/// One novel database plus the collaborators it is generated with.
///
/// # Example
///
/// ```ignore
/// use novel_core::{ChapterRequest, EngineConfig, NovelEngine};
///
/// let engine = NovelEngine::open("novel.db", claude, EngineConfig::from_env())?;
/// let outcome = engine
///     .controller()
///     .generate(ChapterRequest::direct(novel_id, "Lin reaches the salt gate"))
///     .await?;
/// println!("{}", outcome.chapter.content);
/// ```
#[derive(Clone)]
pub struct NovelEngine {
    store: Arc<Store>,
    generator: Arc<dyn Generator>,
    config: EngineConfig,
    narrative_index: Option<Arc<dyn RetrievalIndex>>,
    technique_index: Option<Arc<dyn RetrievalIndex>>,
    extract: bool,
}

impl NovelEngine {
    /// Build an engine over an open store. Retrieval indexes are created from
    /// `config.retrieval`; override them with [`with_indexes`](Self::with_indexes).
    pub fn new(store: Arc<Store>, generator: Arc<dyn Generator>, config: EngineConfig) -> Self {
        let (narrative_index, technique_index) = HttpRetrievalIndex::from_config(&config.retrieval);
        Self {
            store,
            generator,
            config,
            narrative_index,
            technique_index,
            extract: true,
        }
    }

    /// Open (or create) the database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        generator: Arc<dyn Generator>,
        config: EngineConfig,
    ) -> Result<Self> {
        let store = Arc::new(Store::open(path.as_ref())?);
        Ok(Self::new(store, generator, config))
    }

    pub fn with_indexes(
        mut self,
        narrative: Option<Arc<dyn RetrievalIndex>>,
        technique: Option<Arc<dyn RetrievalIndex>>,
    ) -> Self {
        self.narrative_index = narrative;
        self.technique_index = technique;
        self
    }

    /// Turn post-generation entity extraction on or off.
    pub fn with_extraction(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> Arc<StreamingGenerationController> {
        Arc::new(
            StreamingGenerationController::new(
                self.store.clone(),
                self.generator.clone(),
                &self.config,
            )
            .with_narrative_index(self.narrative_index.clone())
            .with_technique_index(self.technique_index.clone())
            .with_extraction(self.extract),
        )
    }

    pub fn annotations(&self) -> AnnotationService {
        AnnotationService::new(
            self.store.clone(),
            self.generator.clone(),
            PromptComposer::new(self.config.generation.clone(), self.config.annotation.clone()),
            self.config.annotation.clone(),
        )
    }

    pub fn ledger(&self) -> VersionLedger {
        VersionLedger::new(self.store.clone()).with_technique_index(self.technique_index.clone())
    }

    /// Check each configured index. A failing check is reported as unhealthy,
    /// never as an error.
    pub async fn health(&self) -> HealthReport {
        async fn check(index: &Option<Arc<dyn RetrievalIndex>>) -> Option<IndexHealth> {
            let index = index.as_ref()?;
            Some(index.health().await.unwrap_or_else(|e| IndexHealth {
                healthy: false,
                detail: e.to_string(),
            }))
        }
        HealthReport {
            narrative_index: check(&self.narrative_index).await,
            technique_index: check(&self.technique_index).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryIndex, ScriptedGenerator};

    #[tokio::test]
    async fn test_health_reports_failures_without_erroring() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let narrative = Arc::new(MemoryIndex::new());
        narrative.fail_next("connection refused");
        let engine = NovelEngine::new(store, Arc::new(ScriptedGenerator::new()), EngineConfig::new())
            .with_indexes(Some(narrative as Arc<dyn RetrievalIndex>), None);

        let report = engine.health().await;
        let narrative = report.narrative_index.unwrap();
        assert!(!narrative.healthy);
        assert!(narrative.detail.contains("connection refused"));
        assert!(report.technique_index.is_none());
    }
}
