//! # Muse - turn orchestration and memory for a creator chat assistant

pub mod cache;
pub mod config;
pub mod cortex;
pub mod decision;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod intent;
pub mod locks;
pub mod maintenance;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod profile;
pub mod prompt;
pub mod providers;
pub mod router;
pub mod store;
pub mod types;
pub mod vector_search;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    ActionCacheConfig, ActionCacheStats, ActionCaches, CacheConfig, CacheConfigBuilder, CacheKey, CacheStats,
    CachedValue, TtlLruCache,
};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use cortex::{extract_keywords, identify_stale, score, MemoryConfig, MemoryCortex};
pub use decision::{
    ActionDecision, BlogAnalysisDecision, Classification, DecisionBundle, FallbackReason, HashtagSearchDecision,
    InstagramAnalysisDecision, ProfileUpdateDecision, WebSearchDecision, WorkflowPhaseDecision,
};
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider};
pub use error::{MuseError, Result};
pub use extraction::Extractor;
pub use intent::{IntentAnalyzer, IntentConfig};
pub use locks::{LockScope, UserLocks};
pub use maintenance::{MaintenanceConfig, MaintenanceConfigBuilder, MaintenanceReport, StaleMemory};
pub use model::{CompletionOptions, TextModel, TokenStream};
pub use openai::{OpenAiCompatModel, OpenAiConfig, OpenAiEmbeddings, OpenAiSearch};
pub use pipeline::{TurnEvent, TurnHandle, TurnPipeline, TurnSummary};
pub use profile::{InstagramOwnership, Profile, ProfileExtension, ProfileField, ProfilePatch};
pub use prompt::{PromptAssembler, PromptInputs};
pub use providers::{
    BlogAnalysis, BlogAnalysisProvider, HashtagProvider, HashtagResearch, InstagramProfileAnalysis,
    ProfileAnalysisProvider, Recency, RetryConfig, SearchProvider, SearchRequest, SearchResult,
};
pub use router::{ActionProviders, ActionResults, ExternalActionRouter};
pub use store::MemoryStore;
pub use types::{
    ChatMessage, Conversation, ConversationId, Memory, MemoryId, MemorySearchResult, MemorySource, Role,
    StoredMessage, UpsertOutcome, UserId,
};
pub use workflow::{PhaseId, WorkflowPhase, WORKFLOW_PHASES};

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Where a user stands in the guided workflow
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub user_id: UserId,
    pub completeness: u8,
    pub phase: PhaseId,
    pub phase_number: u8,
    pub missing_fields: Vec<ProfileField>,
    pub can_generate_content: bool,
    pub can_generate_ideas: bool,
}

impl PhaseReport {
    pub fn for_profile(profile: &Profile) -> Self {
        let phase = workflow::phase_for_profile(profile);
        Self {
            user_id: profile.user_id.clone(),
            completeness: profile.compute_completeness(),
            phase: phase.id,
            phase_number: phase.number,
            missing_fields: workflow::missing_fields_for_phase(phase, profile),
            can_generate_content: phase.can_generate_content,
            can_generate_ideas: phase.can_generate_ideas,
        }
    }
}

/// The engine behind one deployment: a store on disk plus a turn pipeline
#[derive(Clone)]
pub struct Muse {
    pipeline: Arc<TurnPipeline>,
    data_dir: std::path::PathBuf,
}

impl std::fmt::Debug for Muse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muse").field("data_dir", &self.data_dir).finish()
    }
}

impl Muse {
    /// Open (or create) `data_dir/muse.db` and wire up the pipeline
    pub async fn open(
        data_dir: impl AsRef<Path>,
        model: Arc<dyn TextModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        providers: ActionProviders,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() == 0 {
            return Err(MuseError::Configuration(format!(
                "embedding provider {} has dimension 0",
                embedder.name()
            )));
        }
        let disabled = providers.disabled();
        if !disabled.is_empty() {
            tracing::warn!(actions = ?disabled, "no provider configured; these actions will be skipped");
        }
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let store = MemoryStore::open(data_dir.join("muse.db")).await?;
        Ok(Self::from_store(store, model, embedder, providers, config, data_dir))
    }

    /// Build on an existing store, e.g. an in-memory one
    pub fn from_store(
        store: Arc<MemoryStore>,
        model: Arc<dyn TextModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        providers: ActionProviders,
        config: EngineConfig,
        data_dir: std::path::PathBuf,
    ) -> Self {
        let pipeline = TurnPipeline::new(store, model, embedder, providers, config);
        Self {
            pipeline: Arc::new(pipeline),
            data_dir,
        }
    }

    /// Run one user turn
    pub async fn turn(&self, user_id: &str, conversation_id: &str, message: &str) -> Result<TurnHandle> {
        self.pipeline.run_turn(user_id, conversation_id, message).await
    }

    pub async fn phase(&self, user_id: &str) -> Result<PhaseReport> {
        let profile = self.pipeline.store().load_profile(user_id).await?;
        Ok(PhaseReport::for_profile(&profile))
    }

    pub async fn profile(&self, user_id: &str) -> Result<Profile> {
        self.pipeline.store().load_profile(user_id).await
    }

    /// Every memory of a user, most recently stated first
    pub async fn memories(&self, user_id: &str) -> Result<Vec<Memory>> {
        self.pipeline.cortex().memories(user_id).await
    }

    /// Report stale memories without deleting anything
    pub async fn stale(&self, user_id: &str) -> Result<MaintenanceReport> {
        let config = self.pipeline.config().maintenance.clone();
        self.pipeline.cortex().prune_stale(user_id, &config, true).await
    }

    /// Admin-only hard delete of stale memories
    pub async fn prune(&self, user_id: &str, config: &MaintenanceConfig, dry_run: bool) -> Result<MaintenanceReport> {
        self.pipeline.cortex().prune_stale(user_id, config, dry_run).await
    }

    pub async fn cache_stats(&self) -> ActionCacheStats {
        self.pipeline.caches().stats().await
    }

    pub fn pipeline(&self) -> &Arc<TurnPipeline> {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.pipeline.store()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[tokio::test]
    async fn test_open_creates_database_and_reports_phase() {
        let dir = tempfile::tempdir().unwrap();
        let muse = Muse::open(
            dir.path().join("data"),
            Arc::new(ScriptedModel::new()),
            Arc::new(HashEmbeddingProvider::new(32)),
            ActionProviders::default(),
            EngineConfig::default(),
        )
        .await
        .unwrap();
        assert!(dir.path().join("data").join("muse.db").exists());

        let report = muse.phase("new-user").await.unwrap();
        assert_eq!(report.phase, PhaseId::Discovery);
        assert_eq!(report.completeness, 0);
        assert!(!report.can_generate_content);
        for field in [ProfileField::Name, ProfileField::Niche, ProfileField::Platform] {
            assert!(report.missing_fields.contains(&field));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfigBuilder::new().search_confidence_gate(2.0).build();
        let result = Muse::open(
            dir.path(),
            Arc::new(ScriptedModel::new()),
            Arc::new(HashEmbeddingProvider::new(32)),
            ActionProviders::default(),
            config,
        )
        .await;
        assert!(matches!(result, Err(MuseError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_zero_dimension_embedder_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let result = Muse::open(
            dir.path(),
            Arc::new(ScriptedModel::new()),
            Arc::new(HashEmbeddingProvider::new(0)),
            ActionProviders::default(),
            EngineConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(MuseError::Configuration(_))));
    }
}
