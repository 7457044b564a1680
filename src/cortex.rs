//! # Memory Cortex
//!
//! Semantic long-term memory per user:
//! - Merge-on-write: a new fact close enough to an existing one rewrites it
//! - Retrieval: nearest neighbours by raw cosine similarity
//! - Decay scoring: exponential half-life, used to find stale memories
//! - Keyword index: frequency-ranked, stop-word filtered

use crate::embedding::EmbeddingProvider;
use crate::error::{MuseError, Result};
use crate::locks::UserLocks;
use crate::maintenance::{self, MaintenanceConfig, MaintenanceReport};
use crate::store::MemoryStore;
use crate::types::{Memory, MemorySearchResult, MemorySource, UpsertOutcome};
use crate::vector_search::{closest, cosine_similarity, top_k};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Days for a memory's decayed score to halve
    pub half_life_days: f64,
    /// Memories injected into each generation prompt
    pub retrieval_k: usize,
    /// Retrieval hits below this similarity are discarded
    pub min_similarity: f32,
    /// Per-source merge thresholds, overriding the built-in defaults
    pub similarity_overrides: HashMap<MemorySource, f32>,
    /// Similarity at which a newly inserted memory links to an existing one
    pub related_similarity: f32,
    pub keyword_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            retrieval_k: 5,
            min_similarity: 0.0,
            similarity_overrides: HashMap::new(),
            related_similarity: 0.6,
            keyword_limit: 10,
        }
    }
}

impl MemoryConfig {
    pub fn threshold_for(&self, source: MemorySource) -> f32 {
        self.similarity_overrides
            .get(&source)
            .copied()
            .unwrap_or_else(|| source.default_similarity_threshold())
    }
}

// ─── Scoring ──────────────────────────────────────────────────────────────────

const MAX_RETRIEVAL_BOOST: i64 = 10;

/// Decayed relevance of a memory.
///
/// `importance × 2^(−age/half_life) × (1 + 0.1 × min(retrievals, 10)) × similarity`,
/// with age measured from the last time the fact was stated.
pub fn score(memory: &Memory, now: DateTime<Utc>, half_life_days: f64, similarity: f32) -> f64 {
    let age = memory.age_days(now);
    let decay = (-std::f64::consts::LN_2 * age / half_life_days.max(f64::EPSILON)).exp();
    let boost = 1.0 + 0.1 * memory.retrieval_count.clamp(0, MAX_RETRIEVAL_BOOST) as f64;
    f64::from(memory.importance) * decay * boost * f64::from(similarity)
}

/// Oldest-first memories older than `min_days_old` whose decayed score
/// (similarity 1) is below `max_score`.
pub fn identify_stale(
    memories: &[Memory],
    now: DateTime<Utc>,
    half_life_days: f64,
    min_days_old: f64,
    max_score: f64,
    limit: usize,
) -> Vec<Memory> {
    let mut stale: Vec<Memory> = memories
        .iter()
        .filter(|m| m.age_days(now) >= min_days_old)
        .filter(|m| score(m, now, half_life_days, 1.0) < max_score)
        .cloned()
        .collect();
    stale.sort_by_key(|m| m.updated_at);
    stale.truncate(limit);
    stale
}

// ─── Keywords ─────────────────────────────────────────────────────────────────

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new", "now", "see", "who",
    "did", "get", "got", "let", "she", "too", "use", "that", "this", "with", "from", "they", "them",
    "then", "than", "there", "their", "what", "when", "where", "which", "while", "will", "would",
    "could", "should", "been", "being", "were", "into", "about", "just", "like", "also", "some",
    "more", "most", "very", "much", "many", "only", "over", "such", "each", "other", "because",
    "these", "those", "here", "does", "doing", "done", "want", "wants", "really", "mine", "myself",
];

/// Frequency-ranked keywords; ties keep first-occurrence order.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .enumerate()
    {
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> =
        counts.into_iter().map(|(t, (count, first))| (t, count, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(t, _, _)| t).collect()
}

// ─── Memory Cortex ────────────────────────────────────────────────────────────

pub struct MemoryCortex {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    locks: Arc<UserLocks>,
    config: MemoryConfig,
}

impl MemoryCortex {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        locks: Arc<UserLocks>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            locks,
            config,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Merge-on-write.
    ///
    /// The candidate is compared with every memory of its user. If the closest
    /// one reaches `similarity_threshold` it is rewritten in place (content,
    /// embedding, metadata, keywords, `updated_at`, importance raised to the
    /// max of both); otherwise the candidate is inserted.
    pub async fn upsert(&self, candidate: Memory, similarity_threshold: f32) -> Result<UpsertOutcome> {
        if candidate.content.trim().is_empty() {
            return Err(MuseError::Validation("memory content is empty".into()));
        }
        if candidate.embedding.len() != self.embedder.dimension() {
            return Err(MuseError::EmbeddingFailed(format!(
                "dimension mismatch: got {}, expected {}",
                candidate.embedding.len(),
                self.embedder.dimension()
            )));
        }

        let _guard = self.locks.memory(&candidate.user_id).await;
        let existing = self.store.memories_for_user(&candidate.user_id).await?;
        let nearest = closest(&candidate.embedding, existing.iter().map(|m| m.embedding.as_slice()));

        let now = Utc::now();
        let keywords = extract_keywords(&candidate.content, self.config.keyword_limit);

        if let Some((index, similarity)) = nearest.filter(|(_, s)| *s >= similarity_threshold) {
            let mut memory = existing[index].clone();
            memory.content = candidate.content;
            memory.embedding = candidate.embedding;
            if candidate.metadata.is_some() {
                memory.metadata = candidate.metadata;
            }
            if candidate.conversation_id.is_some() {
                memory.conversation_id = candidate.conversation_id;
            }
            memory.importance = memory.importance.max(candidate.importance);
            memory.keywords = keywords;
            memory.updated_at = now;
            self.store.update_memory(&memory).await?;

            info!(user = %memory.user_id, id = %memory.id, similarity, "merged memory");
            return Ok(UpsertOutcome::Merged { id: memory.id, similarity });
        }

        let mut memory = candidate;
        memory.keywords = keywords;
        memory.created_at = now;
        memory.updated_at = now;
        memory.related_memory_ids = top_k(
            &memory.embedding,
            existing.iter().map(|m| m.embedding.as_slice()),
            3,
            self.config.related_similarity,
        )
        .into_iter()
        .map(|(i, _)| existing[i].id.clone())
        .collect();
        self.store.insert_memory(&memory).await?;

        info!(user = %memory.user_id, id = %memory.id, source = %memory.source, "stored memory");
        Ok(UpsertOutcome::Inserted(memory.id))
    }

    /// Embed a fact and upsert it with its source's threshold.
    ///
    /// An embedding failure skips the write and yields `Ok(None)`.
    pub async fn remember(
        &self,
        user_id: &str,
        content: &str,
        source: MemorySource,
        conversation_id: Option<&str>,
    ) -> Result<Option<UpsertOutcome>> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let embedding = match self.embedder.embed_one(content).await {
            Ok(e) => e,
            Err(e) => {
                warn!(user = %user_id, %source, "skipping memory write: {e}");
                return Ok(None);
            }
        };

        let mut candidate = Memory::new(user_id, content, embedding, source);
        if let Some(conversation_id) = conversation_id {
            candidate = candidate.with_conversation(conversation_id);
        }
        let threshold = self.config.threshold_for(source);
        self.upsert(candidate, threshold).await.map(Some)
    }

    /// Remember several facts; individual failures are logged and skipped.
    pub async fn remember_all(
        &self,
        user_id: &str,
        facts: &[String],
        source: MemorySource,
        conversation_id: Option<&str>,
    ) -> Vec<UpsertOutcome> {
        let mut outcomes = Vec::new();
        for fact in facts {
            match self.remember(user_id, fact, source, conversation_id).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => warn!(user = %user_id, %source, "memory write failed: {e}"),
            }
        }
        outcomes
    }

    /// Top-k memories by raw cosine similarity, most recently stated first on ties.
    ///
    /// Returned rows get their retrieval statistics bumped.
    pub async fn retrieve(&self, user_id: &str, query_embedding: &[f32], k: usize) -> Result<Vec<MemorySearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let memories = self.store.memories_for_user(user_id).await?;
        let hits = top_k(
            query_embedding,
            memories.iter().map(|m| m.embedding.as_slice()),
            k,
            self.config.min_similarity,
        );
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let ids: Vec<String> = hits.iter().map(|(i, _)| memories[*i].id.clone()).collect();
        self.store.record_retrieval(user_id, &ids, now).await?;

        let results = hits
            .into_iter()
            .enumerate()
            .map(|(rank, (i, similarity))| {
                let mut memory = memories[i].clone();
                memory.retrieval_count += 1;
                memory.last_retrieved_at = Some(now);
                MemorySearchResult {
                    memory,
                    similarity,
                    rank: rank + 1,
                }
            })
            .collect::<Vec<_>>();
        debug!(user = %user_id, hits = results.len(), "retrieved memories");
        Ok(results)
    }

    /// Embed `query` and retrieve against it
    pub async fn recall(&self, user_id: &str, query: &str, k: usize) -> Result<Vec<MemorySearchResult>> {
        let embedding = self.embedder.embed_one(query).await?;
        self.retrieve(user_id, &embedding, k).await
    }

    /// Every memory of a user, most recently stated first
    pub async fn memories(&self, user_id: &str) -> Result<Vec<Memory>> {
        self.store.memories_for_user(user_id).await
    }

    /// Stale memories of a user, oldest first
    pub async fn stale(&self, user_id: &str, config: &MaintenanceConfig) -> Result<Vec<Memory>> {
        let memories = self.store.memories_for_user(user_id).await?;
        Ok(identify_stale(
            &memories,
            Utc::now(),
            self.config.half_life_days,
            config.min_days_old,
            config.max_score,
            config.limit,
        ))
    }

    /// Admin-only hard deletion of stale memories
    pub async fn prune_stale(
        &self,
        user_id: &str,
        config: &MaintenanceConfig,
        dry_run: bool,
    ) -> Result<MaintenanceReport> {
        maintenance::prune_stale(self, user_id, config, dry_run).await
    }

    pub(crate) async fn delete_locked(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        let _guard = self.locks.memory(user_id).await;
        let mut deleted = 0;
        for id in ids {
            if self.store.delete_memory(user_id, id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Similarity between two stored memories, for diagnostics
    pub fn similarity(a: &Memory, b: &Memory) -> f32 {
        cosine_similarity(&a.embedding, &b.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::testing::FailingEmbedder;
    use chrono::Duration;

    async fn cortex() -> MemoryCortex {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        MemoryCortex::new(
            store,
            Arc::new(HashEmbeddingProvider::new(256)),
            Arc::new(UserLocks::new()),
            MemoryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_restatement_merges_and_dissimilar_fact_inserts() {
        let cortex = cortex().await;
        let first = cortex
            .remember("u1", "my favorite platform is instagram reels", MemorySource::Conversation, None)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = cortex
            .remember("u1", "My favorite platform is Instagram Reels!", MemorySource::Conversation, None)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, UpsertOutcome::Merged { .. }));
        assert_eq!(second.id(), first.id());

        let memories = cortex.memories("u1").await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "My favorite platform is Instagram Reels!");

        cortex
            .remember("u1", "lives in Lisbon with two cats", MemorySource::Conversation, None)
            .await
            .unwrap();
        assert_eq!(cortex.memories("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_max_importance() {
        let cortex = cortex().await;
        let text = "audience is busy parents in their thirties";
        let embedding = cortex.embedder().embed_one(text).await.unwrap();
        let high = Memory::new("u1", text, embedding.clone(), MemorySource::Manual).with_importance(0.9);
        cortex.upsert(high, 0.85).await.unwrap();
        let low = Memory::new("u1", text, embedding, MemorySource::WebSearch).with_importance(0.2);
        cortex.upsert(low, 0.85).await.unwrap();

        let memories = cortex.memories("u1").await.unwrap();
        assert_eq!(memories.len(), 1);
        assert!((memories[0].importance - 0.9).abs() < 1e-6);
        assert_eq!(memories[0].source, MemorySource::Manual);
    }

    /// 256-dim vector with the given leading components
    fn vector(head: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0f32; 256];
        v[..head.len()].copy_from_slice(head);
        v
    }

    #[tokio::test]
    async fn test_similarity_exactly_at_threshold_merges() {
        // cos((1,0), (4,3)) = 4/5 and cos((1,0), (41,28,5,3,1)) = 41/50, both exact in f32
        let cases = [
            (MemorySource::Conversation, vector(&[4.0, 3.0]), vector(&[4.0, 3.0, 0.1])),
            (
                MemorySource::WebSearch,
                vector(&[41.0, 28.0, 5.0, 3.0, 1.0]),
                vector(&[41.0, 28.0, 5.0, 3.0, 1.0, 1.0]),
            ),
        ];
        for (source, at, below) in cases {
            let cortex = cortex().await;
            let threshold = cortex.config().threshold_for(source);
            assert_eq!(cosine_similarity(&vector(&[1.0]), &at), threshold);
            assert!(cosine_similarity(&vector(&[1.0]), &below) < threshold);

            for user in ["at", "below"] {
                let base = Memory::new(user, "base fact", vector(&[1.0]), source);
                cortex.upsert(base, threshold).await.unwrap();
            }

            let under = Memory::new("below", "near miss", below, source);
            let outcome = cortex.upsert(under, threshold).await.unwrap();
            assert!(matches!(outcome, UpsertOutcome::Inserted(_)), "{source} just below threshold");
            assert_eq!(cortex.memories("below").await.unwrap().len(), 2);

            let equal = Memory::new("at", "restated fact", at, source);
            let outcome = cortex.upsert(equal, threshold).await.unwrap();
            assert!(matches!(outcome, UpsertOutcome::Merged { .. }), "{source} at threshold");
            let memories = cortex.memories("at").await.unwrap();
            assert_eq!(memories.len(), 1);
            assert_eq!(memories[0].content, "restated fact");
        }
    }

    #[tokio::test]
    async fn test_memories_are_scoped_per_user() {
        let cortex = cortex().await;
        let text = "posts three times a week";
        cortex.remember("u1", text, MemorySource::Conversation, None).await.unwrap();
        let other = cortex
            .remember("u2", text, MemorySource::Conversation, None)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(other, UpsertOutcome::Inserted(_)));
        assert!(cortex.recall("u2", text, 5).await.unwrap().iter().all(|r| r.memory.user_id == "u2"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let cortex = cortex().await;
        let bad = Memory::new("u1", "short vector", vec![1.0, 0.0], MemorySource::Manual);
        assert!(matches!(cortex.upsert(bad, 0.8).await, Err(MuseError::EmbeddingFailed(_))));
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_write() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let cortex = MemoryCortex::new(
            Arc::clone(&store),
            Arc::new(FailingEmbedder::new(8)),
            Arc::new(UserLocks::new()),
            MemoryConfig::default(),
        );
        let outcome = cortex.remember("u1", "anything", MemorySource::Conversation, None).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(store.count_memories("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_similarity_and_bumps_counts() {
        let cortex = cortex().await;
        for fact in [
            "sells handmade ceramic mugs online",
            "favorite hashtag is vegan baking",
            "records podcasts about vegan baking every friday",
        ] {
            cortex.remember("u1", fact, MemorySource::Conversation, None).await.unwrap();
        }

        let results = cortex.recall("u1", "vegan baking", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert!(results[0].similarity >= results[1].similarity);
        assert!(results.iter().all(|r| r.memory.content.contains("vegan baking")));
        assert!(results.iter().all(|r| r.memory.retrieval_count == 1));

        let stored = cortex.store().get_memory("u1", &results[0].memory.id).await.unwrap().unwrap();
        assert_eq!(stored.retrieval_count, 1);
        assert!(stored.last_retrieved_at.is_some());
    }

    #[test]
    fn test_older_memory_scores_strictly_lower() {
        let now = Utc::now();
        let mut fresh = Memory::new("u1", "fact", vec![1.0], MemorySource::Conversation);
        fresh.updated_at = now - Duration::days(1);
        let mut older = fresh.clone();
        older.updated_at = now - Duration::days(2);

        assert!(score(&older, now, 30.0, 0.9) < score(&fresh, now, 30.0, 0.9));

        let mut at_half_life = fresh.clone();
        at_half_life.updated_at = now - Duration::days(30);
        let ratio = score(&at_half_life, now, 30.0, 1.0) / score(&fresh, now - Duration::days(1), 30.0, 1.0);
        assert!((ratio - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_retrieval_boost_is_capped() {
        let now = Utc::now();
        let mut m = Memory::new("u1", "fact", vec![1.0], MemorySource::Conversation).with_importance(0.5);
        m.updated_at = now;
        m.retrieval_count = 10;
        let capped = score(&m, now, 30.0, 1.0);
        m.retrieval_count = 500;
        assert!((score(&m, now, 30.0, 1.0) - capped).abs() < 1e-9);
        assert!((capped - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_identify_stale_is_oldest_first_and_limited() {
        let now = Utc::now();
        let mk = |days: i64, importance: f32| {
            let mut m = Memory::new("u1", format!("fact {days}"), vec![1.0], MemorySource::Conversation)
                .with_importance(importance);
            m.updated_at = now - Duration::days(days);
            m
        };
        let memories = vec![mk(100, 0.5), mk(400, 0.5), mk(10, 0.01), mk(200, 0.5), mk(120, 1.0)];

        let stale = identify_stale(&memories, now, 30.0, 90.0, 0.3, 2);
        let ages: Vec<i64> = stale.iter().map(|m| (now - m.updated_at).num_days()).collect();
        assert_eq!(ages, vec![400, 200]);

        let all = identify_stale(&memories, now, 30.0, 90.0, 0.3, 50);
        // the 10-day memory is too young regardless of score
        assert!(all.iter().all(|m| (now - m.updated_at).num_days() >= 90));
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_extract_keywords() {
        let kws = extract_keywords(
            "Reels reels REELS about sourdough baking and sourdough starters in 2024 for my audience",
            3,
        );
        assert_eq!(kws, vec!["reels", "sourdough", "baking"]);
        assert!(extract_keywords("a an to of 12345", 10).is_empty());
    }
}
