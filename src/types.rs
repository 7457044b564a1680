//! Memory, conversation and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for memories
pub type MemoryId = String;

/// Identifier supplied by the external auth layer
pub type UserId = String;

/// Unique identifier for conversations
pub type ConversationId = String;

/// A durable, embedded, decaying fact about a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Owner
    pub user_id: UserId,
    /// The fact itself
    pub content: String,
    /// Embedding of `content`, fixed dimension per deployment
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Where the fact came from
    pub source: MemorySource,
    /// Importance score (0.0 - 1.0)
    pub importance: f32,
    /// Number of times returned by retrieval
    pub retrieval_count: i64,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the fact was last stated (insert or merge)
    pub updated_at: DateTime<Utc>,
    /// When retrieval last returned this memory
    pub last_retrieved_at: Option<DateTime<Utc>>,
    /// Conversation the fact was extracted from
    pub conversation_id: Option<ConversationId>,
    /// Loosely related memories
    pub related_memory_ids: Vec<MemoryId>,
    /// Auxiliary keyword index
    pub keywords: Vec<String>,
    /// Additional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Memory {
    /// Create a new memory with the source's default importance
    pub fn new(
        user_id: impl Into<UserId>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        source: MemorySource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            embedding,
            source,
            importance: source.default_importance(),
            retrieval_count: 0,
            created_at: now,
            updated_at: now,
            last_retrieved_at: None,
            conversation_id: None,
            related_memory_ids: Vec::new(),
            keywords: Vec::new(),
            metadata: None,
        }
    }

    /// Set custom importance
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Set the conversation
    pub fn with_conversation(mut self, conversation_id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Days since the fact was last stated
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.updated_at).num_seconds().max(0) as f64;
        secs / 86_400.0
    }
}

/// Origin of a memory; drives merge threshold and default importance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Extracted from a chat turn
    Conversation,
    /// Derived from web search results
    WebSearch,
    /// Derived from an Instagram profile analysis
    InstagramAnalysis,
    /// Derived from hashtag research
    HashtagSearch,
    /// Derived from a blog analysis
    BlogAnalysis,
    /// Written by an operator
    Manual,
}

impl MemorySource {
    pub const ALL: &[MemorySource] = &[
        MemorySource::Conversation,
        MemorySource::WebSearch,
        MemorySource::InstagramAnalysis,
        MemorySource::HashtagSearch,
        MemorySource::BlogAnalysis,
        MemorySource::Manual,
    ];

    /// Similarity at or above which a new fact merges into an existing one
    pub fn default_similarity_threshold(&self) -> f32 {
        match self {
            MemorySource::Conversation => 0.80,
            MemorySource::WebSearch => 0.82,
            MemorySource::InstagramAnalysis
            | MemorySource::HashtagSearch
            | MemorySource::BlogAnalysis
            | MemorySource::Manual => 0.85,
        }
    }

    pub fn default_importance(&self) -> f32 {
        match self {
            MemorySource::Manual => 0.8,
            MemorySource::InstagramAnalysis => 0.7,
            MemorySource::Conversation => 0.6,
            MemorySource::BlogAnalysis => 0.6,
            MemorySource::HashtagSearch => 0.5,
            MemorySource::WebSearch => 0.4,
        }
    }
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySource::Conversation => write!(f, "conversation"),
            MemorySource::WebSearch => write!(f, "web_search"),
            MemorySource::InstagramAnalysis => write!(f, "instagram_analysis"),
            MemorySource::HashtagSearch => write!(f, "hashtag_search"),
            MemorySource::BlogAnalysis => write!(f, "blog_analysis"),
            MemorySource::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = crate::error::MuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemorySource::ALL
            .iter()
            .copied()
            .find(|src| src.to_string() == s)
            .ok_or_else(|| crate::error::MuseError::Validation(format!("unknown memory source: {s}")))
    }
}

/// A retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySearchResult {
    /// The memory
    pub memory: Memory,
    /// Cosine similarity to the query
    pub similarity: f32,
    /// Rank in results (1-based)
    pub rank: usize,
}

/// Result of a merge-on-write
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(MemoryId),
    /// An existing memory was rewritten in place
    Merged { id: MemoryId, similarity: f32 },
}

impl UpsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            UpsertOutcome::Inserted(id) => id,
            UpsertOutcome::Merged { id, .. } => id,
        }
    }
}

/// Chat role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl Role {
    pub(crate) fn parse(s: &str) -> Role {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// One role/content pair sent to the generative model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: Role,
    pub content: String,
    pub citations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        user_id: impl Into<UserId>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            citations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.citations = citations;
        self
    }

    pub fn as_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A conversation owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_roundtrips_through_display() {
        for src in MemorySource::ALL {
            let parsed: MemorySource = src.to_string().parse().unwrap();
            assert_eq!(parsed, *src);
        }
        assert!("telepathy".parse::<MemorySource>().is_err());
    }

    #[test]
    fn test_profile_analysis_merges_more_strictly_than_conversation() {
        assert!(
            MemorySource::InstagramAnalysis.default_similarity_threshold()
                > MemorySource::Conversation.default_similarity_threshold()
        );
    }

    #[test]
    fn test_age_days_uses_last_statement() {
        let mut memory = Memory::new("u1", "likes reels", vec![1.0], MemorySource::Conversation);
        let now = Utc::now();
        memory.updated_at = now - chrono::Duration::days(3);
        assert!((memory.age_days(now) - 3.0).abs() < 1e-6);
    }
}
