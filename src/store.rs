//! Profile, conversation and memory storage using SQLite

use crate::error::{MuseError, Result};
use crate::locks::UserLocks;
use crate::profile::{Profile, ProfileExtension};
use crate::types::{Conversation, Memory, MemoryId, MemorySource, Role, StoredMessage};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;

/// Persistent store; every query is scoped by `user_id`
#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("pool", &"<SqlitePool>")
            .finish()
    }
}

impl MemoryStore {
    /// Wrap an existing pool. Migrations are the caller's concern.
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    /// Open (or create) a database file and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(path = %path.display(), "opened store");
        Ok(Arc::new(Self { pool }))
    }

    /// Create an in-memory store for testing
    pub async fn connect_in_memory() -> Result<Arc<Self>> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = sqlx::pool::PoolOptions::<sqlx::Sqlite>::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Arc::new(Self { pool }))
    }

    /// Get a reference to the SQLite pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ─── Profiles ─────────────────────────────────────────────────────────────

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, first_name, last_name, niches, platforms, instagram_handle,
                   extension, completeness_score, created_at, updated_at
            FROM profiles
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row_to_profile(&row)))
    }

    /// Load a profile, or an empty one for a user seen for the first time
    pub async fn load_profile(&self, user_id: &str) -> Result<Profile> {
        Ok(self
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| Profile::new(user_id)))
    }

    /// Insert or replace a profile. Completeness is recomputed on every write.
    pub async fn save_profile(&self, profile: &Profile) -> Result<()> {
        let niches = serde_json::to_string(&profile.niches)?;
        let platforms = serde_json::to_string(&profile.platforms)?;
        let extension = serde_json::to_string(&profile.extension)?;
        let completeness = i64::from(profile.compute_completeness());

        sqlx::query(
            r#"
            INSERT INTO profiles (
                user_id, first_name, last_name, niches, platforms, instagram_handle,
                extension, completeness_score, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                niches = excluded.niches,
                platforms = excluded.platforms,
                instagram_handle = excluded.instagram_handle,
                extension = excluded.extension,
                completeness_score = excluded.completeness_score,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id)
        .bind(profile.first_name.as_ref())
        .bind(profile.last_name.as_ref())
        .bind(niches)
        .bind(platforms)
        .bind(profile.instagram_handle.as_ref())
        .bind(extension)
        .bind(completeness)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read-merge-write a profile under the user's profile lock
    pub async fn update_profile<F, T>(&self, locks: &UserLocks, user_id: &str, f: F) -> Result<(Profile, T)>
    where
        F: FnOnce(&mut Profile) -> T,
    {
        let _guard = locks.profile(user_id).await;
        let mut profile = self.load_profile(user_id).await?;
        let out = f(&mut profile);
        profile.refresh_completeness();
        self.save_profile(&profile).await?;
        Ok((profile, out))
    }

    // ─── Conversations & messages ─────────────────────────────────────────────

    pub async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(conversation.title.as_ref())
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_conversation(&self, user_id: &str, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    /// Load the conversation, creating it under `id` when it does not exist yet.
    /// An id owned by another user is rejected.
    pub async fn ensure_conversation(&self, user_id: &str, id: &str) -> Result<Conversation> {
        if let Some(existing) = self.load_conversation(user_id, id).await? {
            return Ok(existing);
        }
        let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if owner.is_some() {
            return Err(MuseError::NotFound(format!("conversation {id}")));
        }
        let mut conversation = Conversation::new(user_id);
        conversation.id = id.to_string();
        self.create_conversation(&conversation).await?;
        Ok(conversation)
    }

    pub async fn list_conversations(&self, user_id: &str, limit: i64) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE user_id = ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_conversation).collect())
    }

    pub async fn set_title(&self, user_id: &str, conversation_id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(title)
        .bind(Utc::now())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn append_message(&self, message: &StoredMessage) -> Result<()> {
        let citations = serde_json::to_string(&message.citations)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, user_id, role, content, citations, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.user_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(citations)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(message.created_at)
            .bind(&message.conversation_id)
            .bind(&message.user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Last `limit` messages of a conversation, oldest first
    pub async fn recent_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, user_id, role, content, citations, created_at
            FROM messages
            WHERE conversation_id = ? AND user_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows.iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    pub async fn count_messages(&self, user_id: &str, conversation_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // ─── Memories ─────────────────────────────────────────────────────────────

    pub async fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let embedding = encode_embedding(&memory.embedding)?;
        let related = serde_json::to_string(&memory.related_memory_ids)?;
        let keywords = serde_json::to_string(&memory.keywords)?;
        let metadata_json = memory
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());

        sqlx::query(
            r#"
            INSERT INTO memories (
                id, user_id, content, embedding, source, importance, retrieval_count,
                created_at, updated_at, last_retrieved_at, conversation_id,
                related_memory_ids, keywords, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.user_id)
        .bind(&memory.content)
        .bind(embedding)
        .bind(memory.source.to_string())
        .bind(memory.importance)
        .bind(memory.retrieval_count)
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .bind(memory.last_retrieved_at)
        .bind(memory.conversation_id.as_ref())
        .bind(related)
        .bind(keywords)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rewrite a memory in place; the row must belong to `memory.user_id`
    pub async fn update_memory(&self, memory: &Memory) -> Result<()> {
        let embedding = encode_embedding(&memory.embedding)?;
        let related = serde_json::to_string(&memory.related_memory_ids)?;
        let keywords = serde_json::to_string(&memory.keywords)?;
        let metadata_json = memory
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());

        let result = sqlx::query(
            r#"
            UPDATE memories
            SET content = ?, embedding = ?, source = ?, importance = ?, retrieval_count = ?,
                updated_at = ?, last_retrieved_at = ?, conversation_id = ?,
                related_memory_ids = ?, keywords = ?, metadata = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&memory.content)
        .bind(embedding)
        .bind(memory.source.to_string())
        .bind(memory.importance)
        .bind(memory.retrieval_count)
        .bind(memory.updated_at)
        .bind(memory.last_retrieved_at)
        .bind(memory.conversation_id.as_ref())
        .bind(related)
        .bind(keywords)
        .bind(metadata_json)
        .bind(&memory.id)
        .bind(&memory.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MuseError::NotFound(format!("memory {}", memory.id)));
        }
        Ok(())
    }

    pub async fn get_memory(&self, user_id: &str, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query(&format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ? AND user_id = ?"))
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row_to_memory(&row)))
    }

    /// All memories of a user, most recently stated first
    pub async fn memories_for_user(&self, user_id: &str) -> Result<Vec<Memory>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_memory).collect())
    }

    pub async fn count_memories(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Bump retrieval statistics for rows returned by a search
    pub async fn record_retrieval(&self, user_id: &str, ids: &[MemoryId], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(
                r#"
                UPDATE memories
                SET retrieval_count = retrieval_count + 1, last_retrieved_at = ?
                WHERE id = ? AND user_id = ?
                "#,
            )
            .bind(at)
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete a memory permanently
    pub async fn delete_memory(&self, user_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

const MEMORY_COLUMNS: &str = "id, user_id, content, embedding, source, importance, retrieval_count, \
     created_at, updated_at, last_retrieved_at, conversation_id, related_memory_ids, keywords, metadata";

fn encode_embedding(embedding: &[f32]) -> Result<Vec<u8>> {
    bincode::serialize(embedding).map_err(|e| MuseError::Serialization(e.to_string()))
}

fn json_list(row: &SqliteRow, column: &str) -> Vec<String> {
    row.try_get::<String, _>(column)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Helper: Convert database row to Memory
fn row_to_memory(row: &SqliteRow) -> Memory {
    let blob: Vec<u8> = row.try_get("embedding").unwrap_or_default();
    let embedding: Vec<f32> = bincode::deserialize(&blob).unwrap_or_default();

    let source_str: String = row.try_get("source").unwrap_or_default();
    let source = source_str.parse().unwrap_or(MemorySource::Conversation);

    let metadata_json: Option<String> = row.try_get("metadata").ok().flatten();
    let metadata = metadata_json.and_then(|s| serde_json::from_str(&s).ok());

    Memory {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        content: row.try_get("content").unwrap_or_default(),
        embedding,
        source,
        importance: row.try_get("importance").unwrap_or(0.5),
        retrieval_count: row.try_get("retrieval_count").unwrap_or(0),
        created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
        updated_at: row.try_get("updated_at").unwrap_or_else(|_| Utc::now()),
        last_retrieved_at: row.try_get("last_retrieved_at").ok().flatten(),
        conversation_id: row.try_get("conversation_id").ok().flatten(),
        related_memory_ids: json_list(row, "related_memory_ids"),
        keywords: json_list(row, "keywords"),
        metadata,
    }
}

fn row_to_profile(row: &SqliteRow) -> Profile {
    let extension: ProfileExtension = row
        .try_get::<String, _>("extension")
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let score: i64 = row.try_get("completeness_score").unwrap_or(0);

    Profile {
        user_id: row.try_get("user_id").unwrap_or_default(),
        first_name: row.try_get("first_name").ok().flatten(),
        last_name: row.try_get("last_name").ok().flatten(),
        niches: json_list(row, "niches"),
        platforms: json_list(row, "platforms"),
        instagram_handle: row.try_get("instagram_handle").ok().flatten(),
        extension,
        completeness_score: score.clamp(0, 100) as u8,
        created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
        updated_at: row.try_get("updated_at").unwrap_or_else(|_| Utc::now()),
    }
}

fn row_to_conversation(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        title: row.try_get("title").ok().flatten(),
        created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
        updated_at: row.try_get("updated_at").unwrap_or_else(|_| Utc::now()),
    }
}

fn row_to_message(row: &SqliteRow) -> StoredMessage {
    let role: String = row.try_get("role").unwrap_or_default();
    StoredMessage {
        id: row.try_get("id").unwrap_or_default(),
        conversation_id: row.try_get("conversation_id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        role: Role::parse(&role),
        content: row.try_get("content").unwrap_or_default(),
        citations: json_list(row, "citations"),
        created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfilePatch;

    #[tokio::test]
    async fn test_missing_profile_loads_empty() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let profile = store.load_profile("new-user").await.unwrap();
        assert_eq!(profile.user_id, "new-user");
        assert_eq!(profile.completeness_score, 0);
        assert!(store.get_profile("new-user").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_roundtrip_recomputes_completeness() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let mut profile = Profile::new("u1");
        profile.apply_patch(&ProfilePatch {
            first_name: Some("Ada".into()),
            niches: vec!["Fitness".into()],
            ..Default::default()
        });
        // stale score on the struct must not leak into the row
        profile.completeness_score = 0;
        store.save_profile(&profile).await.unwrap();

        let loaded = store.load_profile("u1").await.unwrap();
        assert_eq!(loaded.first_name.as_deref(), Some("Ada"));
        assert_eq!(loaded.niches, vec!["Fitness".to_string()]);
        assert_eq!(loaded.completeness_score, 35);

        let mut again = loaded.clone();
        again.platforms.push("tiktok".into());
        store.save_profile(&again).await.unwrap();
        assert_eq!(store.load_profile("u1").await.unwrap().completeness_score, 50);
    }

    #[tokio::test]
    async fn test_concurrent_profile_updates_are_not_lost() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let locks = std::sync::Arc::new(UserLocks::new());
        let mut tasks = Vec::new();
        for niche in ["baking", "travel", "fitness", "gaming"] {
            let store = std::sync::Arc::clone(&store);
            let locks = std::sync::Arc::clone(&locks);
            tasks.push(tokio::spawn(async move {
                store
                    .update_profile(&locks, "u1", |p| p.niches.push(niche.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let profile = store.load_profile("u1").await.unwrap();
        assert_eq!(profile.niches.len(), 4);
        assert_eq!(profile.completeness_score, 20);
    }

    #[tokio::test]
    async fn test_message_window_is_chronological_and_scoped() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let conv = store.ensure_conversation("u1", "c1").await.unwrap();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let mut msg = StoredMessage::new(&conv.id, "u1", role, format!("m{i}"));
            msg.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            store.append_message(&msg).await.unwrap();
        }

        let window = store.recent_messages("u1", "c1", 3).await.unwrap();
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert_eq!(store.count_messages("u1", "c1").await.unwrap(), 5);

        assert!(store.recent_messages("u2", "c1", 3).await.unwrap().is_empty());
        assert!(store.ensure_conversation("u2", "c1").await.is_err());
    }

    #[tokio::test]
    async fn test_set_title() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        store.ensure_conversation("u1", "c1").await.unwrap();
        assert!(store.set_title("u1", "c1", "Reel ideas").await.unwrap());
        assert!(!store.set_title("u2", "c1", "hijack").await.unwrap());
        let conv = store.load_conversation("u1", "c1").await.unwrap().unwrap();
        assert_eq!(conv.title.as_deref(), Some("Reel ideas"));
    }

    #[tokio::test]
    async fn test_memory_roundtrip_keeps_embedding() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let mut memory = Memory::new("u1", "Posts reels on Tuesdays", vec![0.6, 0.8], MemorySource::Conversation)
            .with_metadata(serde_json::json!({"turn": 3}));
        memory.keywords = vec!["reels".into(), "tuesdays".into()];
        store.insert_memory(&memory).await.unwrap();

        let loaded = store.get_memory("u1", &memory.id).await.unwrap().unwrap();
        assert_eq!(loaded.embedding, vec![0.6, 0.8]);
        assert_eq!(loaded.source, MemorySource::Conversation);
        assert_eq!(loaded.keywords, memory.keywords);
        assert_eq!(loaded.metadata, memory.metadata);
        assert!(store.get_memory("u2", &memory.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_retrieval_and_delete() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let memory = Memory::new("u1", "fact", vec![1.0], MemorySource::Manual);
        store.insert_memory(&memory).await.unwrap();

        store.record_retrieval("u1", &[memory.id.clone()], Utc::now()).await.unwrap();
        store.record_retrieval("u1", &[memory.id.clone()], Utc::now()).await.unwrap();
        let loaded = store.get_memory("u1", &memory.id).await.unwrap().unwrap();
        assert_eq!(loaded.retrieval_count, 2);
        assert!(loaded.last_retrieved_at.is_some());

        assert!(!store.delete_memory("u2", &memory.id).await.unwrap());
        assert!(store.delete_memory("u1", &memory.id).await.unwrap());
        assert_eq!(store.count_memories("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_of_missing_memory_is_not_found() {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let memory = Memory::new("u1", "ghost", vec![1.0], MemorySource::Manual);
        assert!(matches!(store.update_memory(&memory).await, Err(MuseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("muse.db");
        {
            let store = MemoryStore::open(&path).await.unwrap();
            let mut p = Profile::new("u1");
            p.first_name = Some("Ada".into());
            store.save_profile(&p).await.unwrap();
        }
        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_profile("u1").await.unwrap().first_name.as_deref(), Some("Ada"));
    }
}
