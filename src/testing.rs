//! Scripted collaborators shared by unit tests

use crate::embedding::EmbeddingProvider;
use crate::error::{MuseError, Result};
use crate::model::{CompletionOptions, TextModel, TokenStream};
use crate::providers::{
    BlogAnalysis, BlogAnalysisProvider, HashtagPost, HashtagProvider, HashtagResearch, InstagramProfileAnalysis,
    ProfileAnalysisProvider, SearchProvider, SearchRequest, SearchResult,
};
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Text model answering `complete` by matching a marker in the system prompt
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, std::result::Result<String, String>)>,
    tokens: Vec<String>,
    stream_error_after: Option<usize>,
    token_delay: Option<Duration>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    streams: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, marker: &str, reply: &str) -> Self {
        self.rules.push((marker.to_string(), Ok(reply.to_string())));
        self
    }

    pub fn fail(mut self, marker: &str, error: &str) -> Self {
        self.rules.push((marker.to_string(), Err(error.to_string())));
        self
    }

    pub fn tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Fail the stream after `n` tokens
    pub fn stream_error_after(mut self, n: usize) -> Self {
        self.stream_error_after = Some(n);
        self
    }

    pub fn token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<Vec<ChatMessage>> {
        self.streams.lock().unwrap().clone()
    }

    /// Completion calls whose system prompt contains `marker`
    pub fn calls_matching(&self, marker: &str) -> usize {
        self.calls()
            .iter()
            .filter(|m| m.first().is_some_and(|s| s.content.contains(marker)))
            .count()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        match self.rules.iter().find(|(marker, _)| system.contains(marker.as_str())) {
            Some((_, Ok(reply))) => Ok(reply.clone()),
            Some((_, Err(e))) => Err(MuseError::provider("model", e.clone())),
            None => Ok("{}".to_string()),
        }
    }

    async fn stream(&self, messages: &[ChatMessage], _options: &CompletionOptions) -> Result<TokenStream> {
        self.streams.lock().unwrap().push(messages.to_vec());
        let fail_at = self.stream_error_after;
        let delay = self.token_delay;
        let items: Vec<Result<String>> = self
            .tokens
            .iter()
            .enumerate()
            .map(|(i, t)| match fail_at {
                Some(n) if i >= n => Err(MuseError::transient("model", "stream reset")),
                _ => Ok(t.clone()),
            })
            .collect();
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        });
        Ok(stream.boxed())
    }
}

/// Embedder that always fails
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(MuseError::EmbeddingFailed("embedding backend unavailable".into()))
    }
}

/// Search provider counting its calls
#[derive(Default)]
pub struct FakeSearch {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeSearch {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &'static str {
        "fake-search"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MuseError::provider("search", "quota exceeded"));
        }
        Ok(SearchResult {
            text: format!(
                "Short-form video dominates {} this year. Carousel posts earn the most saves. Posting at 9am local time performs best.",
                request.query
            ),
            citations: vec!["https://example.com/report".into()],
        })
    }
}

#[derive(Default)]
pub struct FakeInstagram {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ProfileAnalysisProvider for FakeInstagram {
    async fn analyze_profile(&self, username: &str) -> Result<InstagramProfileAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(InstagramProfileAnalysis {
            username: username.to_string(),
            full_name: Some(format!("{username} official")),
            bio: Some("Plant-based recipes every day".into()),
            followers: 12_000,
            following: 300,
            posts: 420,
            engagement_rate: 3.5,
            avg_likes: 400.0,
            avg_comments: 20.0,
            related_accounts: vec![],
            analyzed_at: None,
        })
    }
}

#[derive(Default)]
pub struct FakeHashtags {
    pub calls: AtomicUsize,
}

#[async_trait]
impl HashtagProvider for FakeHashtags {
    async fn search_hashtag(&self, hashtag: &str) -> Result<HashtagResearch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HashtagResearch {
            hashtag: hashtag.to_string(),
            posts: vec![HashtagPost {
                author: "baker".into(),
                caption: format!("Weekend bake #{hashtag}"),
                likes: 900,
                comments: 40,
            }],
            researched_at: None,
        })
    }
}

#[derive(Default)]
pub struct FakeBlogs {
    pub calls: AtomicUsize,
}

#[async_trait]
impl BlogAnalysisProvider for FakeBlogs {
    async fn analyze_blog(&self, url: &str) -> Result<BlogAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BlogAnalysis {
            url: url.to_string(),
            domain: crate::decision::domain_of(url).unwrap_or_default(),
            title: Some("Later Blog".into()),
            summary: "Guides on scheduling social posts.".into(),
            topics: vec!["scheduling".into(), "instagram".into()],
            tone: Some("practical".into()),
            post_count: Some(120),
            analyzed_at: None,
        })
    }
}
