//! External action providers: search, Instagram profile analysis, hashtag
//! research and blog analysis. Wire formats live with the implementors; this
//! module fixes the payloads the router consumes and the retry policy.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// ─── Payloads ─────────────────────────────────────────────────────────────────

/// Recency filter for web search
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Recency {
    Day,
    Week,
    Month,
    Year,
}

impl std::fmt::Display for Recency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recency::Day => write!(f, "day"),
            Recency::Week => write!(f, "week"),
            Recency::Month => write!(f, "month"),
            Recency::Year => write!(f, "year"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub recency: Option<Recency>,
    pub domains: Vec<String>,
    /// Framing prompt forwarded to search providers that accept one
    pub system_context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub text: String,
    pub citations: Vec<String>,
}

impl SearchResult {
    /// First few substantive sentences of the answer
    pub fn facts(&self, query: &str) -> Vec<String> {
        let mut facts: Vec<String> = split_sentences(&self.text)
            .into_iter()
            .filter(|s| s.len() >= 25 && s.len() <= 240)
            .take(4)
            .collect();
        if facts.len() < 2 {
            facts.insert(0, format!("The user researched \"{}\" on the web.", query.trim()));
        }
        if facts.len() < 2 && !self.text.trim().is_empty() {
            facts.push(truncate(self.text.trim(), 200));
        }
        facts.truncate(5);
        facts
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstagramProfileAnalysis {
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub posts: u64,
    /// Percentage of followers engaging per post
    #[serde(default)]
    pub engagement_rate: f32,
    #[serde(default)]
    pub avg_likes: f32,
    #[serde(default)]
    pub avg_comments: f32,
    #[serde(default)]
    pub related_accounts: Vec<String>,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl InstagramProfileAnalysis {
    pub fn summary(&self) -> String {
        format!(
            "@{}: {} followers, {} posts, {:.2}% engagement (avg {:.0} likes, {:.0} comments)",
            self.username.trim_start_matches('@'),
            self.followers,
            self.posts,
            self.engagement_rate,
            self.avg_likes,
            self.avg_comments
        )
    }

    pub fn facts(&self, own: bool) -> Vec<String> {
        let handle = self.username.trim_start_matches('@');
        let subject = if own {
            format!("The user's Instagram account @{handle}")
        } else {
            format!("Competitor Instagram account @{handle}")
        };
        let mut facts = vec![
            format!("{subject} has {} followers and {} posts.", self.followers, self.posts),
            format!(
                "{subject} has an engagement rate of {:.2}% with about {:.0} likes per post.",
                self.engagement_rate, self.avg_likes
            ),
        ];
        if let Some(bio) = self.bio.as_deref().filter(|b| !b.trim().is_empty()) {
            facts.push(format!("{subject} describes itself as: {}", bio.trim()));
        }
        if !self.related_accounts.is_empty() {
            let related: Vec<String> = self
                .related_accounts
                .iter()
                .take(5)
                .map(|a| format!("@{}", a.trim_start_matches('@')))
                .collect();
            facts.push(format!("Accounts related to @{handle}: {}.", related.join(", ")));
        }
        facts
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HashtagPost {
    pub author: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HashtagResearch {
    pub hashtag: String,
    /// Ranked by engagement, best first
    pub posts: Vec<HashtagPost>,
    #[serde(default)]
    pub researched_at: Option<DateTime<Utc>>,
}

impl HashtagResearch {
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("#{}: {} top posts", self.tag(), self.posts.len())];
        for post in self.posts.iter().take(5) {
            lines.push(format!(
                "  - @{} ({} likes, {} comments): {}",
                post.author.trim_start_matches('@'),
                post.likes,
                post.comments,
                truncate(&post.caption, 120)
            ));
        }
        lines.join("\n")
    }

    pub fn tag(&self) -> &str {
        self.hashtag.trim_start_matches('#')
    }

    pub fn facts(&self) -> Vec<String> {
        let tag = self.tag();
        let mut facts = vec![format!("The user researched the hashtag #{tag}.")];
        if self.posts.is_empty() {
            facts.push(format!("No top posts were found for #{tag}."));
            return facts;
        }
        let avg_likes =
            self.posts.iter().map(|p| p.likes as f64).sum::<f64>() / self.posts.len() as f64;
        facts.push(format!("Top posts for #{tag} average about {avg_likes:.0} likes."));
        let authors: Vec<String> = self
            .posts
            .iter()
            .take(3)
            .map(|p| format!("@{}", p.author.trim_start_matches('@')))
            .collect();
        facts.push(format!("Leading accounts posting #{tag}: {}.", authors.join(", ")));
        facts
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlogAnalysis {
    pub url: String,
    pub domain: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub post_count: Option<u32>,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl BlogAnalysis {
    pub fn facts(&self) -> Vec<String> {
        let mut facts = vec![format!("The user's blog is hosted at {}.", self.domain)];
        if !self.topics.is_empty() {
            facts.push(format!(
                "The blog at {} covers: {}.",
                self.domain,
                self.topics.iter().take(6).cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if let Some(tone) = self.tone.as_deref().filter(|t| !t.trim().is_empty()) {
            facts.push(format!("The blog at {} is written in a {} tone.", self.domain, tone.trim()));
        }
        if let Some(n) = self.post_count {
            facts.push(format!("The blog at {} has about {n} posts.", self.domain));
        }
        if facts.len() < 2 && !self.summary.trim().is_empty() {
            facts.push(truncate(self.summary.trim(), 200));
        }
        facts.truncate(5);
        facts
    }
}

// ─── Provider traits ──────────────────────────────────────────────────────────

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, request: &SearchRequest) -> Result<SearchResult>;
}

#[async_trait]
pub trait ProfileAnalysisProvider: Send + Sync {
    async fn analyze_profile(&self, username: &str) -> Result<InstagramProfileAnalysis>;
}

#[async_trait]
pub trait HashtagProvider: Send + Sync {
    async fn search_hashtag(&self, hashtag: &str) -> Result<HashtagResearch>;
}

#[async_trait]
pub trait BlogAnalysisProvider: Send + Sync {
    async fn analyze_blog(&self, url: &str) -> Result<BlogAnalysis>;
}

// ─── Retry ────────────────────────────────────────────────────────────────────

/// Bounded retry for transient provider failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Base delay, doubled per attempt
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

/// Run `op`, retrying only errors that report themselves transient.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = config.delay_for(attempt);
                warn!(%label, attempt = attempt + 1, ?delay, "transient provider error: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(%label, attempts = attempt + 1, "provider call failed: {e}");
                return Err(e);
            }
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            let s = current.trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}
