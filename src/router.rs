//! # External Action Router
//!
//! Turns triggered decisions into provider calls. Every action is checked
//! against its cache first; fresh results are merged into the profile under
//! the user's lock and distilled into a handful of memories. A failing action
//! is logged and left out; the turn carries on without it.

use crate::cache::{ActionCaches, CacheKey};
use crate::cortex::MemoryCortex;
use crate::decision::{
    ActionDecision, BlogAnalysisDecision, DecisionBundle, HashtagSearchDecision, InstagramAnalysisDecision,
    WebSearchDecision,
};
use crate::error::Result;
use crate::locks::UserLocks;
use crate::profile::{InstagramOwnership, Profile};
use crate::providers::{
    with_retry, BlogAnalysis, BlogAnalysisProvider, HashtagProvider, HashtagResearch, InstagramProfileAnalysis,
    ProfileAnalysisProvider, RetryConfig, SearchProvider, SearchRequest, SearchResult,
};
use crate::store::MemoryStore;
use crate::types::MemorySource;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Provider implementations; an absent provider disables its action
#[derive(Clone, Default)]
pub struct ActionProviders {
    pub search: Option<Arc<dyn SearchProvider>>,
    pub instagram: Option<Arc<dyn ProfileAnalysisProvider>>,
    pub hashtags: Option<Arc<dyn HashtagProvider>>,
    pub blogs: Option<Arc<dyn BlogAnalysisProvider>>,
}

impl ActionProviders {
    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    /// Names of the actions that have no provider
    pub fn disabled(&self) -> Vec<&'static str> {
        let mut disabled = Vec::new();
        if self.search.is_none() {
            disabled.push("web_search");
        }
        if self.instagram.is_none() {
            disabled.push("instagram_analysis");
        }
        if self.hashtags.is_none() {
            disabled.push("hashtag_search");
        }
        if self.blogs.is_none() {
            disabled.push("blog_analysis");
        }
        disabled
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchContext {
    pub query: String,
    pub result: SearchResult,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstagramContext {
    pub analysis: InstagramProfileAnalysis,
    pub ownership: InstagramOwnership,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HashtagContext {
    pub research: HashtagResearch,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlogContext {
    pub analysis: BlogAnalysis,
    pub cached: bool,
}

/// Fresh context gathered for one turn
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionResults {
    pub search: Option<SearchContext>,
    pub instagram: Option<InstagramContext>,
    pub hashtag: Option<HashtagContext>,
    pub blog: Option<BlogContext>,
    /// Deduplicated, in dispatch order
    pub citations: Vec<String>,
    /// Kinds of actions that were attempted and failed
    pub failed: Vec<&'static str>,
}

impl ActionResults {
    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.instagram.is_none() && self.hashtag.is_none() && self.blog.is_none()
    }

    fn add_citations(&mut self, citations: &[String]) {
        for c in citations {
            if !self.citations.contains(c) {
                self.citations.push(c.clone());
            }
        }
    }
}

pub struct ExternalActionRouter {
    store: Arc<MemoryStore>,
    cortex: Arc<MemoryCortex>,
    locks: Arc<UserLocks>,
    caches: Arc<ActionCaches>,
    providers: ActionProviders,
    retry: RetryConfig,
    search_confidence_gate: f32,
}

impl ExternalActionRouter {
    pub fn new(
        store: Arc<MemoryStore>,
        cortex: Arc<MemoryCortex>,
        locks: Arc<UserLocks>,
        caches: Arc<ActionCaches>,
        providers: ActionProviders,
        retry: RetryConfig,
        search_confidence_gate: f32,
    ) -> Self {
        Self {
            store,
            cortex,
            locks,
            caches,
            providers,
            retry,
            search_confidence_gate,
        }
    }

    pub fn caches(&self) -> &Arc<ActionCaches> {
        &self.caches
    }

    /// Run every triggered action in order. Never fails.
    pub async fn dispatch(
        &self,
        profile: &Profile,
        bundle: &DecisionBundle,
        conversation_id: Option<&str>,
    ) -> ActionResults {
        let mut results = ActionResults::default();
        for action in bundle.actions() {
            let kind = action.kind();
            let outcome = match action {
                ActionDecision::WebSearch(d) => self.web_search(profile, d, conversation_id, &mut results).await,
                ActionDecision::InstagramAnalysis(d) => {
                    self.instagram(profile, d, conversation_id, &mut results).await
                }
                ActionDecision::HashtagSearch(d) => self.hashtag(profile, d, conversation_id, &mut results).await,
                ActionDecision::BlogAnalysis(d) => self.blog(profile, d, conversation_id, &mut results).await,
            };
            if let Err(e) = outcome {
                warn!(user = %profile.user_id, action = kind, "action skipped: {e}");
                results.failed.push(kind);
            }
        }
        results
    }

    async fn web_search(
        &self,
        profile: &Profile,
        decision: &WebSearchDecision,
        conversation_id: Option<&str>,
        results: &mut ActionResults,
    ) -> Result<()> {
        if decision.confidence < self.search_confidence_gate {
            debug!(
                user = %profile.user_id,
                confidence = decision.confidence,
                gate = self.search_confidence_gate,
                "web search below confidence gate"
            );
            return Ok(());
        }
        let Some(provider) = self.providers.search.as_ref() else {
            debug!("no search provider configured");
            return Ok(());
        };

        let request = SearchRequest {
            query: decision.query.clone(),
            recency: decision.recency,
            domains: decision.domains.clone(),
            system_context: Some(search_context(profile)),
        };
        let key = CacheKey::search(
            &request.query,
            request.recency,
            &request.domains,
            request.system_context.as_deref(),
        );

        if let Some(hit) = self.caches.search.get(&key).await {
            results.add_citations(&hit.citations);
            results.search = Some(SearchContext {
                query: request.query,
                result: hit.payload,
                cached: true,
            });
            return Ok(());
        }

        let result = with_retry(&self.retry, provider.name(), || provider.search(&request)).await?;
        self.caches
            .search
            .set(key, result.clone(), result.citations.clone())
            .await;

        let facts = result.facts(&request.query);
        self.cortex
            .remember_all(&profile.user_id, &facts, MemorySource::WebSearch, conversation_id)
            .await;

        info!(user = %profile.user_id, query = %request.query, citations = result.citations.len(), "web search done");
        results.add_citations(&result.citations);
        results.search = Some(SearchContext {
            query: request.query,
            result,
            cached: false,
        });
        Ok(())
    }

    async fn instagram(
        &self,
        profile: &Profile,
        decision: &InstagramAnalysisDecision,
        conversation_id: Option<&str>,
        results: &mut ActionResults,
    ) -> Result<()> {
        let Some(provider) = self.providers.instagram.as_ref() else {
            debug!("no profile analysis provider configured");
            return Ok(());
        };
        let key = CacheKey::profile(&decision.username);

        if let Some(hit) = self.caches.profile.get(&key).await {
            results.instagram = Some(InstagramContext {
                analysis: hit.payload,
                ownership: decision.ownership,
                cached: true,
            });
            return Ok(());
        }

        let mut analysis =
            with_retry(&self.retry, "instagram", || provider.analyze_profile(&decision.username)).await?;
        if analysis.username.trim().is_empty() {
            analysis.username = decision.username.clone();
        }
        analysis.analyzed_at.get_or_insert_with(Utc::now);
        self.caches.profile.set(key, analysis.clone(), Vec::new()).await;

        // ownership is settled against the stored handle at write time
        let stored = analysis.clone();
        let (_, ownership) = self
            .store
            .update_profile(&self.locks, &profile.user_id, move |p| p.record_instagram_analysis(stored))
            .await?;

        let facts = analysis.facts(ownership == InstagramOwnership::Own);
        self.cortex
            .remember_all(&profile.user_id, &facts, MemorySource::InstagramAnalysis, conversation_id)
            .await;

        info!(user = %profile.user_id, username = %decision.username, ?ownership, "instagram analysis done");
        results.instagram = Some(InstagramContext {
            analysis,
            ownership,
            cached: false,
        });
        Ok(())
    }

    async fn hashtag(
        &self,
        profile: &Profile,
        decision: &HashtagSearchDecision,
        conversation_id: Option<&str>,
        results: &mut ActionResults,
    ) -> Result<()> {
        let Some(provider) = self.providers.hashtags.as_ref() else {
            debug!("no hashtag provider configured");
            return Ok(());
        };
        let key = CacheKey::hashtag(&decision.hashtag);

        if let Some(hit) = self.caches.hashtag.get(&key).await {
            results.hashtag = Some(HashtagContext {
                research: hit.payload,
                cached: true,
            });
            return Ok(());
        }

        let mut research =
            with_retry(&self.retry, "hashtag", || provider.search_hashtag(&decision.hashtag)).await?;
        research.researched_at.get_or_insert_with(Utc::now);
        self.caches.hashtag.set(key, research.clone(), Vec::new()).await;

        let stored = research.clone();
        let tag = decision.hashtag.clone();
        self.store
            .update_profile(&self.locks, &profile.user_id, move |p| {
                p.extension.hashtag_research.insert(tag, stored);
                p.updated_at = Utc::now();
            })
            .await?;

        self.cortex
            .remember_all(&profile.user_id, &research.facts(), MemorySource::HashtagSearch, conversation_id)
            .await;

        info!(user = %profile.user_id, hashtag = %decision.hashtag, posts = research.posts.len(), "hashtag research done");
        results.hashtag = Some(HashtagContext {
            research,
            cached: false,
        });
        Ok(())
    }

    async fn blog(
        &self,
        profile: &Profile,
        decision: &BlogAnalysisDecision,
        conversation_id: Option<&str>,
        results: &mut ActionResults,
    ) -> Result<()> {
        let Some(provider) = self.providers.blogs.as_ref() else {
            debug!("no blog analysis provider configured");
            return Ok(());
        };
        let key = CacheKey::blog(&decision.domain);

        if let Some(hit) = self.caches.blog.get(&key).await {
            results.add_citations(&hit.citations);
            results.blog = Some(BlogContext {
                analysis: hit.payload,
                cached: true,
            });
            return Ok(());
        }

        let mut analysis = with_retry(&self.retry, "blog", || provider.analyze_blog(&decision.url)).await?;
        if analysis.domain.trim().is_empty() {
            analysis.domain = decision.domain.clone();
        }
        analysis.analyzed_at.get_or_insert_with(Utc::now);
        let citations = vec![analysis.url.clone()];
        self.caches.blog.set(key, analysis.clone(), citations.clone()).await;

        let stored = analysis.clone();
        let domain = decision.domain.clone();
        self.store
            .update_profile(&self.locks, &profile.user_id, move |p| {
                p.extension.blog_analyses.insert(domain, stored);
                p.updated_at = Utc::now();
            })
            .await?;

        self.cortex
            .remember_all(&profile.user_id, &analysis.facts(), MemorySource::BlogAnalysis, conversation_id)
            .await;

        info!(user = %profile.user_id, domain = %decision.domain, "blog analysis done");
        results.add_citations(&citations);
        results.blog = Some(BlogContext {
            analysis,
            cached: false,
        });
        Ok(())
    }
}

/// Framing passed to search providers, tailored to the creator
fn search_context(profile: &Profile) -> String {
    let mut context = String::from("You research facts for a social media content creator.");
    if !profile.niches.is_empty() {
        context.push_str(&format!(" Niche: {}.", profile.niches.join(", ")));
    }
    if !profile.platforms.is_empty() {
        context.push_str(&format!(" Platforms: {}.", profile.platforms.join(", ")));
    }
    context.push_str(" Prefer recent, specific, sourced information.");
    context
}
