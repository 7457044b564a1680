//! # Turn Pipeline
//!
//! One user turn: classify, dispatch cache-checked actions, retrieve
//! memories, assemble the request, stream the answer. Tokens are forwarded
//! as they arrive; the full text is accumulated and handed to background
//! post-processing (persistence, profile extraction, memory extraction,
//! titling) once the stream ends or the consumer goes away.

use crate::cache::ActionCaches;
use crate::config::EngineConfig;
use crate::cortex::MemoryCortex;
use crate::decision::{Classification, WorkflowPhaseDecision};
use crate::embedding::EmbeddingProvider;
use crate::error::{MuseError, Result};
use crate::extraction::Extractor;
use crate::intent::IntentAnalyzer;
use crate::locks::UserLocks;
use crate::model::{CompletionOptions, TextModel, TokenStream};
use crate::profile::{ProfileField, ProfilePatch};
use crate::prompt::{PromptAssembler, PromptInputs};
use crate::router::{ActionProviders, ActionResults, ExternalActionRouter};
use crate::store::MemoryStore;
use crate::types::{ChatMessage, MemorySource, Role, StoredMessage};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Streamed to the consumer of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Token {
        text: String,
    },
    Done {
        citations: Vec<String>,
        interrupted: bool,
        /// Output looked like finished content while content generation is blocked
        scope_violation: bool,
    },
}

/// What the background half of a turn did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnSummary {
    pub text: String,
    pub interrupted: bool,
    pub scope_violation: bool,
    /// Profile fields whose value changed
    pub profile_fields: Vec<ProfileField>,
    /// Memories inserted or merged
    pub memories: usize,
    pub title: Option<String>,
}

/// A turn in flight
pub struct TurnHandle {
    pub conversation_id: String,
    pub classification: Classification,
    pub phase: WorkflowPhaseDecision,
    pub actions: ActionResults,
    pub citations: Vec<String>,
    pub events: mpsc::Receiver<TurnEvent>,
    /// Resolves after post-processing finished
    pub background: JoinHandle<TurnSummary>,
}

pub struct TurnPipeline {
    store: Arc<MemoryStore>,
    model: Arc<dyn TextModel>,
    locks: Arc<UserLocks>,
    cortex: Arc<MemoryCortex>,
    analyzer: IntentAnalyzer,
    router: ExternalActionRouter,
    assembler: PromptAssembler,
    extractor: Arc<Extractor>,
    config: EngineConfig,
}

impl TurnPipeline {
    pub fn new(
        store: Arc<MemoryStore>,
        model: Arc<dyn TextModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        providers: ActionProviders,
        config: EngineConfig,
    ) -> Self {
        let caches = Arc::new(ActionCaches::new(&config.caches));
        Self::with_caches(store, model, embedder, providers, caches, config)
    }

    /// Share caches between pipelines, e.g. across server handlers
    pub fn with_caches(
        store: Arc<MemoryStore>,
        model: Arc<dyn TextModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        providers: ActionProviders,
        caches: Arc<ActionCaches>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(UserLocks::new());
        let cortex = Arc::new(MemoryCortex::new(
            Arc::clone(&store),
            embedder,
            Arc::clone(&locks),
            config.memory.clone(),
        ));
        let router = ExternalActionRouter::new(
            Arc::clone(&store),
            Arc::clone(&cortex),
            Arc::clone(&locks),
            caches,
            providers,
            config.retry.clone(),
            config.intent.search_confidence_gate,
        );
        Self {
            analyzer: IntentAnalyzer::new(Arc::clone(&model), config.intent.clone()),
            assembler: PromptAssembler::new(config.persona.clone(), config.history_window),
            extractor: Arc::new(Extractor::new(Arc::clone(&model))),
            store,
            model,
            locks,
            cortex,
            router,
            config,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn cortex(&self) -> &Arc<MemoryCortex> {
        &self.cortex
    }

    pub fn caches(&self) -> &Arc<ActionCaches> {
        self.router.caches()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the foreground half of a turn and start streaming.
    ///
    /// Fails only on invalid input, store errors before generation, or a
    /// generation stream that cannot be opened. Everything else degrades.
    pub async fn run_turn(&self, user_id: &str, conversation_id: &str, message: &str) -> Result<TurnHandle> {
        let message = message.trim();
        if message.is_empty() {
            return Err(MuseError::Validation("message is empty".into()));
        }
        if user_id.trim().is_empty() {
            return Err(MuseError::Validation("user id is empty".into()));
        }

        let conversation = self.store.ensure_conversation(user_id, conversation_id).await?;
        let user_message = StoredMessage::new(&conversation.id, user_id, Role::User, message);
        let mut profile = self.store.load_profile(user_id).await?;

        let window = self.analyzer.config().history_window.max(self.assembler.history_window());
        let history: Vec<ChatMessage> = self
            .store
            .recent_messages(user_id, &conversation.id, i64::try_from(window).unwrap_or(i64::MAX))
            .await?
            .iter()
            .map(StoredMessage::as_chat)
            .collect();

        let classification = self.analyzer.analyze(&profile, &history, message).await;
        let bundle = classification.bundle();

        let actions = self.router.dispatch(&profile, bundle, Some(&conversation.id)).await;
        if !actions.is_empty() {
            profile = self.store.load_profile(user_id).await?;
        }

        let memories = match self.cortex.recall(user_id, message, self.config.memory.retrieval_k).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(user = %user_id, "memory retrieval skipped: {e}");
                Vec::new()
            }
        };

        let phase = bundle.workflow_phase.clone();
        let request = self.assembler.build(&PromptInputs {
            profile: &profile,
            phase: &phase,
            memories: &memories,
            actions: &actions,
            history: &history,
            message,
        });
        let options = CompletionOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            json_response: false,
        };
        let stream = self.model.stream(&request, &options).await?;

        debug!(
            user = %user_id,
            conversation = %conversation.id,
            phase = %phase.phase,
            memories = memories.len(),
            citations = actions.citations.len(),
            fallback = classification.is_fallback(),
            "streaming turn"
        );

        let (tx, events) = mpsc::channel(self.config.channel_capacity.max(1));
        let post = PostTurn {
            store: Arc::clone(&self.store),
            cortex: Arc::clone(&self.cortex),
            locks: Arc::clone(&self.locks),
            extractor: Arc::clone(&self.extractor),
            user_id: user_id.to_string(),
            conversation_id: conversation.id.clone(),
            user_message,
            citations: actions.citations.clone(),
            classifier_patch: bundle.profile_update.as_ref().map(|u| u.patch.clone()),
            needs_title: conversation.title.is_none() && history.is_empty(),
            content_blocked: !phase.can_generate_content,
        };
        let background = tokio::spawn(post.run(stream, tx));

        Ok(TurnHandle {
            conversation_id: conversation.id,
            citations: actions.citations.clone(),
            phase,
            classification,
            actions,
            events,
            background,
        })
    }
}

// ─── Background half ──────────────────────────────────────────────────────────

struct PostTurn {
    store: Arc<MemoryStore>,
    cortex: Arc<MemoryCortex>,
    locks: Arc<UserLocks>,
    extractor: Arc<Extractor>,
    user_id: String,
    conversation_id: String,
    user_message: StoredMessage,
    citations: Vec<String>,
    classifier_patch: Option<ProfilePatch>,
    needs_title: bool,
    content_blocked: bool,
}

impl PostTurn {
    async fn run(self, stream: TokenStream, tx: mpsc::Sender<TurnEvent>) -> TurnSummary {
        let (text, interrupted) = forward(stream, &tx).await;

        let scope_violation = self.content_blocked && looks_like_finished_content(&text);
        if scope_violation {
            warn!(
                user = %self.user_id,
                conversation = %self.conversation_id,
                "response looks like finished content while content generation is blocked"
            );
        }

        let _ = tx
            .send(TurnEvent::Done {
                citations: self.citations.clone(),
                interrupted,
                scope_violation,
            })
            .await;
        drop(tx);

        let mut summary = TurnSummary {
            text,
            interrupted,
            scope_violation,
            ..TurnSummary::default()
        };
        self.persist(&summary.text).await;

        let (fields, memories, title) = tokio::join!(
            self.update_profile(&summary.text),
            self.extract_memories(&summary.text),
            self.title(&summary.text),
        );
        summary.profile_fields = fields;
        summary.memories = memories;
        summary.title = title;

        info!(
            user = %self.user_id,
            conversation = %self.conversation_id,
            interrupted,
            profile_fields = summary.profile_fields.len(),
            memories = summary.memories,
            "turn post-processing finished"
        );
        summary
    }

    async fn persist(&self, text: &str) {
        if let Err(e) = self.store.append_message(&self.user_message).await {
            warn!(user = %self.user_id, "failed to persist user message: {e}");
        }
        if text.trim().is_empty() {
            return;
        }
        let assistant = StoredMessage::new(&self.conversation_id, &self.user_id, Role::Assistant, text)
            .with_citations(self.citations.clone());
        if let Err(e) = self.store.append_message(&assistant).await {
            warn!(user = %self.user_id, "failed to persist assistant message: {e}");
        }
    }

    async fn update_profile(&self, text: &str) -> Vec<ProfileField> {
        let current = match self.store.load_profile(&self.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %self.user_id, "profile extraction skipped: {e}");
                return Vec::new();
            }
        };
        let extracted = match self.extractor.profile_patch(&current, &self.user_message.content, text).await {
            Ok(patch) => patch,
            Err(e) => {
                warn!(user = %self.user_id, "profile extraction failed: {e}");
                None
            }
        };

        let patches: Vec<&ProfilePatch> = self.classifier_patch.iter().chain(extracted.iter()).collect();
        if patches.is_empty() {
            return Vec::new();
        }

        let merged = self
            .store
            .update_profile(&self.locks, &self.user_id, |profile| {
                let mut changed = Vec::new();
                for patch in &patches {
                    for field in profile.apply_patch(patch) {
                        if !changed.contains(&field) {
                            changed.push(field);
                        }
                    }
                }
                changed
            })
            .await;
        match merged {
            Ok((profile, changed)) => {
                if !changed.is_empty() {
                    info!(
                        user = %self.user_id,
                        completeness = profile.completeness_score,
                        ?changed,
                        "profile updated from turn"
                    );
                }
                changed
            }
            Err(e) => {
                warn!(user = %self.user_id, "profile update failed: {e}");
                Vec::new()
            }
        }
    }

    async fn extract_memories(&self, text: &str) -> usize {
        let candidates = match self.extractor.memory_candidates(&self.user_message.content, text).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(user = %self.user_id, "memory extraction failed: {e}");
                return 0;
            }
        };
        if candidates.is_empty() {
            return 0;
        }
        self.cortex
            .remember_all(
                &self.user_id,
                &candidates,
                MemorySource::Conversation,
                Some(&self.conversation_id),
            )
            .await
            .len()
    }

    async fn title(&self, text: &str) -> Option<String> {
        if !self.needs_title {
            return None;
        }
        let title = match self.extractor.title(&self.user_message.content, text).await {
            Ok(title) => title,
            Err(e) => {
                warn!(user = %self.user_id, "title generation failed: {e}");
                return None;
            }
        };
        match self.store.set_title(&self.user_id, &self.conversation_id, &title).await {
            Ok(true) => Some(title),
            Ok(false) => None,
            Err(e) => {
                warn!(user = %self.user_id, "failed to persist title: {e}");
                None
            }
        }
    }
}

/// Forward deltas until the stream ends, fails, or the receiver is dropped.
/// Returns the accumulated text and whether the stream was cut short.
async fn forward(mut stream: TokenStream, tx: &mpsc::Sender<TurnEvent>) -> (String, bool) {
    let mut text = String::new();
    loop {
        tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!("consumer went away, dropping model stream");
                return (text, true);
            }
            next = stream.next() => match next {
                Some(Ok(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    if tx.send(TurnEvent::Token { text: delta }).await.is_err() {
                        return (text, true);
                    }
                }
                Some(Err(e)) => {
                    warn!("generation stream interrupted: {e}");
                    return (text, true);
                }
                None => return (text, false),
            }
        }
    }
}

const CONTENT_LABELS: &[&str] = &[
    "caption:",
    "hook:",
    "script:",
    "cta:",
    "call to action:",
    "hashtags:",
    "slide 1",
    "scene 1",
];

/// Heuristic for ready-to-post output: several hashtags, or labelled
/// caption/hook/script style lines.
pub fn looks_like_finished_content(text: &str) -> bool {
    let hashtags = text
        .split_whitespace()
        .filter(|w| w.len() > 1 && w.starts_with('#') && w[1..].chars().next().is_some_and(char::is_alphanumeric))
        .count();
    if hashtags >= 3 {
        return true;
    }
    let labels = text
        .lines()
        .map(|l| l.trim().trim_start_matches(['*', '#', '-', ' ']).to_lowercase())
        .filter(|l| CONTENT_LABELS.iter().any(|label| l.starts_with(label)))
        .count();
    labels >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::extraction::{MEMORY_MARKER, PROFILE_MARKER, TITLE_MARKER};
    use crate::intent::CLASSIFIER_MARKER;
    use crate::testing::{FakeSearch, ScriptedModel};
    use crate::workflow::PhaseId;
    use std::time::Duration;

    async fn pipeline_with(model: ScriptedModel, providers: ActionProviders) -> (TurnPipeline, Arc<ScriptedModel>) {
        let store = MemoryStore::connect_in_memory().await.unwrap();
        let model = Arc::new(model);
        let pipeline = TurnPipeline::new(
            store,
            model.clone(),
            Arc::new(HashEmbeddingProvider::new(64)),
            providers,
            EngineConfig::default(),
        );
        (pipeline, model)
    }

    async fn drain(handle: &mut TurnHandle) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_before_any_step() {
        let (pipeline, model) = pipeline_with(ScriptedModel::new(), ActionProviders::default()).await;
        let err = pipeline.run_turn("u1", "c1", "   \n ").await.err().unwrap();
        assert!(matches!(err, MuseError::Validation(_)));
        assert!(model.calls().is_empty());
        assert!(pipeline.store().load_conversation("u1", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_turn_streams_tokens_and_post_processes() {
        let model = ScriptedModel::new()
            .reply(
                CLASSIFIER_MARKER,
                r#"{"profileUpdate": {"shouldUpdate": true, "confidence": 0.9, "fields": {"firstName": "Ada"}},
                    "workflowPhase": {"phase": "discovery"}}"#,
            )
            .reply(PROFILE_MARKER, r#"{"niches": ["vegan baking"], "platforms": "Instagram, TikTok"}"#)
            .reply(MEMORY_MARKER, r#"["Ada bakes vegan sourdough every Sunday."]"#)
            .reply(TITLE_MARKER, "Vegan baking intro")
            .tokens(&["Nice to ", "meet you, ", "Ada!"]);
        let (pipeline, model) = pipeline_with(model, ActionProviders::default()).await;

        let mut handle = pipeline
            .run_turn("u1", "c1", "Hi, I'm Ada and I post vegan baking on Instagram and TikTok")
            .await
            .unwrap();
        assert_eq!(handle.phase.phase, PhaseId::Discovery);
        assert!(!handle.phase.can_generate_content);

        let events = drain(&mut handle).await;
        let tokens: String = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, "Nice to meet you, Ada!");
        assert!(matches!(
            events.last(),
            Some(TurnEvent::Done { interrupted: false, scope_violation: false, .. })
        ));

        let summary = handle.background.await.unwrap();
        assert_eq!(summary.text, "Nice to meet you, Ada!");
        assert_eq!(summary.memories, 1);
        assert_eq!(summary.title.as_deref(), Some("Vegan baking intro"));

        let store = pipeline.store();
        let profile = store.load_profile("u1").await.unwrap();
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.niches, vec!["vegan baking".to_string()]);
        assert_eq!(profile.platforms.len(), 2);
        assert_eq!(profile.completeness_score, 50);

        let messages = store.recent_messages("u1", "c1", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "Nice to meet you, Ada!");
        assert_eq!(
            store.load_conversation("u1", "c1").await.unwrap().unwrap().title.as_deref(),
            Some("Vegan baking intro")
        );

        assert_eq!(model.calls_matching(CLASSIFIER_MARKER), 1);
        assert_eq!(model.streams().len(), 1);
    }

    #[tokio::test]
    async fn test_title_is_only_generated_on_first_exchange() {
        let model = ScriptedModel::new()
            .reply(TITLE_MARKER, "Planning reels")
            .tokens(&["Sure."]);
        let (pipeline, model) = pipeline_with(model, ActionProviders::default()).await;

        for message in ["let's plan reels", "and stories?"] {
            let mut handle = pipeline.run_turn("u1", "c1", message).await.unwrap();
            drain(&mut handle).await;
            handle.background.await.unwrap();
        }
        assert_eq!(model.calls_matching(TITLE_MARKER), 1);
        assert_eq!(pipeline.store().count_messages("u1", "c1").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_search_results_reach_prompt_and_done_event() {
        let model = ScriptedModel::new()
            .reply(
                CLASSIFIER_MARKER,
                r#"{"webSearch": {"shouldSearch": true, "confidence": 0.95, "query": "reels trends 2026"},
                    "workflowPhase": {}}"#,
            )
            .tokens(&["Here is what is trending."]);
        let search = Arc::new(FakeSearch::default());
        let providers = ActionProviders {
            search: Some(search.clone()),
            ..ActionProviders::default()
        };
        let (pipeline, model) = pipeline_with(model, providers).await;

        let mut handle = pipeline.run_turn("u1", "c1", "what's trending on reels?").await.unwrap();
        assert_eq!(handle.citations, vec!["https://example.com/report".to_string()]);
        let events = drain(&mut handle).await;
        match events.last() {
            Some(TurnEvent::Done { citations, .. }) => {
                assert_eq!(citations, &vec!["https://example.com/report".to_string()])
            }
            other => panic!("expected done, got {other:?}"),
        }
        handle.background.await.unwrap();

        let system = &model.streams()[0][0].content;
        assert!(system.contains("Fresh research"));
        assert!(system.contains("https://example.com/report"));
        assert_eq!(search.count(), 1);

        let stored = pipeline.store().recent_messages("u1", "c1", 10).await.unwrap();
        assert_eq!(stored[1].citations, vec!["https://example.com/report".to_string()]);
    }

    #[tokio::test]
    async fn test_broken_stream_is_marked_interrupted_and_still_persisted() {
        let model = ScriptedModel::new()
            .tokens(&["First part. ", "Second part.", "never sent"])
            .stream_error_after(2);
        let (pipeline, _) = pipeline_with(model, ActionProviders::default()).await;

        let mut handle = pipeline.run_turn("u1", "c1", "tell me more").await.unwrap();
        let events = drain(&mut handle).await;
        assert!(matches!(events.last(), Some(TurnEvent::Done { interrupted: true, .. })));

        let summary = handle.background.await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.text, "First part. Second part.");
        let stored = pipeline.store().recent_messages("u1", "c1", 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "First part. Second part.");
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_forwarding_and_keeps_partial_text() {
        let model = ScriptedModel::new()
            .tokens(&["one ", "two ", "three ", "four "])
            .token_delay(Duration::from_millis(30));
        let (pipeline, _) = pipeline_with(model, ActionProviders::default()).await;

        let mut handle = pipeline.run_turn("u1", "c1", "count for me").await.unwrap();
        let first = handle.events.recv().await;
        assert_eq!(first, Some(TurnEvent::Token { text: "one ".into() }));
        let TurnHandle { events, background, .. } = handle;
        drop(events);

        let summary = background.await.unwrap();
        assert!(summary.interrupted);
        assert!(summary.text.starts_with("one "));
        assert_ne!(summary.text, "one two three four ");
        assert_eq!(pipeline.store().count_messages("u1", "c1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_finished_content_is_flagged_while_blocked() {
        let model = ScriptedModel::new().tokens(&["Caption: Sunday bake day\n", "Hook: you won't believe this crumb\n"]);
        let (pipeline, _) = pipeline_with(model, ActionProviders::default()).await;

        let mut handle = pipeline.run_turn("u1", "c1", "write me a post").await.unwrap();
        let events = drain(&mut handle).await;
        assert!(matches!(events.last(), Some(TurnEvent::Done { scope_violation: true, .. })));
        // flagged, not withheld
        assert_eq!(events.len(), 3);
        assert!(handle.background.await.unwrap().scope_violation);
    }

    #[tokio::test]
    async fn test_failing_extraction_does_not_affect_the_turn() {
        let model = ScriptedModel::new()
            .fail(PROFILE_MARKER, "rate limited")
            .fail(MEMORY_MARKER, "rate limited")
            .fail(TITLE_MARKER, "rate limited")
            .tokens(&["Hello!"]);
        let (pipeline, _) = pipeline_with(model, ActionProviders::default()).await;

        let mut handle = pipeline.run_turn("u1", "c1", "hello").await.unwrap();
        drain(&mut handle).await;
        let summary = handle.background.await.unwrap();
        assert!(!summary.interrupted);
        assert!(summary.profile_fields.is_empty());
        assert_eq!(summary.memories, 0);
        assert!(summary.title.is_none());
        assert_eq!(pipeline.store().count_messages("u1", "c1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_conversation_of_another_user_is_rejected() {
        let model = ScriptedModel::new().tokens(&["hi"]);
        let (pipeline, _) = pipeline_with(model, ActionProviders::default()).await;

        let mut handle = pipeline.run_turn("u1", "c1", "hello").await.unwrap();
        drain(&mut handle).await;
        handle.background.await.unwrap();

        let err = pipeline.run_turn("u2", "c1", "hello").await.err().unwrap();
        assert!(matches!(err, MuseError::NotFound(_)));
    }

    #[test]
    fn test_content_guard_heuristic() {
        assert!(looks_like_finished_content("Love this! #vegan #baking #sourdough"));
        assert!(looks_like_finished_content("**Hook:** stop scrolling\n**CTA:** follow for more"));
        assert!(!looks_like_finished_content("What niche do you post in? Maybe #baking?"));
        assert!(!looks_like_finished_content("A good hook: start with a question."));
    }
}
