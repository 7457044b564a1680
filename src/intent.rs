//! # Unified Intent Analyzer
//!
//! One classification call per turn. The model is asked for a single JSON
//! object covering every action type; whatever comes back is decoded into a
//! [`DecisionBundle`] and reconciled with the stored profile. Timeouts, model
//! errors and unusable output all fall back to the safe default bundle.

use crate::decision::{Classification, DecisionBundle, FallbackReason};
use crate::model::{CompletionOptions, TextModel};
use crate::profile::Profile;
use crate::types::ChatMessage;
use crate::workflow::{self, WORKFLOW_PHASES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Upper bound on the classification call
    pub timeout: Duration,
    /// Prior messages shown to the classifier
    pub history_window: usize,
    /// Web searches below this confidence are not dispatched
    pub search_confidence_gate: f32,
    pub max_tokens: u32,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            history_window: 6,
            search_confidence_gate: 0.7,
            max_tokens: 800,
        }
    }
}

pub struct IntentAnalyzer {
    model: Arc<dyn TextModel>,
    config: IntentConfig,
}

impl IntentAnalyzer {
    pub fn new(model: Arc<dyn TextModel>, config: IntentConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &IntentConfig {
        &self.config
    }

    /// Classify the current message. Never fails: problems yield
    /// [`Classification::Fallback`].
    pub async fn analyze(&self, profile: &Profile, history: &[ChatMessage], message: &str) -> Classification {
        let messages = self.build_messages(profile, history, message);
        let options = CompletionOptions::json().with_max_tokens(self.config.max_tokens);

        let reason = match tokio::time::timeout(self.config.timeout, self.model.complete(&messages, &options)).await {
            Err(_) => FallbackReason::Timeout,
            Ok(Err(e)) => FallbackReason::ModelError(e.to_string()),
            Ok(Ok(raw)) => match DecisionBundle::from_model_output(&raw, profile) {
                Ok(bundle) => {
                    debug!(
                        user = %profile.user_id,
                        phase = %bundle.workflow_phase.phase,
                        actions = bundle.actions().len(),
                        profile_update = bundle.profile_update.is_some(),
                        "classified turn"
                    );
                    return Classification::Classified(bundle);
                }
                Err(e) => FallbackReason::Unparsable(e.to_string()),
            },
        };

        warn!(user = %profile.user_id, model = self.model.name(), "using safe default decisions: {reason}");
        Classification::Fallback {
            bundle: DecisionBundle::safe_default(profile),
            reason,
        }
    }

    fn build_messages(&self, profile: &Profile, history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
        let start = history.len().saturating_sub(self.config.history_window);
        let transcript = history[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role, crate::providers::truncate(&m.content, 600)))
            .collect::<Vec<_>>()
            .join("\n");

        let phase = workflow::phase_for_profile(profile);
        let user = format!(
            "Creator profile:\n{}\nCompleteness: {}/100, current phase: {}\n\nRecent conversation:\n{}\n\nCurrent message:\n{}",
            profile.snapshot(),
            profile.compute_completeness(),
            phase.id,
            if transcript.is_empty() { "(none)".to_string() } else { transcript },
            message.trim()
        );
        vec![ChatMessage::system(classifier_prompt()), ChatMessage::user(user)]
    }
}

pub(crate) const CLASSIFIER_MARKER: &str = "You are the intent classifier";

fn classifier_prompt() -> String {
    let phases = WORKFLOW_PHASES
        .iter()
        .map(|p| format!("{} ({}-{})", p.id, p.min_completeness, p.max_completeness))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"{CLASSIFIER_MARKER} for a content-creator assistant. Decide which auxiliary actions this turn needs and answer with ONE JSON object and nothing else.

Rules:
- webSearch: only for questions that need current or external facts (trends, news, statistics, platform changes). Never for greetings, thanks, small talk, or questions about the creator themself.
- instagramAnalysis: when the message mentions an Instagram @handle or asks to analyze an Instagram account. Put the handle without @ in "username".
- instagramHashtagSearch: when the message contains a #hashtag or explicitly asks for hashtag research. Put the tag without # in "hashtag".
- blogAnalysis: only with an explicit URL or an explicit request to analyze a blog or website.
- profileUpdate: when the creator states a fact about themself (name, niche, platforms, audience, voice, business, goals).
- workflowPhase: always present. Phases: {phases}.

Schema:
{{
  "webSearch": {{"shouldSearch": bool, "confidence": 0-1, "query": string, "recency": "day"|"week"|"month"|"year"|null, "domains": [string], "reason": string}},
  "instagramAnalysis": {{"shouldAnalyze": bool, "confidence": 0-1, "username": string, "reason": string}},
  "instagramHashtagSearch": {{"shouldSearch": bool, "confidence": 0-1, "hashtag": string}},
  "blogAnalysis": {{"shouldAnalyze": bool, "confidence": 0-1, "url": string}},
  "profileUpdate": {{"shouldUpdate": bool, "confidence": 0-1, "fields": {{"firstName": string, "lastName": string, "niches": [string], "platforms": [string], "instagramHandle": string, "targetAudience": string, "brandVoice": string, "businessType": string, "goals": [string], "contentPillars": [string]}}}},
  "workflowPhase": {{"phase": string, "missingFields": [string], "reason": string}}
}}
Omit any action whose trigger is false."#
    )
}
