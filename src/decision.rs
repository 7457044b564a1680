//! # Decision Bundle
//!
//! Typed per-turn output of the intent classifier. The classifier answers with
//! loosely structured JSON; this module extracts it from surrounding prose,
//! decodes it into one typed decision per action kind, and reconciles the
//! result with the authoritative profile. Decisions whose trigger is false
//! are dropped; the workflow phase decision is always present.

use crate::error::{MuseError, Result};
use crate::profile::{normalize_handle, InstagramOwnership, Profile, ProfileField, ProfilePatch};
use crate::providers::Recency;
use crate::workflow::{self, PhaseId, WorkflowPhase};
use serde::{Deserialize, Serialize};

// ─── Typed decisions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSearchDecision {
    pub confidence: f32,
    pub query: String,
    pub recency: Option<Recency>,
    pub domains: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstagramAnalysisDecision {
    pub confidence: f32,
    /// Normalized handle, no `@`
    pub username: String,
    /// Decided from the stored profile handle, never from the classifier
    pub ownership: InstagramOwnership,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashtagSearchDecision {
    pub confidence: f32,
    /// Lower-case, no `#`
    pub hashtag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlogAnalysisDecision {
    pub confidence: f32,
    pub url: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdateDecision {
    pub confidence: f32,
    pub patch: ProfilePatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowPhaseDecision {
    pub phase: PhaseId,
    pub missing_fields: Vec<ProfileField>,
    pub can_generate_content: bool,
    pub can_generate_ideas: bool,
    pub reason: Option<String>,
}

impl WorkflowPhaseDecision {
    fn from_phase(phase: &WorkflowPhase, profile: &Profile) -> Self {
        Self {
            phase: phase.id,
            missing_fields: workflow::missing_fields_for_phase(phase, profile),
            can_generate_content: phase.can_generate_content,
            can_generate_ideas: phase.can_generate_ideas,
            reason: None,
        }
    }

    pub fn workflow_phase(&self) -> &'static WorkflowPhase {
        workflow::phase_by_id(self.phase)
    }
}

/// Everything the classifier decided for one turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionBundle {
    pub web_search: Option<WebSearchDecision>,
    pub instagram_analysis: Option<InstagramAnalysisDecision>,
    pub instagram_hashtag_search: Option<HashtagSearchDecision>,
    pub blog_analysis: Option<BlogAnalysisDecision>,
    pub profile_update: Option<ProfileUpdateDecision>,
    pub workflow_phase: WorkflowPhaseDecision,
}

/// A dispatchable external action
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionDecision<'a> {
    WebSearch(&'a WebSearchDecision),
    InstagramAnalysis(&'a InstagramAnalysisDecision),
    HashtagSearch(&'a HashtagSearchDecision),
    BlogAnalysis(&'a BlogAnalysisDecision),
}

impl ActionDecision<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionDecision::WebSearch(_) => "web_search",
            ActionDecision::InstagramAnalysis(_) => "instagram_analysis",
            ActionDecision::HashtagSearch(_) => "hashtag_search",
            ActionDecision::BlogAnalysis(_) => "blog_analysis",
        }
    }
}

impl DecisionBundle {
    /// No actions, earliest phase, content generation blocked.
    pub fn safe_default(profile: &Profile) -> Self {
        let phase = workflow::earliest_phase();
        Self {
            web_search: None,
            instagram_analysis: None,
            instagram_hashtag_search: None,
            blog_analysis: None,
            profile_update: None,
            workflow_phase: WorkflowPhaseDecision::from_phase(phase, profile),
        }
    }

    /// Triggered external actions in dispatch order
    pub fn actions(&self) -> Vec<ActionDecision<'_>> {
        let mut actions = Vec::new();
        if let Some(d) = &self.web_search {
            actions.push(ActionDecision::WebSearch(d));
        }
        if let Some(d) = &self.instagram_analysis {
            actions.push(ActionDecision::InstagramAnalysis(d));
        }
        if let Some(d) = &self.instagram_hashtag_search {
            actions.push(ActionDecision::HashtagSearch(d));
        }
        if let Some(d) = &self.blog_analysis {
            actions.push(ActionDecision::BlogAnalysis(d));
        }
        actions
    }

    /// Decode classifier output and reconcile it with the profile.
    pub fn from_model_output(raw: &str, profile: &Profile) -> Result<Self> {
        let cleaned = strip_code_fences(raw);
        let json = extract_json_object(&cleaned)
            .ok_or_else(|| MuseError::Classification("no JSON object in classifier output".into()))?;
        let wire: WireBundle = serde_json::from_str(json)
            .map_err(|e| MuseError::Classification(format!("malformed decision JSON: {e}")))?;
        Ok(wire.into_bundle(profile))
    }

    /// Replace every classifier claim that the profile can answer.
    ///
    /// The phase and capability flags are recomputed; claimed-missing fields
    /// that are populated are dropped and the engine's own missing fields are
    /// added; Instagram ownership follows the stored handle.
    pub fn validate_against(&mut self, profile: &Profile) {
        let phase = workflow::phase_for_profile(profile);
        let claimed_phase = self.workflow_phase.phase;
        if claimed_phase != phase.id {
            tracing::debug!(claimed = %claimed_phase, actual = %phase.id, "overriding classifier phase");
        }

        let mut missing: Vec<ProfileField> = self
            .workflow_phase
            .missing_fields
            .iter()
            .copied()
            .filter(|f| {
                let present = profile.has(*f);
                if present {
                    tracing::debug!(field = %f, "dropping field the classifier claimed missing");
                }
                !present
            })
            .collect();
        for f in workflow::missing_fields_for_phase(phase, profile) {
            if !missing.contains(&f) {
                missing.push(f);
            }
        }
        missing.sort();
        missing.dedup();

        self.workflow_phase.phase = phase.id;
        self.workflow_phase.missing_fields = missing;
        self.workflow_phase.can_generate_content = phase.can_generate_content;
        self.workflow_phase.can_generate_ideas = phase.can_generate_ideas;

        if let Some(ig) = self.instagram_analysis.as_mut() {
            ig.ownership = if profile.is_own_handle(&ig.username) {
                InstagramOwnership::Own
            } else {
                InstagramOwnership::Competitor
            };
        }
    }
}

/// Outcome of one classification attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Classified(DecisionBundle),
    /// The safe default bundle, and why it was used
    Fallback {
        bundle: DecisionBundle,
        reason: FallbackReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Timeout,
    Unparsable(String),
    ModelError(String),
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::Timeout => write!(f, "classification timed out"),
            FallbackReason::Unparsable(e) => write!(f, "unparsable classification: {e}"),
            FallbackReason::ModelError(e) => write!(f, "classifier model failed: {e}"),
        }
    }
}

impl Classification {
    pub fn bundle(&self) -> &DecisionBundle {
        match self {
            Classification::Classified(b) => b,
            Classification::Fallback { bundle, .. } => bundle,
        }
    }

    pub fn into_bundle(self) -> DecisionBundle {
        match self {
            Classification::Classified(b) => b,
            Classification::Fallback { bundle, .. } => bundle,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Classification::Fallback { .. })
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireBundle {
    web_search: Option<WireWebSearch>,
    instagram_analysis: Option<WireInstagram>,
    #[serde(alias = "hashtagSearch")]
    instagram_hashtag_search: Option<WireHashtag>,
    blog_analysis: Option<WireBlog>,
    workflow_phase: Option<WirePhase>,
    profile_update: Option<WireProfileUpdate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireWebSearch {
    #[serde(alias = "needsSearch", alias = "trigger")]
    should_search: bool,
    confidence: f32,
    query: Option<String>,
    recency: Option<String>,
    domains: Vec<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireInstagram {
    #[serde(alias = "trigger")]
    should_analyze: bool,
    confidence: f32,
    username: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireHashtag {
    #[serde(alias = "trigger")]
    should_search: bool,
    confidence: f32,
    hashtag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireBlog {
    #[serde(alias = "trigger")]
    should_analyze: bool,
    confidence: f32,
    url: Option<String>,
    domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WirePhase {
    phase: Option<serde_json::Value>,
    missing_fields: Vec<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireProfileUpdate {
    #[serde(alias = "trigger")]
    should_update: bool,
    confidence: f32,
    #[serde(alias = "updates")]
    fields: Option<ProfilePatch>,
}

fn parse_recency(raw: Option<&str>) -> Option<Recency> {
    match raw?.trim().to_lowercase().as_str() {
        "day" | "24h" | "today" => Some(Recency::Day),
        "week" | "7d" => Some(Recency::Week),
        "month" | "30d" => Some(Recency::Month),
        "year" | "365d" => Some(Recency::Year),
        _ => None,
    }
}

/// Host of a URL, tolerating a missing scheme
pub fn domain_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").to_lowercase();
    host.contains('.').then_some(host)
}

fn clamp_confidence(c: f32) -> f32 {
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl WireBundle {
    fn into_bundle(self, profile: &Profile) -> DecisionBundle {
        let web_search = self.web_search.filter(|w| w.should_search).and_then(|w| {
            let query = w.query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty())?;
            Some(WebSearchDecision {
                confidence: clamp_confidence(w.confidence),
                query,
                recency: parse_recency(w.recency.as_deref()),
                domains: w
                    .domains
                    .iter()
                    .filter_map(|d| domain_of(d))
                    .collect(),
                reason: w.reason,
            })
        });

        let instagram_analysis = self.instagram_analysis.filter(|i| i.should_analyze).and_then(|i| {
            let username = normalize_handle(i.username.as_deref()?);
            if username.is_empty() {
                return None;
            }
            Some(InstagramAnalysisDecision {
                confidence: clamp_confidence(i.confidence),
                username,
                ownership: InstagramOwnership::Own,
                reason: i.reason,
            })
        });

        let instagram_hashtag_search = self.instagram_hashtag_search.filter(|h| h.should_search).and_then(|h| {
            let hashtag = h.hashtag?.trim().trim_start_matches('#').to_lowercase();
            if hashtag.is_empty() {
                return None;
            }
            Some(HashtagSearchDecision {
                confidence: clamp_confidence(h.confidence),
                hashtag,
            })
        });

        let blog_analysis = self.blog_analysis.filter(|b| b.should_analyze).and_then(|b| {
            let url = b.url.or(b.domain)?;
            let domain = domain_of(&url)?;
            let url = if url.contains("://") { url } else { format!("https://{}", url.trim()) };
            Some(BlogAnalysisDecision {
                confidence: clamp_confidence(b.confidence),
                url,
                domain,
            })
        });

        let profile_update = self.profile_update.filter(|p| p.should_update).and_then(|p| {
            let patch = p.fields.filter(|f| !f.is_empty())?;
            Some(ProfileUpdateDecision {
                confidence: clamp_confidence(p.confidence),
                patch,
            })
        });

        let wire_phase = self.workflow_phase.unwrap_or_default();
        let claimed = wire_phase
            .phase
            .as_ref()
            .and_then(|v| match v {
                serde_json::Value::String(s) => PhaseId::parse_loose(s),
                serde_json::Value::Number(n) => PhaseId::parse_loose(&n.to_string()),
                _ => None,
            })
            .unwrap_or(PhaseId::Discovery);
        let mut missing: Vec<ProfileField> = wire_phase
            .missing_fields
            .iter()
            .filter_map(|f| ProfileField::parse_loose(f))
            .collect();
        missing.dedup();
        let claimed_phase = workflow::phase_by_id(claimed);

        let mut bundle = DecisionBundle {
            web_search,
            instagram_analysis,
            instagram_hashtag_search,
            blog_analysis,
            profile_update,
            workflow_phase: WorkflowPhaseDecision {
                phase: claimed,
                missing_fields: missing,
                can_generate_content: claimed_phase.can_generate_content,
                can_generate_ideas: claimed_phase.can_generate_ideas,
                reason: wire_phase.reason,
            },
        };
        bundle.validate_against(profile);
        bundle
    }
}

// ─── JSON extraction ──────────────────────────────────────────────────────────

/// Drop Markdown code-fence lines such as "```json" and "```"
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First balanced `{...}` in the text, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, '{', '}')
}

/// First balanced `[...]` in the text, ignoring brackets inside strings.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, '[', ']')
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(open) {
        let start = search_from + rel;
        if let Some(end) = balanced_end(&text[start..], open, close) {
            return Some(&text[start..start + end]);
        }
        search_from = start + open.len_utf8();
    }
    None
}

/// Byte length of the balanced group starting at `s[0]`
fn balanced_end(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}
