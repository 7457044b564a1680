//! Post-turn extraction: profile facts, durable memories and titles.
//!
//! Each call is a single non-streaming completion with its own prompt. The
//! parsers are lenient about prose around the JSON, like the classifier's.

use crate::decision::{extract_json_array, extract_json_object, strip_code_fences};
use crate::error::{MuseError, Result};
use crate::model::{CompletionOptions, TextModel};
use crate::profile::{Profile, ProfilePatch};
use crate::providers::truncate;
use crate::types::ChatMessage;
use serde::Deserialize;
use std::sync::Arc;

pub(crate) const PROFILE_MARKER: &str = "You extract creator profile facts";
pub(crate) const MEMORY_MARKER: &str = "You extract durable memories";
pub(crate) const TITLE_MARKER: &str = "You write short conversation titles";

/// Most memory candidates kept from one exchange
pub const MAX_MEMORY_CANDIDATES: usize = 4;
const MAX_TITLE_CHARS: usize = 60;

pub struct Extractor {
    model: Arc<dyn TextModel>,
}

impl Extractor {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    /// Profile fields the user stated in this exchange, if any
    pub async fn profile_patch(&self, profile: &Profile, user: &str, assistant: &str) -> Result<Option<ProfilePatch>> {
        let system = format!(
            "{PROFILE_MARKER} from a chat between a creator and their assistant. \
             Only record what the creator said about themself; ignore the assistant's suggestions. \
             Answer with one JSON object using any of these keys: firstName, lastName, niches (list), \
             platforms (list), instagramHandle, targetAudience, brandVoice, businessType, goals (list), \
             contentPillars (list). Answer {{}} when nothing new was stated."
        );
        let prompt = format!(
            "Known profile:\n{}\n\nCreator: {}\nAssistant: {}",
            profile.snapshot(),
            user.trim(),
            truncate(assistant.trim(), 1500)
        );
        let raw = self.complete(system, prompt, 400).await?;
        parse_profile_patch(&raw)
    }

    /// Up to four standalone facts worth remembering
    pub async fn memory_candidates(&self, user: &str, assistant: &str) -> Result<Vec<String>> {
        let system = format!(
            "{MEMORY_MARKER} about a creator from one chat exchange. \
             Keep only lasting facts, preferences, plans and decisions about the creator or their business, \
             each phrased as a complete third-person sentence. Skip greetings and generic advice. \
             Answer with a JSON array of at most {MAX_MEMORY_CANDIDATES} strings; [] when nothing is worth keeping."
        );
        let prompt = format!("Creator: {}\nAssistant: {}", user.trim(), truncate(assistant.trim(), 1500));
        let raw = self.complete(system, prompt, 300).await?;
        parse_memory_candidates(&raw)
    }

    pub async fn title(&self, user: &str, assistant: &str) -> Result<String> {
        let system = format!(
            "{TITLE_MARKER}. Reply with a title of at most six words for the conversation, no quotes, no punctuation at the end."
        );
        let prompt = format!("Creator: {}\nAssistant: {}", truncate(user.trim(), 500), truncate(assistant.trim(), 500));
        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: Some(24),
            json_response: false,
        };
        let raw = self
            .model
            .complete(&[ChatMessage::system(system), ChatMessage::user(prompt)], &options)
            .await?;
        Ok(clean_title(&raw).unwrap_or_else(|| fallback_title(user)))
    }

    async fn complete(&self, system: String, prompt: String, max_tokens: u32) -> Result<String> {
        let options = CompletionOptions::json().with_max_tokens(max_tokens);
        self.model
            .complete(&[ChatMessage::system(system), ChatMessage::user(prompt)], &options)
            .await
    }
}

pub fn parse_profile_patch(raw: &str) -> Result<Option<ProfilePatch>> {
    let cleaned = strip_code_fences(raw);
    let json = extract_json_object(&cleaned)
        .ok_or_else(|| MuseError::Serialization("no JSON object in profile extraction".into()))?;
    let patch: ProfilePatch = serde_json::from_str(json)?;
    Ok((!patch.is_empty()).then_some(patch))
}

#[derive(Deserialize)]
struct MemoryEnvelope {
    #[serde(alias = "facts")]
    memories: Vec<String>,
}

pub fn parse_memory_candidates(raw: &str) -> Result<Vec<String>> {
    let cleaned = strip_code_fences(raw);
    let items: Vec<String> = match extract_json_array(&cleaned) {
        Some(json) if !cleaned.trim_start().starts_with('{') => serde_json::from_str(json)?,
        _ => {
            let json = extract_json_object(&cleaned)
                .ok_or_else(|| MuseError::Serialization("no JSON in memory extraction".into()))?;
            serde_json::from_str::<MemoryEnvelope>(json)?.memories
        }
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim();
        if item.len() < 8 || out.iter().any(|o| o.eq_ignore_ascii_case(item)) {
            continue;
        }
        out.push(item.to_string());
        if out.len() == MAX_MEMORY_CANDIDATES {
            break;
        }
    }
    Ok(out)
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches("Title:")
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#')
        .trim_end_matches(['.', '!', '?'])
        .trim();
    (!line.is_empty()).then(|| truncate(line, MAX_TITLE_CHARS))
}

fn fallback_title(user: &str) -> String {
    let words: Vec<&str> = user.split_whitespace().take(6).collect();
    if words.is_empty() {
        "New conversation".to_string()
    } else {
        truncate(&words.join(" "), MAX_TITLE_CHARS)
    }
}
