//! Generation request assembly

use crate::decision::WorkflowPhaseDecision;
use crate::profile::Profile;
use crate::providers::truncate;
use crate::router::ActionResults;
use crate::types::{ChatMessage, MemorySearchResult};
use crate::workflow;

pub const DEFAULT_PERSONA: &str = "You are Muse, a warm and practical assistant for social media content creators. \
You help creators understand their audience, plan content and grow on their platforms. \
Be concise and concrete, use the creator's own words where you can, and ask at most two questions at a time.";

/// Everything that goes into one generation request
pub struct PromptInputs<'a> {
    pub profile: &'a Profile,
    pub phase: &'a WorkflowPhaseDecision,
    pub memories: &'a [MemorySearchResult],
    pub actions: &'a ActionResults,
    /// Prior messages, oldest first; trimmed to the assembler's window
    pub history: &'a [ChatMessage],
    pub message: &'a str,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    persona: String,
    history_window: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA, 12)
    }
}

impl PromptAssembler {
    pub fn new(persona: impl Into<String>, history_window: usize) -> Self {
        Self {
            persona: persona.into(),
            history_window,
        }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// System message, bounded history, then the new user message
    pub fn build(&self, inputs: &PromptInputs<'_>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_message(inputs))];
        let start = inputs.history.len().saturating_sub(self.history_window);
        messages.extend(inputs.history[start..].iter().cloned());
        messages.push(ChatMessage::user(inputs.message.trim()));
        messages
    }

    fn system_message(&self, inputs: &PromptInputs<'_>) -> String {
        let mut sections = vec![self.persona.clone()];

        sections.push(inputs.phase.workflow_phase().capability_instructions());

        let prompts = workflow::discovery_prompts(&inputs.phase.missing_fields);
        if !prompts.is_empty() {
            let list = prompts.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n");
            sections.push(format!(
                "Still unknown about the creator. Weave one of these into the conversation when it fits naturally:\n{list}"
            ));
        }

        sections.push(format!("Creator profile:\n{}", inputs.profile.snapshot()));

        if !inputs.memories.is_empty() {
            let list = inputs
                .memories
                .iter()
                .map(|r| format!("- {} (relevance {:.2})", r.memory.content, r.similarity))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("What you remember about this creator:\n{list}"));
        }

        if let Some(context) = action_context(inputs.actions) {
            sections.push(context);
        }

        sections.join("\n\n")
    }
}

fn action_context(actions: &ActionResults) -> Option<String> {
    if actions.is_empty() {
        return None;
    }
    let mut parts = vec!["Fresh research for this message:".to_string()];

    if let Some(search) = &actions.search {
        parts.push(format!(
            "Web search for \"{}\":\n{}",
            search.query,
            truncate(search.result.text.trim(), 2500)
        ));
    }
    if let Some(ig) = &actions.instagram {
        let label = match ig.ownership {
            crate::profile::InstagramOwnership::Own => "The creator's own Instagram account",
            crate::profile::InstagramOwnership::Competitor => "Competitor Instagram account",
        };
        let mut text = format!("{label}: {}", ig.analysis.summary());
        if let Some(bio) = ig.analysis.bio.as_deref().filter(|b| !b.trim().is_empty()) {
            text.push_str(&format!("\nBio: {}", bio.trim()));
        }
        parts.push(text);
    }
    if let Some(tag) = &actions.hashtag {
        parts.push(format!("Hashtag research:\n{}", tag.research.summary()));
    }
    if let Some(blog) = &actions.blog {
        let a = &blog.analysis;
        let mut text = format!("Blog analysis of {}", a.domain);
        if let Some(title) = &a.title {
            text.push_str(&format!(" ({title})"));
        }
        text.push_str(&format!(":\n{}", truncate(a.summary.trim(), 1200)));
        if !a.topics.is_empty() {
            text.push_str(&format!("\nTopics: {}", a.topics.join(", ")));
        }
        parts.push(text);
    }
    if !actions.citations.is_empty() {
        let list = actions
            .citations
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {c}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("Sources (cite as [n] when you use them):\n{list}"));
    }
    Some(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionBundle;
    use crate::providers::SearchResult;
    use crate::router::SearchContext;
    use crate::types::{Memory, MemorySource};

    #[test]
    fn test_system_message_sections_are_ordered() {
        let mut profile = Profile::new("u1");
        profile.first_name = Some("Ada".into());
        let bundle = DecisionBundle::safe_default(&profile);
        let memories = vec![MemorySearchResult {
            memory: Memory::new("u1", "Ada bakes sourdough", vec![1.0], MemorySource::Conversation),
            similarity: 0.91,
            rank: 1,
        }];
        let actions = ActionResults {
            search: Some(SearchContext {
                query: "sourdough trends".into(),
                result: SearchResult {
                    text: "Sourdough is trending.".into(),
                    citations: vec!["https://a.example".into()],
                },
                cached: false,
            }),
            citations: vec!["https://a.example".into()],
            ..Default::default()
        };
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello!")];

        let messages = PromptAssembler::default().build(&PromptInputs {
            profile: &profile,
            phase: &bundle.workflow_phase,
            memories: &memories,
            actions: &actions,
            history: &history,
            message: " what should I post? ",
        });

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].content, "what should I post?");
        let system = &messages[0].content;
        let order = [
            system.find("You are Muse").unwrap(),
            system.find("Current workflow phase: discovery").unwrap(),
            system.find("Still unknown").unwrap(),
            system.find("Creator profile:").unwrap(),
            system.find("Ada bakes sourdough (relevance 0.91)").unwrap(),
            system.find("Web search for \"sourdough trends\"").unwrap(),
            system.find("[1] https://a.example").unwrap(),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(system.contains("Do not write finished content"));
    }

    #[test]
    fn test_history_is_bounded() {
        let profile = Profile::new("u1");
        let bundle = DecisionBundle::safe_default(&profile);
        let history: Vec<ChatMessage> = (0..10).map(|i| ChatMessage::user(format!("m{i}"))).collect();
        let messages = PromptAssembler::new("persona", 3).build(&PromptInputs {
            profile: &profile,
            phase: &bundle.workflow_phase,
            memories: &[],
            actions: &ActionResults::default(),
            history: &history,
            message: "now",
        });
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1..], ["m7", "m8", "m9", "now"]);
        assert!(!messages[0].content.contains("Fresh research"));
    }
}
