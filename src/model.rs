//! Generative text model seam

use crate::error::Result;
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Incremental model output; each item is a text delta
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the backend for a JSON object response when it supports one
    pub json_response: bool,
}

impl CompletionOptions {
    pub fn json() -> Self {
        Self {
            temperature: Some(0.0),
            json_response: true,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait TextModel: Send + Sync {
    fn name(&self) -> &str;

    /// Whole-response completion, used for classification and extraction
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String>;

    /// Streaming completion, used for the user-facing answer
    async fn stream(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<TokenStream>;
}
