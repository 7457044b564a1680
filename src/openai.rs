//! OpenAI-compatible chat and embedding backends over HTTP.
//!
//! Works against any server exposing `/chat/completions` and `/embeddings`
//! with the OpenAI wire format. Rate limits, server errors and network
//! failures are reported as transient so callers can retry them.

use crate::embedding::EmbeddingProvider;
use crate::error::{MuseError, Result};
use crate::model::{CompletionOptions, TextModel, TokenStream};
use crate::providers::{truncate, with_retry, RetryConfig, SearchProvider, SearchRequest, SearchResult};
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    /// Search-capable chat model; web search stays disabled when unset
    pub search_model: Option<String>,
    /// Bound on non-streaming requests
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimension: 1536,
            search_model: None,
            request_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl OpenAiConfig {
    /// Defaults overridden by `OPENAI_BASE_URL`, `OPENAI_API_KEY`,
    /// `MUSE_CHAT_MODEL`, `MUSE_EMBEDDING_MODEL`, `MUSE_EMBEDDING_DIM` and `MUSE_SEARCH_MODEL`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        config.api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| MuseError::Configuration("OPENAI_API_KEY is not set".into()))?;
        if let Ok(model) = std::env::var("MUSE_CHAT_MODEL") {
            config.chat_model = model;
        }
        if let Ok(model) = std::env::var("MUSE_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(dim) = std::env::var("MUSE_EMBEDDING_DIM") {
            config.embedding_dimension = dim
                .parse()
                .map_err(|_| MuseError::Configuration(format!("MUSE_EMBEDDING_DIM is not a number: {dim}")))?;
            if config.embedding_dimension == 0 {
                return Err(MuseError::Configuration("MUSE_EMBEDDING_DIM must be at least 1".into()));
            }
        }
        config.search_model = std::env::var("MUSE_SEARCH_MODEL").ok().filter(|m| !m.trim().is_empty());
        Ok(config)
    }
}

/// Shared HTTP plumbing for both backends
#[derive(Clone)]
struct Client {
    http: reqwest::Client,
    base_url: url::Url,
    api_key: String,
    request_timeout: Duration,
}

impl Client {
    fn new(config: &OpenAiConfig) -> Result<Self> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = url::Url::parse(&base)
            .map_err(|e| MuseError::Configuration(format!("invalid base url {}: {e}", config.base_url)))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MuseError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| MuseError::Configuration(format!("invalid endpoint {path}: {e}")))
    }

    async fn post(&self, path: &str, body: &Value, streaming: bool) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(&self.api_key)
            .json(body);
        if !streaming {
            request = request.timeout(self.request_timeout);
        }
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = format!("{path} returned {status}: {}", truncate(text.trim(), 300));
        if status.as_u16() == 429 || status.is_server_error() {
            Err(MuseError::transient("openai", message))
        } else {
            Err(MuseError::provider("openai", message))
        }
    }
}

fn transport_error(e: reqwest::Error) -> MuseError {
    if e.is_timeout() {
        MuseError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        MuseError::transient("openai", e.to_string())
    } else {
        MuseError::provider("openai", e.to_string())
    }
}

// ─── Chat ─────────────────────────────────────────────────────────────────────

pub struct OpenAiCompatModel {
    client: Client,
    model: String,
    retry: RetryConfig,
}

impl OpenAiCompatModel {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(config)?,
            model: config.chat_model.clone(),
            retry: config.retry.clone(),
        })
    }

    fn body(&self, messages: &[ChatMessage], options: &CompletionOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = options.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if options.json_response {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl TextModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let body = self.body(messages, options, false);
        let response = with_retry(&self.retry, "openai.chat", || self.client.post("chat/completions", &body, false)).await?;
        let value: Value = response.json().await.map_err(transport_error)?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MuseError::provider("openai", "completion without message content"))
    }

    async fn stream(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<TokenStream> {
        let body = self.body(messages, options, true);
        let response = with_retry(&self.retry, "openai.stream", || self.client.post("chat/completions", &body, true)).await?;
        debug!(model = %self.model, "generation stream opened");

        let bytes: BoxStream<'static, reqwest::Result<Vec<u8>>> =
            response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        let state = SseState {
            bytes,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };
        Ok(futures::stream::unfold(state, next_delta).boxed())
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    /// Consume every complete line in the buffer. Lines are decoded only once
    /// whole, so a character split across chunks survives.
    fn drain_lines(&mut self) {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            match parse_sse_line(line.trim()) {
                SseLine::Delta(text) => self.pending.push_back(text),
                SseLine::Done => {
                    self.done = true;
                    return;
                }
                SseLine::Skip => {}
            }
        }
    }
}

async fn next_delta(mut state: SseState) -> Option<(Result<String>, SseState)> {
    loop {
        if let Some(delta) = state.pending.pop_front() {
            return Some((Ok(delta), state));
        }
        if state.done {
            return None;
        }
        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                state.buffer.extend_from_slice(&chunk);
                state.drain_lines();
            }
            Some(Err(e)) => {
                warn!("generation stream read failed: {e}");
                state.done = true;
                return Some((Err(MuseError::transient("openai", format!("stream read error: {e}"))), state));
            }
            None => {
                state.buffer.push(b'\n');
                state.drain_lines();
                state.done = true;
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseLine::Skip;
    };
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => SseLine::Delta(text.to_string()),
        _ => SseLine::Skip,
    }
}

// ─── Search ───────────────────────────────────────────────────────────────────

const SEARCH_SYSTEM_PROMPT: &str = "You are a research assistant for a social media creator. \
Answer with current, factual information and cite your sources.";

/// Web search through a search-capable chat model (for example `gpt-4o-search-preview`
/// or an OpenAI-compatible `sonar` endpoint). Citations are read from the
/// top-level `citations` array or from `url_citation` annotations.
pub struct OpenAiSearch {
    client: Client,
    model: String,
    retry: RetryConfig,
}

impl OpenAiSearch {
    pub fn new(config: &OpenAiConfig, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::new(config)?,
            model: model.into(),
            retry: config.retry.clone(),
        })
    }

    /// `None` when no search model is configured
    pub fn from_config(config: &OpenAiConfig) -> Result<Option<Self>> {
        config
            .search_model
            .as_ref()
            .map(|model| Self::new(config, model.clone()))
            .transpose()
    }

    fn body(&self, request: &SearchRequest) -> Value {
        let system = request.system_context.as_deref().unwrap_or(SEARCH_SYSTEM_PROMPT);
        let mut query = request.query.trim().to_string();
        if let Some(recency) = request.recency {
            query.push_str(&format!("\nOnly use sources from the past {recency}."));
        }
        if !request.domains.is_empty() {
            query.push_str(&format!("\nPrefer these sites: {}.", request.domains.join(", ")));
        }
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": query},
            ],
            "stream": false,
        })
    }
}

fn parse_search_response(value: &Value) -> Result<SearchResult> {
    let message = &value["choices"][0]["message"];
    let text = message["content"]
        .as_str()
        .ok_or_else(|| MuseError::provider("openai.search", "search answer without content"))?
        .to_string();

    let mut citations: Vec<String> = Vec::new();
    let top_level = value["citations"].as_array().into_iter().flatten().filter_map(Value::as_str);
    let annotated = message["annotations"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|a| a["url_citation"]["url"].as_str());
    for url in top_level.chain(annotated) {
        if !citations.iter().any(|c| c == url) {
            citations.push(url.to_string());
        }
    }
    Ok(SearchResult { text, citations })
}

#[async_trait]
impl SearchProvider for OpenAiSearch {
    fn name(&self) -> &'static str {
        "openai-search"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let body = self.body(request);
        let response =
            with_retry(&self.retry, "openai.search", || self.client.post("chat/completions", &body, false)).await?;
        let value: Value = response.json().await.map_err(transport_error)?;
        let result = parse_search_response(&value)?;
        debug!(model = %self.model, citations = result.citations.len(), "search answered");
        Ok(result)
    }
}

// ─── Embeddings ───────────────────────────────────────────────────────────────

pub struct OpenAiEmbeddings {
    client: Client,
    model: String,
    dimension: usize,
    retry: RetryConfig,
}

impl OpenAiEmbeddings {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(config)?,
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            retry: config.retry.clone(),
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimension,
        });
        let response = with_retry(&self.retry, "openai.embeddings", || self.client.post("embeddings", &body, false))
            .await
            .map_err(|e| MuseError::EmbeddingFailed(e.to_string()))?;
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MuseError::EmbeddingFailed(format!("malformed embedding response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(MuseError::EmbeddingFailed(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|row| row.index);
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            SseLine::Delta("Hel".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: ping"), SseLine::Skip);
    }

    #[tokio::test]
    async fn test_split_chunks_are_reassembled() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\ndata: {\"choi".to_vec()),
            Ok(b"ces\":[{\"delta\":{\"content\":\"there\"}}]}\n\n".to_vec()),
            Ok(b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n".to_vec()),
        ];
        let state = SseState {
            bytes: futures::stream::iter(chunks).boxed(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };
        let deltas: Vec<String> = futures::stream::unfold(state, next_delta)
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hi ".to_string(), "there".to_string()]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        // "é" is C3 A9 and the emoji is F0 9F 8E 89; both straddle a chunk edge
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3".to_vec()),
            Ok(b"\xA9 \xF0\x9F".to_vec()),
            Ok(b"\x8E\x89\"}}]}\n\ndata: [DONE]\n\n".to_vec()),
        ];
        let state = SseState {
            bytes: futures::stream::iter(chunks).boxed(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };
        let deltas: Vec<Result<String>> = tokio_test::block_on(futures::stream::unfold(state, next_delta).collect());
        assert_eq!(deltas.len(), 1);
        let text = tokio_test::assert_ok!(deltas.into_iter().next().unwrap());
        assert_eq!(text, "café 🎉");
    }

    #[test]
    fn test_invalid_base_url_is_a_configuration_error() {
        let config = OpenAiConfig {
            base_url: "not a url".into(),
            ..OpenAiConfig::default()
        };
        assert!(matches!(OpenAiCompatModel::new(&config), Err(MuseError::Configuration(_))));
    }

    #[test]
    fn test_search_citations_from_both_shapes() {
        let sonar = json!({
            "choices": [{"message": {"content": "Reels under 30s perform best."}}],
            "citations": ["https://a.example/reels", "https://b.example/data"],
        });
        let result = parse_search_response(&sonar).unwrap();
        assert_eq!(result.text, "Reels under 30s perform best.");
        assert_eq!(result.citations, vec!["https://a.example/reels", "https://b.example/data"]);

        let annotated = json!({
            "choices": [{"message": {
                "content": "Carousels get saved more.",
                "annotations": [
                    {"type": "url_citation", "url_citation": {"url": "https://c.example/"}},
                    {"type": "url_citation", "url_citation": {"url": "https://c.example/"}},
                ],
            }}],
        });
        let result = parse_search_response(&annotated).unwrap();
        assert_eq!(result.citations, vec!["https://c.example/"]);

        let empty = json!({"choices": [{"message": {}}]});
        assert!(matches!(parse_search_response(&empty), Err(MuseError::Provider { .. })));
    }

    #[test]
    fn test_search_body_carries_filters_and_context() {
        let config = OpenAiConfig {
            search_model: Some("sonar".into()),
            ..OpenAiConfig::default()
        };
        let search = OpenAiSearch::from_config(&config).unwrap().unwrap();
        let body = search.body(&SearchRequest {
            query: "instagram reel trends".into(),
            recency: Some(crate::providers::Recency::Week),
            domains: vec!["later.com".into()],
            system_context: Some("Fitness creator research".into()),
        });
        assert_eq!(body["model"], "sonar");
        assert_eq!(body["messages"][0]["content"], "Fitness creator research");
        let query = body["messages"][1]["content"].as_str().unwrap();
        assert!(query.starts_with("instagram reel trends"));
        assert!(query.contains("past week"));
        assert!(query.contains("later.com"));

        assert!(OpenAiSearch::from_config(&OpenAiConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_request_body_carries_options() {
        let model = OpenAiCompatModel::new(&OpenAiConfig::default()).unwrap();
        let body = model.body(&[ChatMessage::user("hi")], &CompletionOptions::json().with_max_tokens(50), false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 50);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], false);
    }
}
