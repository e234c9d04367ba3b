//! Language model abstraction
//!
//! Provides a unified interface for chat-completion providers:
//! - OpenAI and OpenAI-compatible endpoints
//! - A scripted mock for tests and offline development
//!
//! Every pipeline stage that needs a model (query analysis, strategy
//! generation, scoring, synthesis, scrape summaries, chat) goes through
//! the `LanguageModel` trait.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_llm;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A chat completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the configured temperature
    pub temperature: Option<f32>,
    /// Overrides the configured max tokens
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// System instruction followed by a single user prompt
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// All message contents joined, used for matching in the mock
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait for chat completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce the assistant reply for a request
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI chat completions client
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl OpenAIChatModel {
    /// Create a new client from configuration
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    async fn make_request(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout {
                        operation: "llm completion".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::analysis(format!("LLM request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::analysis(format!("LLM API error {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::analysis(format!("Failed to parse LLM response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::analysis("Empty response from LLM"))
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let start = Instant::now();
        let result = self.make_request(request).await;
        record_llm(start.elapsed().as_secs_f64(), &self.model, result.is_ok());

        if let Err(e) = &result {
            tracing::warn!(model = %self.model, error = %e, "LLM completion failed");
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

enum MockReply {
    Text(String),
    Fail,
}

/// Scripted model for testing
///
/// Rules are checked in insertion order against the full request
/// transcript; the first rule whose needle appears wins.
pub struct MockLanguageModel {
    rules: Vec<(String, MockReply)>,
    default_reply: Option<String>,
    failures_before_success: AtomicUsize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: None,
            failures_before_success: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `reply` when the transcript contains `needle`
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), MockReply::Text(reply.into())));
        self
    }

    /// Fail when the transcript contains `needle`
    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), MockReply::Fail));
        self
    }

    /// Reply used when no rule matches; without one, unmatched calls fail
    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Fail the first `n` calls regardless of rules
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_before_success.store(n, Ordering::SeqCst);
        self
    }

    /// A model that fails every call
    pub fn unavailable() -> Self {
        Self::new()
    }

    /// Number of completed or failed calls
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Transcripts of every request received
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let transcript = request.transcript();
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(transcript.clone());
        }

        let pending = self.failures_before_success.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures_before_success.store(pending - 1, Ordering::SeqCst);
            return Err(AppError::analysis("mock model scripted failure"));
        }

        for (needle, reply) in &self.rules {
            if transcript.contains(needle.as_str()) {
                return match reply {
                    MockReply::Text(text) => Ok(text.clone()),
                    MockReply::Fail => Err(AppError::analysis("mock model rule failure")),
                };
            }
        }

        self.default_reply
            .clone()
            .ok_or_else(|| AppError::analysis("mock model has no reply"))
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

/// Create a language model based on configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIChatModel::new(key, config)?))
        }
        "mock" => Ok(Arc::new(
            MockLanguageModel::new().with_default("No language model configured."),
        )),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, using mock");
            Ok(Arc::new(
                MockLanguageModel::new().with_default("No language model configured."),
            ))
        }
    }
}

/// Slice out the first balanced-looking JSON object in a model reply
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
