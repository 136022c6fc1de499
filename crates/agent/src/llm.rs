//! Chat-completion clients for the reasoning collaborator.
//!
//! Two wire formats cover every supported provider: the OpenAI-compatible
//! `chat/completions` endpoint (OpenAI, Groq, Ollama) and Anthropic's
//! `messages` endpoint.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use negotiator_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmRequest {
    pub fn new(
        system: impl Into<String>,
        user: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self { system: system.into(), user: user.into(), temperature, max_tokens }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("provider returned no content")]
    EmptyResponse,
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("client configuration: {0}")]
    Configuration(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::EmptyResponse => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Decode(_) | Self::Configuration(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder().timeout(timeout).build().map_err(LlmError::Transport)
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(LlmError::Status { status: status.as_u16(), message })
}

/// Client for any provider speaking the OpenAI chat-completions protocol.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout)?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::new(
            config.effective_base_url(),
            config.model.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": &request.system},
                {"role": "user", "content": &request.user}
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        debug!(endpoint = %self.endpoint, model = %self.model, "sending chat completion");
        let response = error_for_status(builder.send().await?).await?;
        let completion = response
            .json::<ChatCompletion>()
            .await
            .map_err(|error| LlmError::Decode(error.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Client for Anthropic's Messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl AnthropicClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout)?,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::Configuration("anthropic provider requires llm.api_key".to_string())
        })?;
        Self::new(
            config.effective_base_url(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": &request.system,
            "messages": [{"role": "user", "content": &request.user}],
        });

        debug!(endpoint = %self.endpoint, model = %self.model, "sending messages request");
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let message = response
            .json::<MessagesResponse>()
            .await
            .map_err(|error| LlmError::Decode(error.to_string()))?;

        let text = message
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::Anthropic => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        LlmProvider::OpenAi | LlmProvider::Groq | LlmProvider::Ollama => {
            Ok(Arc::new(OpenAiCompatibleClient::from_config(config)?))
        }
    }
}

enum ScriptedStep {
    Reply(String),
    Delayed(Duration, String),
    Fail(LlmError),
}

/// Replays a fixed script of replies, in order. Once the script runs out
/// every call fails with a 503.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(ScriptedStep::Reply(text.into()))
    }

    pub fn reply_after(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(ScriptedStep::Delayed(delay, text.into()))
    }

    pub fn fail(self, error: LlmError) -> Self {
        self.push(ScriptedStep::Fail(error))
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        match self.steps.lock() {
            Ok(steps) => steps.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn push(self, step: ScriptedStep) -> Self {
        match self.steps.lock() {
            Ok(mut steps) => steps.push_back(step),
            Err(poisoned) => poisoned.into_inner().push_back(step),
        }
        self
    }

    fn next_step(&self) -> Option<ScriptedStep> {
        match self.steps.lock() {
            Ok(mut steps) => steps.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }

        match self.next_step() {
            Some(ScriptedStep::Reply(text)) => Ok(text),
            Some(ScriptedStep::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(ScriptedStep::Fail(error)) => Err(error),
            None => Err(LlmError::Status {
                status: 503,
                message: "scripted replies exhausted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use negotiator_core::config::{LlmConfig, LlmProvider};

    use super::{
        build_client, AnthropicClient, LlmClient, LlmError, LlmRequest, OpenAiCompatibleClient,
        ScriptedLlmClient,
    };

    fn llm_config(provider: LlmProvider) -> LlmConfig {
        LlmConfig {
            enabled: true,
            provider,
            api_key: Some("test-key".to_string().into()),
            base_url: None,
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            retry_backoff_ms: 1,
            temperature: 0.0,
            compose_temperature: 0.3,
        }
    }

    #[test]
    fn openai_compatible_endpoint_uses_provider_base_url() {
        let client = OpenAiCompatibleClient::from_config(&llm_config(LlmProvider::Groq))
            .expect("groq client");
        assert_eq!(client.endpoint(), "https://api.groq.com/openai/v1/chat/completions");

        let client = OpenAiCompatibleClient::new(
            "http://localhost:11434/v1/",
            "llama3",
            None,
            Duration::from_secs(1),
        )
        .expect("ollama client");
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn anthropic_client_requires_api_key() {
        let mut config = llm_config(LlmProvider::Anthropic);
        config.api_key = None;
        let error = AnthropicClient::from_config(&config).err().expect("missing key must fail");
        assert!(matches!(error, LlmError::Configuration(_)));
        assert!(build_client(&llm_config(LlmProvider::Anthropic)).is_ok());
    }

    #[test]
    fn retryable_errors_are_transient_ones() {
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(LlmError::Status { status: 429, message: String::new() }.is_retryable());
        assert!(LlmError::Status { status: 502, message: String::new() }.is_retryable());
        assert!(!LlmError::Status { status: 401, message: String::new() }.is_retryable());
        assert!(!LlmError::Decode("bad json".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order_and_records_requests() {
        let client = ScriptedLlmClient::new()
            .reply("first")
            .fail(LlmError::EmptyResponse)
            .reply("third");
        let request = LlmRequest::new("system", "user", 0.0, 64);

        assert_eq!(client.complete(&request).await.expect("first"), "first");
        assert!(matches!(client.complete(&request).await, Err(LlmError::EmptyResponse)));
        assert_eq!(client.complete(&request).await.expect("third"), "third");
        assert!(matches!(
            client.complete(&request).await,
            Err(LlmError::Status { status: 503, .. })
        ));
        assert_eq!(client.requests().len(), 4);
        assert_eq!(client.remaining(), 0);
    }
}
