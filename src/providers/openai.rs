//! `OpenAI`-compatible chat completions provider.

use super::{ProviderClient, ProviderError, ProviderFuture, ProviderRequest};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

const SYSTEM_PROMPT: &str = "You are one of several independent research sources. \
Answer the request factually and concisely. Do not speculate beyond the findings you are given.";

/// Client for any endpoint speaking the `OpenAI` chat completions protocol.
pub struct OpenAiCompatibleProvider {
    /// API key.
    api_key: Option<SecretString>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Token limit per response.
    max_tokens: u32,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Creates a client without an API key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            client: reqwest::Client::new(),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Reads the API key from an environment variable, if set.
    #[must_use]
    pub fn with_api_key_from_env(mut self, var: &str) -> Self {
        if let Ok(key) = std::env::var(var) {
            if !key.trim().is_empty() {
                self.api_key = Some(SecretString::from(key));
            }
        }
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_request(&self, request: &ProviderRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.render_prompt(),
                },
            ],
            max_tokens: self.max_tokens,
        }
    }

    async fn request(
        &self,
        request: &ProviderRequest,
        deadline: Instant,
    ) -> Result<serde_json::Value, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Unavailable("API key not configured".to_string()))?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProviderError::Timeout);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key.expose_secret())
            .timeout(remaining.max(Duration::from_millis(1)))
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;

        Ok(json!({
            "summary": content,
            "model": self.model,
        }))
    }
}

impl Default for OpenAiCompatibleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderClient for OpenAiCompatibleProvider {
    fn invoke<'a>(&'a self, request: &'a ProviderRequest, deadline: Instant) -> ProviderFuture<'a> {
        Box::pin(self.request(request, deadline))
    }

    fn kind(&self) -> &'static str {
        "openai"
    }
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

/// A message in the chat.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

/// A choice in the response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
