use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 2;

/// Chat-completions client for OpenAI and OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    provider_name: String,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("provider_name", &self.provider_name)
            .finish()
    }
}

impl OpenAiProvider {
    /// Uses a plain client with no request timeout; callers that need one pass
    /// their own through [`with_client`](Self::with_client).
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, max_tokens: u32) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            max_tokens,
            temperature: None,
            provider_name: "openai".into(),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Report a different provider name, for compatible endpoints (Groq, vLLM, ...).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_request(&self, messages: &[Message]) -> Result<String, LlmError> {
        let api_messages: Vec<ApiMessage<'_>> = messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let url = format!("{}/chat/completions", self.base_url);

        let response = send_with_retry(&self.provider_name, MAX_RETRIES, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(LlmError::Unavailable);
        }

        if !status.is_success() {
            tracing::error!(provider = %self.provider_name, "chat API error {status}: {text}");
            return Err(LlmError::Other(format!(
                "{} API request failed (status {status})",
                self.provider_name
            )));
        }

        let resp: ChatResponse = serde_json::from_str(&text)?;

        if let Some(usage) = resp.usage {
            tracing::debug!(
                provider = %self.provider_name,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat API usage"
            );
        }

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: self.provider_name.clone(),
            })
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.send_request(messages).await
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
