//! Capability gateway backed by an Ollama-compatible chat endpoint.
//!
//! Every stage is a single non-streaming `/api/chat` call asking for JSON
//! output. The reply content is parsed and checked against the stage's
//! output schema before it is handed back to the runner.

use crate::config::CapabilityConfig;
use crate::error::CapabilityError;
use crate::gateway::prompts;
use crate::gateway::schema::OutputSchema;
use crate::gateway::CapabilityGateway;
use crate::models::StageName;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for the Ollama gateway.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::from(&CapabilityConfig::default())
    }
}

impl From<&CapabilityConfig> for OllamaConfig {
    fn from(config: &CapabilityConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_name: config.model.clone(),
            temperature: config.temperature,
            timeout_seconds: config.request_timeout_seconds,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    format: &'static str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Gateway that calls an Ollama server.
pub struct OllamaGateway {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaGateway {
    pub fn new(config: OllamaConfig) -> Result<Self, CapabilityError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| CapabilityError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> CapabilityError {
        if e.is_timeout() {
            CapabilityError::Timeout(Duration::from_secs(self.config.timeout_seconds))
        } else if e.is_connect() {
            CapabilityError::Unavailable(format!(
                "cannot connect to Ollama at {}. Is Ollama running?",
                self.config.base_url
            ))
        } else {
            CapabilityError::Unavailable(format!("failed to send request: {}", e))
        }
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, CapabilityError> {
        let url = format!("{}/api/chat", self.config.base_url);

        let request = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages,
            format: "json",
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CapabilityError::Timeout(Duration::from_secs(self.config.timeout_seconds))
            } else {
                CapabilityError::MalformedResponse(format!("invalid Ollama envelope: {}", e))
            }
        })?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl CapabilityGateway for OllamaGateway {
    fn name(&self) -> &str {
        &self.config.model_name
    }

    async fn invoke(
        &self,
        stage: StageName,
        input: &Value,
        schema: &OutputSchema,
    ) -> Result<Value, CapabilityError> {
        debug!(stage = %stage, model = %self.config.model_name, "Sending capability request");

        let messages = vec![
            ChatMessage::new("system", prompts::system_prompt(stage)),
            ChatMessage::new("user", prompts::user_prompt(input, schema)),
        ];

        let content = self.chat(messages).await?;
        let value = parse_json_content(&content)?;

        schema.validate(&value).map_err(|reason| {
            warn!(stage = %stage, %reason, "Capability response failed schema validation");
            CapabilityError::MalformedResponse(reason)
        })?;

        Ok(value)
    }

    async fn health(&self) -> Result<(), CapabilityError> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_status(status, ""))
        }
    }
}

/// Map a non-success HTTP status to a capability error.
fn classify_status(status: StatusCode, body: &str) -> CapabilityError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CapabilityError::Unavailable(format!("authentication rejected ({})", status))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            CapabilityError::Unavailable(format!("rate limited ({})", status))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            CapabilityError::Unavailable(format!("upstream timed out ({})", status))
        }
        _ => CapabilityError::Unavailable(format!("Ollama API error {}: {}", status, body.trim())),
    }
}

/// Parse the model's reply, tolerating a fenced ```json block.
fn parse_json_content(content: &str) -> Result<Value, CapabilityError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body)
        .map_err(|e| CapabilityError::MalformedResponse(format!("response is not JSON: {}", e)))
}
