//! Client for the external text-generation backend.
//!
//! The backend speaks the OpenAI chat-completions protocol (LM Studio, llama.cpp server, vLLM,
//! OpenAI). One request is sent per question; there is no retry, and the whole call is bounded
//! by the configured timeout.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while calling the generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Backend unreachable, connection dropped, or the call timed out.
    #[error("Generation backend unreachable: {0}")]
    Transport(String),
    /// Backend answered with a non-success status.
    #[error("Generation backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Backend answered with a body that carries no answer.
    #[error("Malformed generation response: {0}")]
    Malformed(String),
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Fixed instruction.
    System,
    /// Question with retrieved context.
    User,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

/// Request handed to the generation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Conversation to complete (system instruction first).
    pub messages: Vec<ChatMessage>,
}

/// Interface implemented by generation backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Complete the conversation and return the answer text.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    http: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsClient {
    /// Build a client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        Self::new(
            config.generation_url.clone(),
            config.generation_model.clone(),
            config.generation_api_key.clone(),
            config.generation_temperature,
            config.generation_max_tokens,
            config.generation_timeout(),
        )
    }

    /// Build a client posting to the full endpoint `url`.
    pub fn new(
        url: String,
        model: String,
        api_key: Option<String>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("notesrag/generate")
            .timeout(timeout)
            .build()
            .map_err(|error| GenerationError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            url,
            model,
            api_key,
            temperature,
            max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[async_trait]
impl GenerationClient for ChatCompletionsClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut call = self.http.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(|error| {
            let cause = if error.is_timeout() {
                "request timed out".to_string()
            } else {
                error.to_string()
            };
            GenerationError::Transport(format!("{}: {cause}", self.url))
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let body: CompletionResponse = response.json().await.map_err(|error| {
            GenerationError::Malformed(format!("failed to decode completion: {error}"))
        })?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if answer.is_empty() {
            return Err(GenerationError::Malformed(
                "completion has no choices[0].message.content".into(),
            ));
        }
        Ok(answer)
    }
}
