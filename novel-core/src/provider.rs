//! Collaborator seams: text generation and semantic retrieval.
//!
//! The engine only ever talks to these traits. Concrete clients are
//! constructed by the caller and injected, so tests swap in the fakes from
//! [`crate::testing`] without any process-wide state.

use async_trait::async_trait;
use claude::Claude;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Errors reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unusable response: {0}")]
    InvalidResponse(String),

    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl From<claude::Error> for ProviderError {
    fn from(e: claude::Error) -> Self {
        match e {
            claude::Error::NoApiKey | claude::Error::Config(_) => {
                ProviderError::NotConfigured(e.to_string())
            }
            claude::Error::Parse(_) => ProviderError::InvalidResponse(e.to_string()),
            claude::Error::Stream(_) => ProviderError::Stream(e.to_string()),
            claude::Error::Network(_) | claude::Error::Api { .. } => {
                ProviderError::Request(e.to_string())
            }
        }
    }
}

/// Who wrote a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// A structured generation instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl GenerationRequest {
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self {
            model: None,
            system: None,
            messages,
            temperature: 0.8,
            max_tokens: 4096,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// All message text, concatenated. Handy for assertions and logging.
    pub fn transcript(&self) -> String {
        let mut out = self.system.clone().unwrap_or_default();
        for message in &self.messages {
            out.push('\n');
            out.push_str(&message.content);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Result of a blocking generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub content: String,
    pub usage: TokenUsage,
}

/// Ordered, finite, non-restartable sequence of generated text chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A generative-text provider.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the whole reply in one call.
    async fn generate(&self, request: GenerationRequest) -> Result<Generated, ProviderError>;

    /// Generate the reply as an ordered stream of text chunks.
    async fn stream(&self, request: GenerationRequest) -> Result<ChunkStream, ProviderError>;
}

/// Health of a retrieval index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHealth {
    pub healthy: bool,
    pub detail: String,
}

/// A semantic retrieval service.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Index a document, returning its id in the service.
    async fn upload(&self, content: &str, description: &str) -> Result<String, ProviderError>;

    /// Ask the index about `text`, returning its synthesized answer.
    async fn query(&self, text: &str, mode: &str) -> Result<String, ProviderError>;

    async fn health(&self) -> Result<IndexHealth, ProviderError>;
}

fn to_claude_request(request: GenerationRequest) -> claude::Request {
    let messages = request
        .messages
        .into_iter()
        .map(|m| match m.role {
            PromptRole::User => claude::Message::user(m.content),
            PromptRole::Assistant => claude::Message::assistant(m.content),
        })
        .collect();

    let mut out = claude::Request::new(messages)
        .with_max_tokens(request.max_tokens)
        .with_temperature(request.temperature);
    if let Some(system) = request.system {
        out = out.with_system(system);
    }
    if let Some(model) = request.model {
        out = out.with_model(model);
    }
    out
}

#[async_trait]
impl Generator for Claude {
    async fn generate(&self, request: GenerationRequest) -> Result<Generated, ProviderError> {
        let response = self.complete(to_claude_request(request)).await?;
        Ok(Generated {
            content: response.text,
            usage: TokenUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkStream, ProviderError> {
        let text = self.stream_text(to_claude_request(request)).await?;
        Ok(Box::pin(text.map(|chunk| chunk.map_err(ProviderError::from))))
    }
}
