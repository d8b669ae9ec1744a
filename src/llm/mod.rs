//! LLM drivers and the response generator.
//!
//! This module provides protocol-agnostic abstractions for asking a hosted
//! Large Language Model for a reply, supporting both `OpenAI` Chat Completions
//! and Responses APIs.
//!
//! # Overview
//!
//! The [`LlmDriver`] trait performs one request/response exchange with the
//! provider. The [`ResponseGenerator`] trait is the boundary the chat layer
//! talks to; [`LlmGenerator`] implements it on top of a driver and notifies
//! any registered [`GenerationObserver`]s around each call.
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: `OpenAI` Chat Completions API (`/v1/chat/completions`)
//! - [`ResponsesDriver`]: `OpenAI` Responses API (`/v1/responses`)
//!
//! # Example
//!
//! ```rust,ignore
//! use postop_chat::llm::{LlmGenerator, LlmProtocol, LlmSettings, Provider};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: "sk-...".to_string(),
//!     model: "gpt-4".to_string(),
//!     temperature: 0.3,
//!     protocol: LlmProtocol::Chat,
//!     provider: Provider::OpenAI,
//!     system_prompt: None,
//! };
//! let generator = LlmGenerator::new(settings);
//! ```

pub mod chat_completions;
pub mod error;
pub mod generator;
pub mod observer;
pub mod provider;
pub mod responses;

pub use chat_completions::ChatCompletionsDriver;
pub use error::GenerationError;
pub use generator::{GenerationRequest, LlmGenerator, ResponseGenerator};
pub use observer::{GenerationObserver, LogObserver, RunOutcome, RunRecord, RunTracer};
pub use provider::Provider;
pub use responses::ResponsesDriver;

use crate::session::{Role, Turn};

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model identifier (e.g., `gpt-4`).
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Protocol to use for communication.
    pub protocol: LlmProtocol,
    /// Provider type (auto-detected from `base_url`).
    pub provider: Provider,
    /// Optional instructions sent ahead of the conversation.
    pub system_prompt: Option<String>,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("protocol", &self.protocol)
            .field("provider", &self.provider)
            .field("system_prompt", &self.system_prompt.as_ref().map(String::len))
            .finish()
    }
}

/// LLM protocol variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProtocol {
    /// Pick the protocol from the provider.
    #[default]
    Auto,
    /// `OpenAI` Responses API (`/v1/responses`).
    Responses,
    /// `OpenAI` Chat Completions API (`/v1/chat/completions`).
    Chat,
}

impl LlmProtocol {
    /// Parse a configured protocol name; unknown names fall back to `Auto`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "responses" => Self::Responses,
            "chat" => Self::Chat,
            _ => Self::Auto,
        }
    }
}

/// A message as sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role() {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        };
        Self {
            role,
            content: turn.content().to_string(),
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// Request to an LLM driver.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,
}

/// Trait for LLM request drivers.
///
/// A driver owns the wire format of one provider protocol and turns a list
/// of messages into the model's reply text.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Send the request and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if the request fails or the reply cannot
    /// be understood.
    async fn complete(&self, req: LlmRequest) -> Result<String, GenerationError>;
}

/// Build the driver for the configured protocol.
#[must_use]
pub fn driver_for(settings: &LlmSettings) -> std::sync::Arc<dyn LlmDriver> {
    match settings.protocol {
        LlmProtocol::Responses => std::sync::Arc::new(ResponsesDriver::new(settings.clone())),
        // Chat Completions is supported by every OpenAI-compatible provider.
        LlmProtocol::Chat | LlmProtocol::Auto => {
            std::sync::Arc::new(ChatCompletionsDriver::new(settings.clone()))
        }
    }
}
