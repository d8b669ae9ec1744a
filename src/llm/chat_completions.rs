//! OpenAI Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for the OpenAI Chat Completions
//! API (`/v1/chat/completions`). Requests are sent with `stream: false` and the
//! reply is read from the first choice.

use serde::{Deserialize, Serialize};

use super::{GenerationError, LlmDriver, LlmRequest, LlmSettings, Message};

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    temperature: f32,
    stream: bool,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Driver for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn complete(&self, req: LlmRequest) -> Result<String, GenerationError> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);

        let body = ChatCompletionBody {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            stream: false,
            messages: &req.messages,
        };

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count = req.messages.len(),
            "Sending chat completion request"
        );

        let rb = self.http.post(&url).json(&body);
        let resp = self
            .settings
            .provider
            .authorize(rb, &self.settings.api_key)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GenerationError::from_status(status, &text));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::MalformedResponse("response has no choices".into()))?
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::MalformedResponse("first choice has no text content".into())
            })?;

        Ok(content)
    }
}
