//! OpenAI Responses API driver.
//!
//! This module implements the [`LlmDriver`] trait for the OpenAI Responses
//! API (`/v1/responses`).

use serde::Deserialize;

use super::{GenerationError, LlmDriver, LlmRequest, LlmSettings};

#[derive(Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesReply {
    /// Concatenated text of every `output_text` part of every message item.
    fn text(self) -> Option<String> {
        if let Some(text) = self.output_text.filter(|t| !t.is_empty()) {
            return Some(text);
        }

        let text: String = self
            .output
            .into_iter()
            .filter(|item| item.item_type == "message")
            .flat_map(|item| item.content)
            .filter(|part| part.content_type == "output_text")
            .filter_map(|part| part.text)
            .collect();

        (!text.trim().is_empty()).then_some(text)
    }
}

/// Driver for the OpenAI Responses API.
#[derive(Clone)]
pub struct ResponsesDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ResponsesDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponsesDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ResponsesDriver {
    /// Create a new Responses driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl LlmDriver for ResponsesDriver {
    async fn complete(&self, req: LlmRequest) -> Result<String, GenerationError> {
        let url = self
            .settings
            .provider
            .build_responses_url(&self.settings.base_url);

        let body = serde_json::json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "stream": false,
            "input": req.messages,
        });

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count = req.messages.len(),
            "Sending responses request"
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

        let reply: ResponsesReply = serde_json::from_str(&text)?;
        reply
            .text()
            .ok_or_else(|| GenerationError::MalformedResponse("response has no output text".into()))
    }
}
