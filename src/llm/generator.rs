//! The response generator boundary.
//!
//! [`ResponseGenerator`] is the single capability the chat layer depends on:
//! turn an input (plus optional prior turns) into reply text or a typed
//! [`GenerationError`]. [`LlmGenerator`] backs it with a remote model call.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::observer::{GenerationObserver, RunOutcome, RunRecord};
use super::{GenerationError, LlmDriver, LlmRequest, LlmSettings, Message, driver_for};
use crate::session::Turn;

/// Input to one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Session the call is made for, used for observability only.
    pub session_id: Option<&'a str>,
    /// The new user input.
    pub input: &'a str,
    /// Turns preceding `input`, oldest first. Empty when the caller wants a
    /// stateless call.
    pub history: &'a [Turn],
}

impl<'a> GenerationRequest<'a> {
    /// A stateless request with no session and no history.
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            session_id: None,
            input,
            history: &[],
        }
    }
}

/// Maps conversation text to a reply.
#[async_trait::async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Produce the reply to `request.input`.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] describing why no reply was produced.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// Response generator backed by a hosted LLM.
///
/// Each call sends the optional system prompt, the supplied history, and the
/// new input to the driver. There is no retry, caching, or batching.
#[derive(Clone)]
pub struct LlmGenerator {
    driver: Arc<dyn LlmDriver>,
    system_prompt: Option<String>,
    observers: Vec<Arc<dyn GenerationObserver>>,
}

impl std::fmt::Debug for LlmGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGenerator")
            .field("system_prompt", &self.system_prompt.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl LlmGenerator {
    /// Create a generator using the driver for the configured protocol.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let driver = driver_for(&settings);
        Self::with_driver(driver, settings.system_prompt)
    }

    /// Create a generator over an explicit driver.
    #[must_use]
    pub fn with_driver(driver: Arc<dyn LlmDriver>, system_prompt: Option<String>) -> Self {
        Self {
            driver,
            system_prompt: system_prompt.filter(|p| !p.trim().is_empty()),
            observers: Vec::new(),
        }
    }

    /// Register an observer to be notified around every call.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn GenerationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn build_messages(&self, request: &GenerationRequest<'_>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend(request.history.iter().map(Message::from));
        messages.push(Message::user(request.input));
        messages
    }
}

#[async_trait::async_trait]
impl ResponseGenerator for LlmGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError> {
        let run = RunRecord {
            run_id: Uuid::new_v4().to_string(),
            session_id: request.session_id.map(ToString::to_string),
            input: request.input.to_string(),
            started_at: Utc::now(),
        };

        let messages = self.build_messages(&request);
        tracing::debug!(
            run_id = %run.run_id,
            message_count = messages.len(),
            history_turns = request.history.len(),
            "Built generation request"
        );

        for observer in &self.observers {
            observer.on_start(&run);
        }

        let result = self.driver.complete(LlmRequest { messages }).await;

        let outcome = match &result {
            Ok(reply) => RunOutcome::Completed { reply },
            Err(error) => RunOutcome::Failed { error },
        };
        for observer in &self.observers {
            observer.on_end(&run, &outcome);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Driver that records requests and replies from a script.
    struct ScriptedDriver {
        reply: Result<String, GenerationError>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedDriver {
        fn new(reply: Result<String, GenerationError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmDriver for ScriptedDriver {
        async fn complete(&self, req: LlmRequest) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(req);
            self.reply.clone()
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<(String, String)>>,
    }

    impl GenerationObserver for RecordingObserver {
        fn on_start(&self, run: &RunRecord) {
            self.events
                .lock()
                .unwrap()
                .push(("start".to_string(), run.run_id.clone()));
        }

        fn on_end(&self, run: &RunRecord, outcome: &RunOutcome<'_>) {
            let phase = if outcome.is_success() { "end" } else { "fail" };
            self.events
                .lock()
                .unwrap()
                .push((phase.to_string(), run.run_id.clone()));
        }
    }

    #[tokio::test]
    async fn test_messages_include_prompt_history_and_input() {
        let driver = ScriptedDriver::new(Ok("Take it easy.".to_string()));
        let generator = LlmGenerator::with_driver(driver.clone(), Some("Be kind.".to_string()));
        let history = vec![Turn::user("I had surgery"), Turn::assistant("How can I help?")];

        let reply = generator
            .generate(GenerationRequest {
                session_id: Some("s-1"),
                input: "Can I shower?",
                history: &history,
            })
            .await
            .unwrap();
        assert_eq!(reply, "Take it easy.");

        let seen = driver.seen.lock().unwrap();
        let messages = &seen[0].messages;
        assert_eq!(
            messages,
            &vec![
                Message::system("Be kind."),
                Message::from(&history[0]),
                Message::from(&history[1]),
                Message::user("Can I shower?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_stateless_request_sends_only_input() {
        let driver = ScriptedDriver::new(Ok("ok".to_string()));
        let generator = LlmGenerator::with_driver(driver.clone(), Some("   ".to_string()));

        generator
            .generate(GenerationRequest::new("hello"))
            .await
            .unwrap();

        let seen = driver.seen.lock().unwrap();
        assert_eq!(seen[0].messages, vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn test_observers_wrap_each_call() {
        let observer = Arc::new(RecordingObserver::default());
        let generator =
            LlmGenerator::with_driver(ScriptedDriver::new(Ok("fine".to_string())), None)
                .with_observer(observer.clone());

        generator.generate(GenerationRequest::new("a")).await.unwrap();
        generator.generate(GenerationRequest::new("b")).await.unwrap();

        let events = observer.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].0, "start");
        assert_eq!(events[1].0, "end");
        assert_eq!(events[0].1, events[1].1);
        assert_ne!(events[0].1, events[2].1);
    }

    #[tokio::test]
    async fn test_failure_is_returned_and_observed() {
        let observer = Arc::new(RecordingObserver::default());
        let error = GenerationError::Quota {
            message: "out of credits".to_string(),
        };
        let generator = LlmGenerator::with_driver(ScriptedDriver::new(Err(error.clone())), None)
            .with_observer(observer.clone());

        let result = generator.generate(GenerationRequest::new("x")).await;
        assert_eq!(result, Err(error));

        let events = observer.events.lock().unwrap();
        assert_eq!(events[1].0, "fail");
    }

    #[tokio::test]
    async fn test_observers_do_not_change_reply() {
        let plain = LlmGenerator::with_driver(ScriptedDriver::new(Ok("same".to_string())), None);
        let observed = plain
            .clone()
            .with_observer(Arc::new(crate::llm::LogObserver));

        let a = plain.generate(GenerationRequest::new("q")).await;
        let b = observed.generate(GenerationRequest::new("q")).await;
        assert_eq!(a, b);
    }
}
