//! One user→assistant round trip.
//!
//! [`ChatService::submit`] appends the user turn, asks the
//! [`ResponseGenerator`] for a reply, and appends the reply as the assistant
//! turn. A failed generation still produces an assistant turn, rendered with
//! [`render_error`], so every user turn is paired with exactly one reply.

use std::sync::Arc;

use thiserror::Error;

use crate::llm::{GenerationError, GenerationRequest, ResponseGenerator};
use crate::session::{Session, Turn};

/// Prefix of assistant turns that report a failed generation.
pub const ERROR_PREFIX: &str = "Error: ";

/// Render a generation failure as assistant-turn text.
#[must_use]
pub fn render_error(error: &GenerationError) -> String {
    format!("{ERROR_PREFIX}{error}")
}

/// Why a submitted message produced no exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyInput,

    /// The round-trip task died before producing a reply.
    #[error("round trip interrupted: {0}")]
    Interrupted(String),
}

/// Result of one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// The assistant turn that was appended.
    pub reply: Turn,
    /// The generation failure, when `reply` is a rendered error.
    pub failure: Option<GenerationError>,
}

/// Drives round trips between sessions and a response generator.
#[derive(Clone)]
pub struct ChatService {
    generator: Arc<dyn ResponseGenerator>,
    include_history: bool,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("include_history", &self.include_history)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    /// Create a service that sends prior turns as context.
    #[must_use]
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self {
            generator,
            include_history: true,
        }
    }

    /// Choose whether prior turns are sent with each input.
    #[must_use]
    pub fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }

    /// Run one round trip on `session`.
    ///
    /// The round trip runs on its own task, so it completes even when the
    /// caller stops waiting: the user turn is always followed by its reply.
    /// Concurrent calls on the same session are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyInput`] for blank input; the session is left
    /// unchanged. Returns [`ChatError::Interrupted`] when the round-trip task
    /// panicked.
    pub async fn submit(&self, session: &Session, input: &str) -> Result<Exchange, ChatError> {
        if input.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let session = session.clone();
        let generator = Arc::clone(&self.generator);
        let include_history = self.include_history;
        let input = input.to_string();

        tokio::spawn(async move {
            round_trip(&session, generator.as_ref(), include_history, &input).await
        })
        .await
        .map_err(|e| ChatError::Interrupted(e.to_string()))
    }
}

async fn round_trip(
    session: &Session,
    generator: &dyn ResponseGenerator,
    include_history: bool,
    input: &str,
) -> Exchange {
    let _round_trip = session.begin_round_trip().await;

    let history = if include_history {
        session.turns()
    } else {
        Vec::new()
    };
    session.append(Turn::user(input));

    let request = GenerationRequest {
        session_id: Some(session.id()),
        input,
        history: &history,
    };

    let exchange = match generator.generate(request).await {
        Ok(text) => Exchange {
            reply: Turn::assistant(text),
            failure: None,
        },
        Err(error) => {
            tracing::warn!(
                session_id = %session.id(),
                kind = error.kind(),
                error = %error,
                "Generation failed; replying with error text"
            );
            Exchange {
                reply: Turn::assistant(render_error(&error)),
                failure: Some(error),
            }
        }
    };

    session.append(exchange.reply.clone());
    tracing::debug!(
        session_id = %session.id(),
        turn_count = session.len(),
        failed = exchange.failure.is_some(),
        "Round trip complete"
    );

    exchange
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::llm::{LlmDriver, LlmGenerator, LlmRequest, RunTracer};
    use crate::session::{Role, SessionStore};

    struct EchoGenerator;

    #[async_trait::async_trait]
    impl ResponseGenerator for EchoGenerator {
        async fn generate(
            &self,
            request: GenerationRequest<'_>,
        ) -> Result<String, GenerationError> {
            Ok(request.input.to_string())
        }
    }

    /// Fails for input "X", echoes everything else.
    struct FailOnX;

    #[async_trait::async_trait]
    impl ResponseGenerator for FailOnX {
        async fn generate(
            &self,
            request: GenerationRequest<'_>,
        ) -> Result<String, GenerationError> {
            if request.input == "X" {
                Err(GenerationError::Network("connection refused".to_string()))
            } else {
                Ok(request.input.to_string())
            }
        }
    }

    #[derive(Default)]
    struct HistoryProbe {
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait::async_trait]
    impl ResponseGenerator for HistoryProbe {
        async fn generate(
            &self,
            request: GenerationRequest<'_>,
        ) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(request.history.to_vec());
            Ok(format!("reply to {}", request.input))
        }
    }

    /// Sleeps so concurrent submissions would interleave without the lock.
    struct SlowEcho(Duration);

    #[async_trait::async_trait]
    impl ResponseGenerator for SlowEcho {
        async fn generate(
            &self,
            request: GenerationRequest<'_>,
        ) -> Result<String, GenerationError> {
            tokio::time::sleep(self.0).await;
            Ok(request.input.to_string())
        }
    }

    struct SlowDriver;

    #[async_trait::async_trait]
    impl LlmDriver for SlowDriver {
        async fn complete(&self, _req: LlmRequest) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("done".to_string())
        }
    }

    fn assert_paired(turns: &[Turn]) {
        assert_eq!(turns.len() % 2, 0, "unpaired turns: {turns:?}");
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role(), Role::User);
            assert_eq!(pair[1].role(), Role::Assistant);
        }
    }

    #[tokio::test]
    async fn test_echo_hello() {
        let store = SessionStore::new();
        let session = store.start();
        let chat = ChatService::new(Arc::new(EchoGenerator));

        let exchange = chat.submit(&session, "Hello").await.unwrap();

        assert_eq!(exchange.reply, Turn::assistant("Hello"));
        assert!(exchange.failure.is_none());
        assert_eq!(
            session.turns(),
            vec![Turn::user("Hello"), Turn::assistant("Hello")]
        );
    }

    #[tokio::test]
    async fn test_failure_becomes_error_turn() {
        let session = SessionStore::new().start();
        let chat = ChatService::new(Arc::new(FailOnX));

        let exchange = chat.submit(&session, "X").await.unwrap();

        let last = session.last_turn().unwrap();
        assert_eq!(last.role(), Role::Assistant);
        assert!(last.content().starts_with("Error: "));
        assert_eq!(last.content(), "Error: network failure: connection refused");
        assert_eq!(exchange.failure.unwrap().kind(), "network");
        assert_eq!(session.len(), 2);
    }

    #[tokio::test]
    async fn test_n_inputs_produce_2n_turns() {
        let session = SessionStore::new().start();
        let chat = ChatService::new(Arc::new(FailOnX));
        let inputs = ["a", "X", "b", "X", "c"];

        for input in inputs {
            chat.submit(&session, input).await.unwrap();
        }

        let turns = session.turns();
        assert_eq!(turns.len(), 2 * inputs.len());
        for (pair, input) in turns.chunks(2).zip(inputs) {
            assert_eq!(pair[0], Turn::user(input));
            assert_eq!(pair[1].role(), Role::Assistant);
        }
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected_without_side_effects() {
        let session = SessionStore::new().start();
        let chat = ChatService::new(Arc::new(EchoGenerator));

        assert_eq!(chat.submit(&session, "  \n").await, Err(ChatError::EmptyInput));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_prior_turns_only() {
        let probe = Arc::new(HistoryProbe::default());
        let session = SessionStore::new().start();
        let chat = ChatService::new(probe.clone());

        chat.submit(&session, "one").await.unwrap();
        chat.submit(&session, "two").await.unwrap();

        let seen = probe.seen.lock().unwrap();
        assert!(seen[0].is_empty());
        assert_eq!(
            seen[1],
            vec![Turn::user("one"), Turn::assistant("reply to one")]
        );
    }

    #[tokio::test]
    async fn test_history_can_be_disabled() {
        let probe = Arc::new(HistoryProbe::default());
        let session = SessionStore::new().start();
        let chat = ChatService::new(probe.clone()).with_history(false);

        chat.submit(&session, "one").await.unwrap();
        chat.submit(&session, "two").await.unwrap();

        assert!(probe.seen.lock().unwrap().iter().all(Vec::is_empty));
        assert_eq!(session.len(), 4);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_history() {
        let probe = Arc::new(HistoryProbe::default());
        let store = SessionStore::new();
        let a = store.start();
        let b = store.start();
        let chat = ChatService::new(probe.clone());

        chat.submit(&a, "from a").await.unwrap();
        chat.submit(&b, "from b").await.unwrap();

        assert!(probe.seen.lock().unwrap()[1].is_empty());
        assert_eq!(a.turns()[0], Turn::user("from a"));
        assert_eq!(b.turns()[0], Turn::user("from b"));
    }

    #[tokio::test]
    async fn test_concurrent_submits_keep_pairs_together() {
        let session = SessionStore::new().start();
        let chat = ChatService::new(Arc::new(SlowEcho(Duration::from_millis(20))));

        let (first, second) = tokio::join!(
            chat.submit(&session, "first"),
            chat.submit(&session, "second")
        );
        first.unwrap();
        second.unwrap();

        let turns = session.turns();
        assert_eq!(turns.len(), 4);
        assert_paired(&turns);
        for pair in turns.chunks(2) {
            assert_eq!(pair[1], Turn::assistant(pair[0].content()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_still_appends_reply() {
        let session = SessionStore::new().start();
        let chat = ChatService::new(Arc::new(SlowEcho(Duration::from_millis(200))));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), chat.submit(&session, "first")).await;
        assert!(abandoned.is_err());

        chat.submit(&session, "second").await.unwrap();

        assert_eq!(
            session.turns(),
            vec![
                Turn::user("first"),
                Turn::assistant("first"),
                Turn::user("second"),
                Turn::assistant("second"),
            ]
        );
    }

    #[tokio::test]
    async fn test_abandoned_submit_closes_traced_run() {
        let tracer = Arc::new(RunTracer::new("http://127.0.0.1:9", "ls-key", "default"));
        let generator =
            LlmGenerator::with_driver(Arc::new(SlowDriver), None).with_observer(Arc::<RunTracer>::clone(&tracer));
        let chat = ChatService::new(Arc::new(generator));
        let session = SessionStore::new().start();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), chat.submit(&session, "first")).await;
        assert!(abandoned.is_err());

        chat.submit(&session, "second").await.unwrap();

        assert!(tracer.pending().is_empty());
        assert_paired(&session.turns());
        assert_eq!(session.len(), 4);
    }
}
