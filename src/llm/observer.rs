//! Hooks invoked around each generation call.
//!
//! Observers are optional. The generator calls [`GenerationObserver::on_start`]
//! right before the remote request and [`GenerationObserver::on_end`] right
//! after it, with the same [`RunRecord`]. Observers cannot change the outcome.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::GenerationError;

/// Identity and input of one generation call.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Fresh UUID v4 per call.
    pub run_id: String,
    /// Session the call was made for, if any.
    pub session_id: Option<String>,
    /// The user input being answered.
    pub input: String,
    pub started_at: DateTime<Utc>,
}

/// How a generation call ended.
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome<'a> {
    Completed { reply: &'a str },
    Failed { error: &'a GenerationError },
}

impl RunOutcome<'_> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Observer notified around each generation call.
pub trait GenerationObserver: Send + Sync {
    fn on_start(&self, run: &RunRecord);
    fn on_end(&self, run: &RunRecord, outcome: &RunOutcome<'_>);
}

/// Emits one structured log event per hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl GenerationObserver for LogObserver {
    fn on_start(&self, run: &RunRecord) {
        tracing::info!(
            name: "generation.start",
            run_id = %run.run_id,
            session_id = ?run.session_id,
            input_length = run.input.len(),
            "Generation started"
        );
    }

    fn on_end(&self, run: &RunRecord, outcome: &RunOutcome<'_>) {
        let elapsed_ms = (Utc::now() - run.started_at).num_milliseconds();
        match outcome {
            RunOutcome::Completed { reply } => tracing::info!(
                name: "generation.end",
                run_id = %run.run_id,
                elapsed_ms,
                reply_length = reply.len(),
                "Generation completed"
            ),
            RunOutcome::Failed { error } => tracing::warn!(
                name: "generation.failed",
                run_id = %run.run_id,
                elapsed_ms,
                kind = error.kind(),
                error = %error,
                "Generation failed"
            ),
        }
    }
}

/// Reports runs to a remote run-tracing service (LangSmith-compatible).
///
/// `on_start` posts the run to `{endpoint}/runs`; `on_end` patches
/// `{endpoint}/runs/{run_id}` with the outputs once the start report has been
/// sent. Reports run as background tasks on the current tokio runtime and
/// their failures are only logged.
pub struct RunTracer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    project: String,
    pending_starts: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl std::fmt::Debug for RunTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTracer")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl RunTracer {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            project: project.into(),
            pending_starts: Mutex::new(HashMap::new()),
        }
    }

    fn spawn_report(
        handle: &Handle,
        request: reqwest::RequestBuilder,
        run_id: String,
        phase: &'static str,
        after: Option<JoinHandle<()>>,
    ) -> JoinHandle<()> {
        handle.spawn(async move {
            if let Some(start) = after {
                let _ = start.await;
            }
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::trace!(run_id = %run_id, phase, "Run reported");
                }
                Ok(resp) => tracing::warn!(
                    run_id = %run_id,
                    phase,
                    status = %resp.status(),
                    "Run tracer rejected report"
                ),
                Err(e) => tracing::warn!(
                    run_id = %run_id,
                    phase,
                    error = %e,
                    "Run tracer unreachable"
                ),
            }
        })
    }

    pub(crate) fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.pending_starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl GenerationObserver for RunTracer {
    fn on_start(&self, run: &RunRecord) {
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!(run_id = %run.run_id, "No runtime; skipping run report");
            return;
        };

        let body = json!({
            "id": run.run_id,
            "name": "chat_generation",
            "run_type": "chain",
            "inputs": { "input": run.input },
            "start_time": run.started_at.to_rfc3339(),
            "session_name": self.project,
            "extra": { "metadata": { "session_id": run.session_id } },
        });
        let request = self
            .http
            .post(format!("{}/runs", self.endpoint))
            .header("x-api-key", &self.api_key)
            .json(&body);

        let task = Self::spawn_report(&handle, request, run.run_id.clone(), "start", None);
        self.pending().insert(run.run_id.clone(), task);
    }

    fn on_end(&self, run: &RunRecord, outcome: &RunOutcome<'_>) {
        let start = self.pending().remove(&run.run_id);
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let body = match outcome {
            RunOutcome::Completed { reply } => json!({
                "outputs": { "response": reply },
                "end_time": Utc::now().to_rfc3339(),
            }),
            RunOutcome::Failed { error } => json!({
                "error": error.to_string(),
                "end_time": Utc::now().to_rfc3339(),
            }),
        };
        let request = self
            .http
            .patch(format!("{}/runs/{}", self.endpoint, run.run_id))
            .header("x-api-key", &self.api_key)
            .json(&body);

        Self::spawn_report(&handle, request, run.run_id.clone(), "end", start);
    }
}
