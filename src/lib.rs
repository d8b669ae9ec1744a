//! Post-op care chat assistant
//!
//! A minimal web-embedded chat front-end that forwards user text to a hosted
//! LLM API and displays the conversation turn by turn.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server rendering the chat page and a JSON API
//! - **Chat**: One user→assistant round trip per submitted message
//! - **LLM**: Pluggable response generator over OpenAI-compatible drivers
//! - **Sessions**: In-memory, append-only turn history per browser session
//!
//! # Modules
//!
//! - [`chat`]: Round-trip driver and error rendering
//! - [`config`]: Layered configuration and startup secrets
//! - [`llm`]: Response generator, drivers, and observers
//! - [`page`]: HTML templates
//! - [`session`]: Turn history and session lifecycle

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unused_async)]

pub mod chat;
pub mod config;
pub mod llm;
pub mod page;
pub mod server;
pub mod session;
pub mod telemetry;

use std::sync::Arc;

use chat::ChatService;
use page::PageRenderer;
use session::SessionStore;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Live sessions.
    pub sessions: SessionStore,
    /// Round-trip driver over the response generator.
    pub chat: Arc<ChatService>,
    /// Chat page templates.
    pub pages: Arc<PageRenderer>,
}
