//! Session and conversation history management.
//!
//! This module provides in-memory session storage for the turn history of
//! each browser session. Sessions are identified by UUID, start empty, grow
//! only by appending, and are discarded when they end.
//!
//! # Architecture
//!
//! - [`Turn`]: One message, tagged with the [`Role`] that produced it
//! - [`Session`]: The ordered turn history of a single conversation
//! - [`SessionStore`]: Thread-safe registry of live sessions
//!
//! # Example
//!
//! ```rust
//! use postop_chat::session::{SessionStore, Turn};
//!
//! let store = SessionStore::new();
//! let session = store.start();
//! session.append(Turn::user("Hello!"));
//!
//! assert_eq!(session.turns(), vec![Turn::user("Hello!")]);
//! ```

mod thread;
mod turn;

pub use thread::{DEFAULT_IDLE_TIMEOUT, Session, SessionStore};
pub use turn::{Role, Turn};
