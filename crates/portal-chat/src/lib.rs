//! # portal-chat
//!
//! Real-time chat client core: a per-conversation message store with
//! optimistic sends, a live socket connection with automatic reconnect,
//! delivery receipts and typing presence.
//!
//! A front-end opens one [`ChatSession`] per selected conversation, renders
//! [`ChatSession::snapshot`] whenever [`ChatSession::subscribe`] signals a
//! change, and drops the session when the selection changes.

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod presence;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::{HttpBackend, MessageBackend};
pub use config::ChatConfig;
pub use connection::{ChatEvent, ConnectionState, ReconnectPolicy};
pub use error::{BackendError, ChatError, Result};
pub use pipeline::{PendingSend, SendPipeline};
pub use presence::TypingMode;
pub use session::{ChatSession, SessionView};
pub use state::Notice;
pub use store::MessageStore;
pub use transport::{Connector, WsConnector};
