//! The chat/ticket message record.
//!
//! A message is either *provisional* (known only to the sending client,
//! identified by its [`TemporaryId`]) or *confirmed* (persisted by the
//! backend, identified by its [`MessageId`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, Room, TemporaryId, ThreadId, UserId};

// ---------------------------------------------------------------------------
// DeliveryState
// ---------------------------------------------------------------------------

/// Delivery progression of a message. Ordered `Pending < Delivered < Seen`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    #[default]
    Pending,
    Delivered,
    Seen,
}

impl DeliveryState {
    /// Returns the later of the two states. Never moves backwards.
    pub fn advance(self, next: DeliveryState) -> DeliveryState {
        self.max(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One chat or ticket message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Backend identity; `None` while provisional.
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Client identity assigned at creation, echoed back by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_id: Option<TemporaryId>,
    pub sender_id: UserId,
    /// Set for direct conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    /// Set for ticket-thread conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub content: String,
    /// Client clock for provisional messages, server clock once confirmed.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Build a provisional `Pending` message sent by `sender` into `room`.
    pub fn provisional(
        temporary_id: TemporaryId,
        sender: UserId,
        room: &Room,
        content: String,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            temporary_id: Some(temporary_id),
            sender_id: sender,
            receiver_id: room.peer().cloned(),
            thread_id: room.thread_id().cloned(),
            content,
            created_at: issued_at,
            delivery_state: DeliveryState::Pending,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_none()
    }

    /// Ordering key of the message store: the server time once confirmed,
    /// the client issue time while provisional. Both live in `created_at`.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.created_at
    }
}
