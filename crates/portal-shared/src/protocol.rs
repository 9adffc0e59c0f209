use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::Message;
use crate::types::{MessageId, Room, ThreadId, UserId};

/// Sender plus target of a room-scoped signal.
///
/// Exactly one of `receiver_id` / `thread_id` is set for a well-formed
/// signal; inbound signals from older backends may omit both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
}

impl Endpoints {
    /// Endpoints of a signal sent by the local user of `room`.
    pub fn from_room(room: &Room) -> Self {
        Self {
            sender_id: room.local().clone(),
            receiver_id: room.peer().cloned(),
            thread_id: room.thread_id().cloned(),
        }
    }
}

/// Room-join payload.
pub type RoomJoin = Endpoints;

/// Typing / stop-typing payload.
pub type TypingSignal = Endpoints;

/// Payload of `messageDelivered` / `messageSeen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
}

/// Events emitted *to* the live socket.
///
/// Encoded as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join the room of a direct pairing or a thread.
    Join(RoomJoin),
    /// Fan a confirmed message out to the other connected viewers.
    NewMessage(Message),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
}

/// Events received *from* the live socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    MessageDelivered(DeliveryReceipt),
    MessageSeen(DeliveryReceipt),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::NewMessage(_) => "newMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
