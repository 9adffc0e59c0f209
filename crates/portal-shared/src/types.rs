use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::TEMPORARY_ID_PREFIX;
use crate::message::Message;

// Portal user identity, as issued by the REST backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a ticket thread (group conversation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identity. Only confirmed messages carry one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated identity of a provisional message.
///
/// Sent along with the persistence request so the backend can echo it back
/// and the confirmed record can replace the provisional one exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TemporaryId(pub String);

impl TemporaryId {
    pub fn new() -> Self {
        Self(format!("{TEMPORARY_ID_PREFIX}{}", Uuid::new_v4()))
    }
}

impl Default for TemporaryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TemporaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The conversation a session is opened for: a direct pairing of the local
/// user with one peer, or the local user's view of a ticket thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Direct { local: UserId, peer: UserId },
    Thread { local: UserId, thread: ThreadId },
}

impl Room {
    pub fn direct(local: UserId, peer: UserId) -> Self {
        Self::Direct { local, peer }
    }

    pub fn thread(local: UserId, thread: ThreadId) -> Self {
        Self::Thread { local, thread }
    }

    pub fn local(&self) -> &UserId {
        match self {
            Self::Direct { local, .. } | Self::Thread { local, .. } => local,
        }
    }

    pub fn peer(&self) -> Option<&UserId> {
        match self {
            Self::Direct { peer, .. } => Some(peer),
            Self::Thread { .. } => None,
        }
    }

    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::Direct { .. } => None,
            Self::Thread { thread, .. } => Some(thread),
        }
    }

    /// Whether `message` belongs to this conversation.
    pub fn involves(&self, message: &Message) -> bool {
        match self {
            Self::Direct { local, peer } => {
                let receiver = message.receiver_id.as_ref();
                (message.sender_id == *local && receiver == Some(peer))
                    || (message.sender_id == *peer && receiver == Some(local))
            }
            Self::Thread { thread, .. } => message.thread_id.as_ref() == Some(thread),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> String {
        match self {
            Self::Direct { local, peer } => format!("{local}<->{peer}"),
            Self::Thread { thread, .. } => format!("thread:{thread}"),
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}
