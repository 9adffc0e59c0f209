//! # portal-shared
//!
//! Types shared between the portal chat client and its front-ends: endpoint
//! identifiers, the message record with its delivery state, and the JSON
//! events exchanged over the live socket.

pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use message::{DeliveryState, Message};
pub use protocol::{ClientEvent, DeliveryReceipt, Endpoints, RoomJoin, ServerEvent, TypingSignal};
pub use types::{MessageId, Room, TemporaryId, ThreadId, UserId};
