//! Optimistic send pipeline.
//!
//! A send is split in two halves:
//!
//! 1. [`SendPipeline::begin`] validates the input and appends a provisional
//!    `Pending` record to the store, synchronously, before any I/O.
//! 2. [`SendPipeline::complete`] persists the message through the backend,
//!    then either reconciles the provisional record with the confirmed one
//!    (and fans it out over the socket) or rolls it back.
//!
//! Because every provisional record is keyed on its client issue time,
//! messages sent in quick succession keep their send order no matter in
//! which order the backend answers.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use portal_shared::{ClientEvent, Message, Room, TemporaryId};

use crate::backend::{MessageBackend, OutgoingMessage};
use crate::connection::ConnectionHandle;
use crate::error::{ChatError, Result};
use crate::state::{Notice, SharedState};

/// A provisional message waiting for its persistence call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub temporary_id: TemporaryId,
    pub message: Message,
}

pub struct SendPipeline<B: MessageBackend> {
    room: Room,
    backend: Arc<B>,
    shared: Arc<SharedState>,
    connection: ConnectionHandle,
    last_issued: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl<B: MessageBackend> Clone for SendPipeline<B> {
    fn clone(&self) -> Self {
        Self {
            room: self.room.clone(),
            backend: self.backend.clone(),
            shared: self.shared.clone(),
            connection: self.connection.clone(),
            last_issued: self.last_issued.clone(),
        }
    }
}

impl<B: MessageBackend> SendPipeline<B> {
    pub fn new(
        room: Room,
        backend: Arc<B>,
        shared: Arc<SharedState>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            room,
            backend,
            shared,
            connection,
            last_issued: Arc::new(Mutex::new(None)),
        }
    }

    /// Validate `content` and append it to the store as a provisional
    /// message. Makes no network call.
    pub fn begin(&self, content: &str) -> Result<PendingSend> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }
        if !self.connection.is_online() {
            debug!(room = %self.room, "Send rejected while offline");
            return Err(ChatError::Offline);
        }

        let temporary_id = TemporaryId::new();
        let message = Message::provisional(
            temporary_id.clone(),
            self.room.local().clone(),
            &self.room,
            content.to_string(),
            self.issue_time(),
        );

        self.shared.update(|s| s.store.append(message.clone()));
        debug!(temp_id = %temporary_id, room = %self.room, "Provisional message appended");

        Ok(PendingSend {
            temporary_id,
            message,
        })
    }

    /// Persist a provisional message and reconcile or roll it back.
    ///
    /// Returns the confirmed record on success. On failure the provisional
    /// record is gone from the store and a [`Notice::SendFailed`] is queued.
    pub async fn complete(&self, pending: PendingSend) -> Result<Message> {
        let request = OutgoingMessage::from_provisional(&pending.message);

        match self.backend.send_message(&request).await {
            Ok(confirmed) => {
                let outcome = self
                    .shared
                    .update(|s| s.store.reconcile(&pending.temporary_id, confirmed.clone()));
                info!(
                    temp_id = %pending.temporary_id,
                    msg_id = ?confirmed.id,
                    outcome = ?outcome,
                    "Message sent"
                );

                if let Err(e) = self.connection.emit(ClientEvent::NewMessage(confirmed.clone())) {
                    debug!(msg_id = ?confirmed.id, error = %e, "Skipped live fan-out");
                }
                Ok(confirmed)
            }
            Err(e) => {
                warn!(temp_id = %pending.temporary_id, error = %e, "Send failed, rolling back");
                self.shared.update(|s| {
                    s.store.remove_provisional(&pending.temporary_id);
                    s.notices.push_back(Notice::SendFailed {
                        temporary_id: pending.temporary_id.clone(),
                        content: pending.message.content.clone(),
                    });
                });
                Err(e.into())
            }
        }
    }

    pub async fn send(&self, content: &str) -> Result<Message> {
        let pending = self.begin(content)?;
        self.complete(pending).await
    }

    // Never earlier than the previous issue time, so a clock step backwards
    // cannot reorder two local sends.
    fn issue_time(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self.last_issued.lock().unwrap_or_else(|e| e.into_inner());
        let issued = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(issued);
        issued
    }
}
