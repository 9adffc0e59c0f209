//! One open conversation: history, live connection, send pipeline and
//! typing state, created when a peer or thread is selected and torn down
//! when the selection changes.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use portal_shared::{DeliveryState, Message, Room};

use crate::backend::MessageBackend;
use crate::config::ChatConfig;
use crate::connection::{ChatEvent, ConnectionHandle, ConnectionManager, ConnectionState, EventStream};
use crate::error::{BackendError, ChatError, Result};
use crate::pipeline::{PendingSend, SendPipeline};
use crate::presence::TypingNotifier;
use crate::state::{Notice, SessionState, SharedState};
use crate::store::MessageStore;
use crate::transport::Connector;

/// What the view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub messages: Vec<Message>,
    /// `false` disables the compose control.
    pub online: bool,
    pub connection: ConnectionState,
    pub peer_typing: bool,
    pub banner: Option<String>,
}

pub struct ChatSession<B: MessageBackend, C: Connector> {
    room: Room,
    backend: Arc<B>,
    shared: Arc<SharedState>,
    connection: ConnectionManager<C>,
    handle: ConnectionHandle,
    pipeline: SendPipeline<B>,
    typing: TypingNotifier,
    pump: Option<JoinHandle<()>>,
}

impl<B: MessageBackend, C: Connector> ChatSession<B, C> {
    /// Load the history of `room`, connect, and start applying live events.
    pub async fn open(
        config: &ChatConfig,
        backend: Arc<B>,
        connector: Arc<C>,
        room: Room,
    ) -> Result<Self> {
        let store = MessageStore::with_reconcile_window(config.reconcile_window);
        let shared = Arc::new(SharedState::new(SessionState::new(&room, store)));

        match backend.fetch_history(&room).await {
            Ok(records) => {
                info!(room = %room, count = records.len(), "History loaded");
                shared.update(|s| s.store.load_history(records));
            }
            Err(BackendError::NotFound) => {
                debug!(room = %room, "No history yet");
            }
            Err(e) => {
                warn!(room = %room, error = %e, "Failed to load history");
                shared.update(|s| s.banner = Some(format!("Could not load messages: {e}")));
            }
        }

        let mut connection = ConnectionManager::new(connector, config.reconnect.clone());
        let events = connection
            .connect(room.clone())
            .ok_or_else(|| ChatError::Connection("Connection already open".into()))?;
        let handle = connection
            .handle()
            .ok_or_else(|| ChatError::Connection("Connection not running".into()))?;

        let pump = tokio::spawn(run_event_pump(
            room.clone(),
            shared.clone(),
            events,
            handle.watch_state(),
        ));

        let pipeline = SendPipeline::new(room.clone(), backend.clone(), shared.clone(), handle.clone());
        let typing = TypingNotifier::new(&room, config.typing_mode, config.typing_window);

        Ok(Self {
            room,
            backend,
            shared,
            connection,
            handle,
            pipeline,
            typing,
            pump: Some(pump),
        })
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn is_online(&self) -> bool {
        self.handle.is_online()
    }

    pub fn snapshot(&self) -> SessionView {
        let connection = self.handle.state();
        self.shared.read(|s| SessionView {
            messages: s.store.messages().to_vec(),
            online: connection.is_online(),
            connection,
            peer_typing: s.typing.is_peer_typing(),
            banner: s.banner.clone(),
        })
    }

    /// Revision counter, bumped on every change worth re-rendering.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.subscribe()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.shared.update(|s| s.notices.drain(..).collect())
    }

    pub fn dismiss_error(&self) {
        self.shared.update(|s| s.banner = None);
    }

    /// A clone of the send pipeline, for completing sends off the caller's task.
    pub fn pipeline(&self) -> SendPipeline<B> {
        self.pipeline.clone()
    }

    pub fn begin_send(&self, content: &str) -> Result<PendingSend> {
        self.pipeline.begin(content)
    }

    pub async fn complete_send(&self, pending: PendingSend) -> Result<Message> {
        self.pipeline.complete(pending).await
    }

    pub async fn send(&self, content: &str) -> Result<Message> {
        self.pipeline.send(content).await
    }

    pub fn notify_typing(&mut self) {
        self.typing.notify_typing(&self.handle);
    }

    /// Tell the backend the local user has seen the conversation.
    pub async fn mark_seen(&self) -> Result<()> {
        if let Err(e) = self.backend.mark_seen(&self.room).await {
            warn!(room = %self.room, error = %e, "Failed to mark messages seen");
            return Err(e.into());
        }
        let changed = self
            .shared
            .update(|s| s.store.mark_incoming_seen(self.room.local()));
        debug!(room = %self.room, changed, "Marked messages seen");
        Ok(())
    }

    /// Start a new reconnect cycle after the connection gave up.
    pub fn retry_connection(&self) {
        info!(room = %self.room, "Manual reconnect requested");
        self.handle.retry();
    }

    /// Disconnect and stop applying events. Also runs on drop.
    pub fn close(&mut self) {
        self.typing.reset();
        self.connection.disconnect();
        if let Some(pump) = self.pump.take() {
            pump.abort();
            self.shared.update(|s| s.typing.reset());
            info!(room = %self.room, "Session closed");
        }
    }
}

impl<B: MessageBackend, C: Connector> Drop for ChatSession<B, C> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_event_pump(
    room: Room,
    shared: Arc<SharedState>,
    mut events: EventStream,
    mut state_rx: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => shared.update(|s| apply_event(&room, s, event)),
                None => break,
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                shared.touch();
            }
        }
    }
    debug!(room = %room, "Event pump finished");
}

/// Apply one live event to the conversation state.
pub fn apply_event(room: &Room, state: &mut SessionState, event: ChatEvent) {
    match event {
        ChatEvent::Message(message) => {
            if !room.involves(&message) {
                debug!(room = %room, sender = %message.sender_id, "Ignoring message for another conversation");
                return;
            }
            let outcome = state.store.append(message);
            debug!(room = %room, outcome = ?outcome, "Live message applied");
        }
        ChatEvent::Typing(signal) => {
            state.typing.on_typing(&signal);
        }
        ChatEvent::StopTyping(signal) => {
            state.typing.on_stop_typing(&signal);
        }
        ChatEvent::Delivered(id) => {
            state.store.update_delivery_state(&id, DeliveryState::Delivered);
        }
        ChatEvent::Seen(id) => {
            state.store.update_delivery_state(&id, DeliveryState::Seen);
        }
        ChatEvent::ConnectionChanged(online) => {
            info!(room = %room, online, "Connection changed");
            if !online {
                state.typing.reset();
            }
        }
    }
}
