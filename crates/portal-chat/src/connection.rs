//! Live connection lifecycle with a tokio command/event channel pair.
//!
//! Each connection runs in its own task. The owner talks to it through a
//! [`ConnectionHandle`] (emit, retry) and consumes what it produces through
//! exactly one [`EventStream`]. Tearing the connection down ends the task
//! and with it the stream, so a stale subscriber can never keep receiving
//! events after the conversation changes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use portal_shared::constants::{
    CHANNEL_CAPACITY, RECONNECT_DELAY, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY,
};
use portal_shared::{ClientEvent, Message, MessageId, Room, RoomJoin, ServerEvent, TypingSignal};

use crate::error::{ChatError, Result};
use crate::transport::{Connector, SocketLink};

// ---------------------------------------------------------------------------
// Events / state
// ---------------------------------------------------------------------------

/// Events produced by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(Message),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    Delivered(MessageId),
    Seen(MessageId),
    /// `true` once the socket is up and the room joined, `false` on a drop.
    ConnectionChanged(bool),
}

impl From<ServerEvent> for ChatEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::NewMessage(message) => ChatEvent::Message(message),
            ServerEvent::Typing(signal) => ChatEvent::Typing(signal),
            ServerEvent::StopTyping(signal) => ChatEvent::StopTyping(signal),
            ServerEvent::MessageDelivered(receipt) => ChatEvent::Delivered(receipt.message_id),
            ServerEvent::MessageSeen(receipt) => ChatEvent::Seen(receipt.message_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts are exhausted; only [`ConnectionHandle::retry`]
    /// starts a new cycle.
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Capped exponential reconnect schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once the
    /// attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: RECONNECT_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// Commands sent *into* the connection task.
#[derive(Debug)]
enum ConnectionCommand {
    Emit(ClientEvent),
    Retry,
    Shutdown,
}

/// The single consumer side of a connection's events.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<ChatEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatEvent>> {
        self.rx.poll_recv(cx)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, clonable access to a running connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    room: Room,
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queue `event` for the socket. Fails with [`ChatError::Offline`] while
    /// the socket is down; nothing is buffered for later.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        if !self.is_online() {
            return Err(ChatError::Offline);
        }
        self.cmd_tx
            .try_send(ConnectionCommand::Emit(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ChatError::Connection("Command queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => ChatError::Offline,
            })
    }

    /// Start a new reconnect cycle after the connection gave up. A no-op
    /// while connected; skips the remaining backoff while reconnecting.
    pub fn retry(&self) {
        let _ = self.cmd_tx.try_send(ConnectionCommand::Retry);
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct ActiveConnection {
    handle: ConnectionHandle,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    task: JoinHandle<()>,
}

/// Owns at most one live connection, scoped to one room.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    active: Option<ActiveConnection>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: Arc<C>, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            policy,
            active: None,
        }
    }

    /// Open a connection for `room` and return its event stream.
    ///
    /// Returns `None` when a connection for the same room is already running
    /// (its stream stays the only one). A connection for another room is
    /// torn down first.
    pub fn connect(&mut self, room: Room) -> Option<EventStream> {
        if let Some(active) = &self.active {
            if active.handle.room == room && !active.task.is_finished() {
                debug!(room = %room, "Already connected, ignoring connect");
                return None;
            }
        }
        self.disconnect();

        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<ChatEvent>(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);

        let task = tokio::spawn(run_connection(
            self.connector.clone(),
            room.clone(),
            self.policy.clone(),
            cmd_rx,
            events_tx,
            state_tx.clone(),
        ));

        info!(room = %room, "Connection task spawned");

        self.active = Some(ActiveConnection {
            handle: ConnectionHandle {
                room,
                cmd_tx,
                state_rx,
            },
            state_tx,
            task,
        });

        Some(EventStream { rx: events_rx })
    }

    /// Close the connection, if any. Its event stream ends.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.handle.cmd_tx.try_send(ConnectionCommand::Shutdown);
            active.task.abort();
            active.state_tx.send_replace(ConnectionState::Closed);
            info!(room = %active.handle.room, "Disconnected");
        }
    }

    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.active.as_ref().map(|a| a.handle.clone())
    }

    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map(|a| a.handle.state())
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

enum Flow {
    Continue,
    Shutdown,
}

async fn run_connection<C: Connector>(
    connector: Arc<C>,
    room: Room,
    policy: ReconnectPolicy,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    events_tx: mpsc::Sender<ChatEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) {
    let mut attempt: u32 = 0;

    loop {
        let mut dropped = false;
        match connector.connect(&room).await {
            Ok(link) => {
                attempt = 0;
                let flow = drive_link(link, &room, &mut cmd_rx, &events_tx, &state_tx).await;
                if let Flow::Shutdown = flow {
                    break;
                }
                warn!(room = %room, "Connection dropped");
                dropped = true;
            }
            Err(e) => {
                warn!(room = %room, attempt, error = %e, "Connect failed");
            }
        }

        attempt += 1;
        let delay = policy.delay_for(attempt);
        state_tx.send_replace(match delay {
            Some(_) => ConnectionState::Reconnecting { attempt },
            None => ConnectionState::Failed,
        });
        if dropped {
            let _ = events_tx.send(ChatEvent::ConnectionChanged(false)).await;
        }

        let flow = match delay {
            Some(delay) => {
                info!(room = %room, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                backoff(delay, &mut cmd_rx).await
            }
            None => {
                warn!(room = %room, "Reconnect attempts exhausted, waiting for manual retry");
                let flow = wait_for_retry(&mut cmd_rx).await;
                attempt = 0;
                if let Flow::Continue = flow {
                    state_tx.send_replace(ConnectionState::Connecting);
                }
                flow
            }
        };

        if let Flow::Shutdown = flow {
            break;
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
    debug!(room = %room, "Connection task terminated");
}

/// Join the room over `link` and pump it until it drops (`Continue`) or
/// the owner shuts the connection down (`Shutdown`).
async fn drive_link(
    mut link: SocketLink,
    room: &Room,
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
    events_tx: &mpsc::Sender<ChatEvent>,
    state_tx: &watch::Sender<ConnectionState>,
) -> Flow {
    if link
        .outbound
        .send(ClientEvent::Join(RoomJoin::from_room(room)))
        .await
        .is_err()
    {
        return Flow::Continue;
    }

    state_tx.send_replace(ConnectionState::Connected);
    info!(room = %room, "Connected and joined room");
    let _ = events_tx.send(ChatEvent::ConnectionChanged(true)).await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::Emit(event)) => {
                        let name = event.name();
                        if link.outbound.send(event).await.is_err() {
                            debug!(event = name, "Socket closed while emitting");
                            break;
                        }
                    }
                    Some(ConnectionCommand::Retry) => {}
                    Some(ConnectionCommand::Shutdown) | None => return Flow::Shutdown,
                }
            }

            event = link.inbound.recv() => {
                match event {
                    Some(event) => {
                        let _ = events_tx.send(ChatEvent::from(event)).await;
                    }
                    None => break,
                }
            }
        }
    }

    Flow::Continue
}

async fn backoff(delay: Duration, cmd_rx: &mut mpsc::Receiver<ConnectionCommand>) -> Flow {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return Flow::Continue,
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnectionCommand::Emit(event)) => {
                    debug!(event = event.name(), "Offline, dropping emission");
                }
                Some(ConnectionCommand::Retry) => return Flow::Continue,
                Some(ConnectionCommand::Shutdown) | None => return Flow::Shutdown,
            },
        }
    }
}

async fn wait_for_retry(cmd_rx: &mut mpsc::Receiver<ConnectionCommand>) -> Flow {
    loop {
        match cmd_rx.recv().await {
            Some(ConnectionCommand::Emit(event)) => {
                debug!(event = event.name(), "Offline, dropping emission");
            }
            Some(ConnectionCommand::Retry) => return Flow::Continue,
            Some(ConnectionCommand::Shutdown) | None => return Flow::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use portal_shared::{DeliveryReceipt, UserId};
    use tokio::time::Instant;

    fn room() -> Room {
        Room::direct(UserId::new("alice"), UserId::new("bob"))
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            max_attempts,
        }
    }

    #[test]
    fn test_reconnect_policy_schedule() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), None);
        assert_eq!(p.delay_for(1), Some(Duration::from_secs(3)));
        assert_eq!(p.delay_for(2), Some(Duration::from_secs(6)));
        assert_eq!(p.delay_for(4), Some(Duration::from_secs(24)));
        assert_eq!(p.delay_for(5), Some(Duration::from_secs(30)));
        assert_eq!(p.delay_for(6), None);
    }

    #[tokio::test]
    async fn test_connect_joins_room_and_forwards_events() {
        let connector = Arc::new(FakeConnector::new());
        let mut probe = connector.push_link();
        let mut manager = ConnectionManager::new(connector.clone(), policy(5));

        let mut events = manager.connect(room()).unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));
        assert!(manager.is_online());

        let join = probe.outbound.recv().await.unwrap();
        assert_eq!(join, ClientEvent::Join(RoomJoin::from_room(&room())));

        probe
            .inbound
            .send(ServerEvent::MessageSeen(DeliveryReceipt {
                message_id: MessageId::new("m1"),
            }))
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::Seen(MessageId::new("m1"))));
    }

    #[tokio::test]
    async fn test_connect_same_room_is_noop() {
        let connector = Arc::new(FakeConnector::new());
        let _probe = connector.push_link();
        let mut manager = ConnectionManager::new(connector.clone(), policy(5));

        let mut events = manager.connect(room()).unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));

        assert!(manager.connect(room()).is_none());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_other_room_tears_down_previous() {
        let connector = Arc::new(FakeConnector::new());
        let _first = connector.push_link();
        let mut second = connector.push_link();
        let mut manager = ConnectionManager::new(connector.clone(), policy(5));

        let mut old_events = manager.connect(room()).unwrap();
        assert_eq!(old_events.recv().await, Some(ChatEvent::ConnectionChanged(true)));

        let other = Room::direct(UserId::new("alice"), UserId::new("carol"));
        let mut new_events = manager.connect(other.clone()).unwrap();

        // The old stream ends instead of delivering a second copy of events.
        assert_eq!(old_events.recv().await, None);
        assert_eq!(new_events.recv().await, Some(ChatEvent::ConnectionChanged(true)));
        assert_eq!(
            second.outbound.recv().await,
            Some(ClientEvent::Join(RoomJoin::from_room(&other)))
        );
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_and_goes_offline() {
        let connector = Arc::new(FakeConnector::new());
        let _probe = connector.push_link();
        let mut manager = ConnectionManager::new(connector, policy(5));

        let mut events = manager.connect(room()).unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));
        let handle = manager.handle().unwrap();

        manager.disconnect();

        assert_eq!(events.recv().await, None);
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(
            handle.emit(ClientEvent::Typing(RoomJoin::from_room(&room()))),
            Err(ChatError::Offline)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_backoff_and_rejoins() {
        let connector = Arc::new(FakeConnector::new());
        let first = connector.push_link();
        let mut second = connector.push_link();
        let mut manager = ConnectionManager::new(connector.clone(), policy(5));

        let mut events = manager.connect(room()).unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));

        // Server goes away.
        let dropped_at = Instant::now();
        drop(first);
        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(false)));
        assert!(!manager.is_online());

        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));
        assert!(dropped_at.elapsed() >= Duration::from_secs(3));
        assert!(dropped_at.elapsed() < Duration::from_secs(4));
        assert!(manager.is_online());

        assert_eq!(
            second.outbound.recv().await,
            Some(ClientEvent::Join(RoomJoin::from_room(&room())))
        );
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts_until_retry() {
        let connector = Arc::new(FakeConnector::new());
        let mut manager = ConnectionManager::new(connector.clone(), policy(2));
        let mut events = manager.connect(room()).unwrap();
        let handle = manager.handle().unwrap();
        let mut state = handle.watch_state();

        state
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .unwrap();
        // Initial attempt plus two retries.
        assert_eq!(connector.attempts(), 3);

        let mut probe = connector.push_link();
        handle.retry();

        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));
        assert!(probe.outbound.recv().await.is_some());
        assert_eq!(connector.attempts(), 4);
    }
}
