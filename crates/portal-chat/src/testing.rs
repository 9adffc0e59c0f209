//! In-memory stand-ins for the backend and the socket, used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use portal_shared::constants::CHANNEL_CAPACITY;
use portal_shared::{ClientEvent, Message, MessageId, Room, ServerEvent};

use crate::backend::{MessageBackend, OutgoingMessage};
use crate::error::{BackendError, ChatError, Result};
use crate::transport::{Connector, SocketLink};

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// The far end of a fake socket link. Dropping it simulates a server drop.
pub struct LinkProbe {
    pub outbound: mpsc::Receiver<ClientEvent>,
    pub inbound: mpsc::Sender<ServerEvent>,
}

pub fn link_pair() -> (SocketLink, LinkProbe) {
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        SocketLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        },
        LinkProbe {
            outbound: outbound_rx,
            inbound: inbound_tx,
        },
    )
}

/// Connector handing out pre-scripted links; fails once the script is empty.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<VecDeque<SocketLink>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next successful connect and return its far end.
    pub fn push_link(&self) -> LinkProbe {
        let (link, probe) = link_pair();
        self.links.lock().unwrap().push_back(link);
        probe
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    async fn connect(&self, _room: &Room) -> Result<SocketLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.links.lock().unwrap().pop_front();
        next.ok_or_else(|| ChatError::Connection("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Scripted backend. Sends succeed unless a failure is queued; each send can
/// be held back by a gate so tests control the response order.
pub struct FakeBackend {
    pub echo_temporary_id: bool,
    history: Mutex<std::result::Result<Vec<Message>, BackendError>>,
    send_failures: Mutex<VecDeque<BackendError>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    sent: Mutex<Vec<OutgoingMessage>>,
    seen_calls: Mutex<Vec<Room>>,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            echo_temporary_id: true,
            history: Mutex::new(Ok(Vec::new())),
            send_failures: Mutex::new(VecDeque::new()),
            gates: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            seen_calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_history(self, history: std::result::Result<Vec<Message>, BackendError>) -> Self {
        *self.history.lock().unwrap() = history;
        self
    }

    pub fn fail_next_send(&self, error: BackendError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    /// Hold the next send's response until the returned sender fires.
    pub fn gate_next_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn seen_calls(&self) -> Vec<Room> {
        self.seen_calls.lock().unwrap().clone()
    }
}

impl MessageBackend for FakeBackend {
    async fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> std::result::Result<Message, BackendError> {
        self.sent.lock().unwrap().push(message.clone());

        // Id and time are assigned on arrival, like a real persistence call.
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = Message {
            id: Some(MessageId::new(format!("m{n}"))),
            temporary_id: if self.echo_temporary_id {
                message.temporary_id.clone()
            } else {
                None
            },
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            thread_id: message.thread_id.clone(),
            content: message.content.clone(),
            created_at: Utc::now(),
            delivery_state: Default::default(),
        };
        let failure = self.send_failures.lock().unwrap().pop_front();
        let gate = self.gates.lock().unwrap().pop_front();

        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(record),
        }
    }

    async fn fetch_history(&self, _room: &Room) -> std::result::Result<Vec<Message>, BackendError> {
        self.history.lock().unwrap().clone()
    }

    async fn mark_seen(&self, room: &Room) -> std::result::Result<(), BackendError> {
        self.seen_calls.lock().unwrap().push(room.clone());
        Ok(())
    }
}
