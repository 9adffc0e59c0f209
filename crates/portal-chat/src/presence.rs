//! Ephemeral typing state, never persisted and never part of the store.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use portal_shared::{ClientEvent, Room, TypingSignal};

use crate::connection::ConnectionHandle;

/// How repeated keystrokes affect the local typing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingMode {
    /// `stopTyping` fires one window after the first keystroke, whatever
    /// happens in between.
    FixedWindow,
    /// Every keystroke pushes `stopTyping` back by one window.
    Debounce,
}

/// Whether the remote party of the selected room is typing.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    room: Room,
    peer_typing: bool,
}

impl TypingIndicator {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            peer_typing: false,
        }
    }

    pub fn is_peer_typing(&self) -> bool {
        self.peer_typing
    }

    /// Returns `true` if the indicator changed.
    pub fn on_typing(&mut self, signal: &TypingSignal) -> bool {
        self.set(signal, true)
    }

    /// Returns `true` if the indicator changed.
    pub fn on_stop_typing(&mut self, signal: &TypingSignal) -> bool {
        self.set(signal, false)
    }

    pub fn reset(&mut self) {
        self.peer_typing = false;
    }

    fn set(&mut self, signal: &TypingSignal, typing: bool) -> bool {
        if !self.concerns_room(signal) {
            debug!(sender = %signal.sender_id, room = %self.room, "Ignoring typing signal for another conversation");
            return false;
        }
        let changed = self.peer_typing != typing;
        self.peer_typing = typing;
        changed
    }

    fn concerns_room(&self, signal: &TypingSignal) -> bool {
        match &self.room {
            Room::Direct { local, peer } => {
                signal.sender_id == *peer
                    && signal.receiver_id.as_ref().map_or(true, |r| r == local)
            }
            Room::Thread { local, thread } => {
                signal.sender_id != *local && signal.thread_id.as_ref() == Some(thread)
            }
        }
    }
}

/// Emits the local user's `typing` / `stopTyping` signals.
pub struct TypingNotifier {
    mode: TypingMode,
    window: Duration,
    signal: TypingSignal,
    timer: Option<JoinHandle<()>>,
}

impl TypingNotifier {
    pub fn new(room: &Room, mode: TypingMode, window: Duration) -> Self {
        Self {
            mode,
            window,
            signal: TypingSignal::from_room(room),
            timer: None,
        }
    }

    /// Call on every local input change.
    pub fn notify_typing(&mut self, connection: &ConnectionHandle) {
        let armed = self.timer.as_ref().is_some_and(|t| !t.is_finished());

        if armed {
            match self.mode {
                TypingMode::FixedWindow => return,
                TypingMode::Debounce => self.reset(),
            }
        } else if let Err(e) = connection.emit(ClientEvent::Typing(self.signal.clone())) {
            debug!(error = %e, "Typing signal not sent");
        }

        let connection = connection.clone();
        let signal = self.signal.clone();
        let window = self.window;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(e) = connection.emit(ClientEvent::StopTyping(signal)) {
                debug!(error = %e, "Stop-typing signal not sent");
            }
        }));
    }

    /// Cancel a pending `stopTyping` without emitting it.
    pub fn reset(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use portal_shared::{ThreadId, UserId};
    use tokio::time::Instant;

    use crate::connection::{ChatEvent, ConnectionManager, ReconnectPolicy};
    use crate::testing::{FakeConnector, LinkProbe};

    fn alice_bob() -> Room {
        Room::direct(UserId::new("alice"), UserId::new("bob"))
    }

    fn signal(sender: &str, receiver: Option<&str>, thread: Option<&str>) -> TypingSignal {
        TypingSignal {
            sender_id: UserId::new(sender),
            receiver_id: receiver.map(UserId::new),
            thread_id: thread.map(ThreadId::new),
        }
    }

    #[test]
    fn test_typing_from_selected_peer() {
        let mut indicator = TypingIndicator::new(alice_bob());
        assert!(indicator.on_typing(&signal("bob", Some("alice"), None)));
        assert!(indicator.is_peer_typing());
        assert!(!indicator.on_typing(&signal("bob", None, None)));
        assert!(indicator.on_stop_typing(&signal("bob", Some("alice"), None)));
        assert!(!indicator.is_peer_typing());
    }

    #[test]
    fn test_typing_from_other_peer_is_ignored() {
        let mut indicator = TypingIndicator::new(alice_bob());
        assert!(!indicator.on_typing(&signal("carol", Some("alice"), None)));
        assert!(!indicator.is_peer_typing());

        // Bob typing to someone else is not shown either.
        assert!(!indicator.on_typing(&signal("bob", Some("carol"), None)));
        assert!(!indicator.is_peer_typing());

        indicator.on_typing(&signal("bob", Some("alice"), None));
        assert!(!indicator.on_stop_typing(&signal("carol", Some("alice"), None)));
        assert!(indicator.is_peer_typing());
    }

    #[test]
    fn test_thread_typing() {
        let room = Room::thread(UserId::new("hr-1"), ThreadId::new("t-1"));
        let mut indicator = TypingIndicator::new(room);

        assert!(!indicator.on_typing(&signal("hr-1", None, Some("t-1"))));
        assert!(!indicator.on_typing(&signal("intern-4", None, Some("t-2"))));
        assert!(indicator.on_typing(&signal("intern-4", None, Some("t-1"))));
        indicator.reset();
        assert!(!indicator.is_peer_typing());
    }

    async fn connected() -> (ConnectionManager<FakeConnector>, LinkProbe) {
        let connector = Arc::new(FakeConnector::new());
        let mut probe = connector.push_link();
        let mut manager = ConnectionManager::new(connector, ReconnectPolicy::default());
        let mut events = manager.connect(alice_bob()).unwrap();
        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionChanged(true)));
        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::Join(_))));
        (manager, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_ignores_further_keystrokes() {
        let (manager, mut probe) = connected().await;
        let handle = manager.handle().unwrap();
        let mut notifier =
            TypingNotifier::new(&alice_bob(), TypingMode::FixedWindow, Duration::from_secs(1));
        let start = Instant::now();

        notifier.notify_typing(&handle);
        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::Typing(_))));

        tokio::time::sleep(Duration::from_millis(600)).await;
        notifier.notify_typing(&handle);

        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::StopTyping(_))));
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1100));

        // A keystroke after the window opens a new one.
        notifier.notify_typing(&handle);
        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::Typing(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_extends_window() {
        let (manager, mut probe) = connected().await;
        let handle = manager.handle().unwrap();
        let mut notifier =
            TypingNotifier::new(&alice_bob(), TypingMode::Debounce, Duration::from_secs(1));
        let start = Instant::now();

        notifier.notify_typing(&handle);
        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::Typing(_))));

        tokio::time::sleep(Duration::from_millis(600)).await;
        notifier.notify_typing(&handle);

        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::StopTyping(_))));
        assert!(start.elapsed() >= Duration::from_millis(1600));
        assert!(start.elapsed() < Duration::from_millis(1700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_stop() {
        let (manager, mut probe) = connected().await;
        let handle = manager.handle().unwrap();
        let mut notifier =
            TypingNotifier::new(&alice_bob(), TypingMode::FixedWindow, Duration::from_secs(1));

        notifier.notify_typing(&handle);
        assert!(matches!(probe.outbound.recv().await, Some(ClientEvent::Typing(_))));
        notifier.reset();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(probe.outbound.try_recv().is_err());
    }
}
