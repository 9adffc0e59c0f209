//! Per-conversation state shared between the send pipeline, the socket event
//! pump and the view.
//!
//! [`SharedState`] wraps [`SessionState`] in a mutex and bumps a revision
//! counter on every mutation so the view knows when to re-render.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use portal_shared::constants::SEND_FAILED_NOTICE;
use portal_shared::{Room, TemporaryId};

use crate::presence::TypingIndicator;
use crate::store::MessageStore;

/// Transient notification for the view (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SendFailed {
        temporary_id: TemporaryId,
        content: String,
    },
}

impl Notice {
    pub fn text(&self) -> &'static str {
        match self {
            Notice::SendFailed { .. } => SEND_FAILED_NOTICE,
        }
    }

    /// The notice text with the affected message quoted.
    pub fn describe(&self) -> String {
        match self {
            Notice::SendFailed { content, .. } => format!("{SEND_FAILED_NOTICE}: {content:?}"),
        }
    }
}

/// Mutable state of one open conversation.
#[derive(Debug)]
pub struct SessionState {
    pub store: MessageStore,
    pub typing: TypingIndicator,
    /// Persistent, dismissible error banner (history fetch failures).
    pub banner: Option<String>,
    pub notices: VecDeque<Notice>,
}

impl SessionState {
    pub fn new(room: &Room, store: MessageStore) -> Self {
        Self {
            store,
            typing: TypingIndicator::new(room.clone()),
            banner: None,
            notices: VecDeque::new(),
        }
    }
}

/// [`SessionState`] behind a mutex, with change notification.
#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<SessionState>,
    revision: watch::Sender<u64>,
}

impl SharedState {
    pub fn new(state: SessionState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(state),
            revision,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the state and notify subscribers.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let result = f(&mut self.lock());
        self.touch();
        result
    }

    /// Notify subscribers without changing anything (e.g. connection state).
    pub fn touch(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // Mutations are short and synchronous; a poisoned lock still holds a
    // consistent store.
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_shared::UserId;

    #[test]
    fn test_update_bumps_revision() {
        let room = Room::direct(UserId::new("alice"), UserId::new("bob"));
        let shared = SharedState::new(SessionState::new(&room, MessageStore::new()));
        let rx = shared.subscribe();
        assert_eq!(*rx.borrow(), 0);

        shared.update(|s| s.banner = Some("boom".into()));
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(shared.read(|s| s.banner.clone()), Some("boom".into()));

        shared.touch();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn test_send_failed_notice_quotes_content() {
        let notice = Notice::SendFailed {
            temporary_id: TemporaryId("tmp-1".into()),
            content: "hello".into(),
        };
        assert_eq!(notice.text(), "Sending failed");
        assert_eq!(notice.describe(), "Sending failed: \"hello\"");
    }
}
