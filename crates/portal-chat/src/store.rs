//! Ordered, deduplicated message sequence of one conversation.
//!
//! All operations are synchronous and touch nothing but the store itself,
//! so the store can sit behind a plain mutex and be mutated from both the
//! send pipeline and the socket event pump.

use std::time::Duration;

use tracing::{debug, warn};

use portal_shared::constants::RECONCILE_WINDOW;
use portal_shared::{DeliveryState, Message, MessageId, TemporaryId, UserId};

/// What an insertion did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was new and has been inserted.
    Inserted,
    /// The record replaced a provisional entry.
    Replaced,
    /// The record was already present and has been merged into it.
    Merged,
}

/// Ordered message sequence, ascending by effective timestamp (newest last).
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    reconcile_window: Duration,
    fuzzy_matches: usize,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::with_reconcile_window(RECONCILE_WINDOW)
    }

    pub fn with_reconcile_window(reconcile_window: Duration) -> Self {
        Self {
            messages: Vec::new(),
            reconcile_window,
            fuzzy_matches: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of times a confirmed record was matched to a provisional one by
    /// sender, content and timestamp proximity instead of by temporary id.
    pub fn fuzzy_matches(&self) -> usize {
        self.fuzzy_matches
    }

    /// Insert `record`, keeping exactly one entry per logical message.
    ///
    /// Matching order: final id, then temporary id, then (for confirmed
    /// records that do not echo a temporary id) sender + content + time.
    pub fn append(&mut self, record: Message) -> AppendOutcome {
        let outcome = self.insert(record);
        self.sort();
        outcome
    }

    /// Replace the provisional entry `temporary_id` with its confirmed
    /// counterpart. Falls back to [`append`](Self::append) when the
    /// provisional entry is gone.
    ///
    /// If the confirmed id is already stored (a rebroadcast got here first
    /// and could not be matched), that entry absorbs the provisional one.
    pub fn reconcile(&mut self, temporary_id: &TemporaryId, confirmed: Message) -> AppendOutcome {
        if let Some(id) = confirmed.id.as_ref() {
            if let Some(entry) = self.messages.iter_mut().find(|m| m.id.as_ref() == Some(id)) {
                entry.delivery_state = entry.delivery_state.advance(confirmed.delivery_state);
                if entry.temporary_id.is_none() {
                    entry.temporary_id = Some(temporary_id.clone());
                }
                let removed = self.remove_provisional(temporary_id).is_some();
                debug!(temp_id = %temporary_id, msg_id = %id, removed, "Confirmed id already stored, merged");
                return AppendOutcome::Merged;
            }
        }

        if let Some(idx) = self.position_of_provisional(temporary_id) {
            self.replace_at(idx, confirmed, temporary_id);
            self.sort();
            return AppendOutcome::Replaced;
        }

        debug!(temp_id = %temporary_id, "No provisional entry to reconcile, appending");
        self.append(confirmed)
    }

    /// Advance the delivery state of `id`. Returns `false` when the message is
    /// unknown or `state` is not strictly later than the current state.
    pub fn update_delivery_state(&mut self, id: &MessageId, state: DeliveryState) -> bool {
        match self.messages.iter_mut().find(|m| m.id.as_ref() == Some(id)) {
            Some(entry) if state > entry.delivery_state => {
                entry.delivery_state = state;
                true
            }
            Some(_) => false,
            None => {
                debug!(msg_id = %id, state = state.as_str(), "Delivery update for unknown message");
                false
            }
        }
    }

    /// Replace the store wholesale with a page of backend history.
    pub fn load_history(&mut self, records: Vec<Message>) {
        self.messages.clear();
        for record in records {
            self.insert(record);
        }
        self.sort();
    }

    /// Roll back a provisional entry. Confirmed entries are never removed.
    pub fn remove_provisional(&mut self, temporary_id: &TemporaryId) -> Option<Message> {
        let idx = self.position_of_provisional(temporary_id)?;
        Some(self.messages.remove(idx))
    }

    /// Mark every confirmed message not sent by `local` as seen. Returns how
    /// many entries changed.
    pub fn mark_incoming_seen(&mut self, local: &UserId) -> usize {
        let mut changed = 0;
        for entry in self
            .messages
            .iter_mut()
            .filter(|m| m.sender_id != *local && !m.is_provisional())
        {
            if entry.delivery_state < DeliveryState::Seen {
                entry.delivery_state = DeliveryState::Seen;
                changed += 1;
            }
        }
        changed
    }

    fn insert(&mut self, record: Message) -> AppendOutcome {
        if let Some(id) = record.id.as_ref() {
            if let Some(entry) = self.messages.iter_mut().find(|m| m.id.as_ref() == Some(id)) {
                entry.delivery_state = entry.delivery_state.advance(record.delivery_state);
                return AppendOutcome::Merged;
            }
        }

        if let Some(temp_id) = record.temporary_id.clone() {
            if let Some(idx) = self.position_of_provisional(&temp_id) {
                if record.is_provisional() {
                    return AppendOutcome::Merged;
                }
                self.replace_at(idx, record, &temp_id);
                return AppendOutcome::Replaced;
            }
        } else if !record.is_provisional() {
            if let Some(idx) = self.position_of_similar_provisional(&record) {
                self.fuzzy_matches += 1;
                warn!(
                    msg_id = ?record.id,
                    sender = %record.sender_id,
                    "Reconciled by content match; backend did not echo the temporary id"
                );
                let temp_id = self.messages[idx].temporary_id.clone();
                match temp_id {
                    Some(temp_id) => self.replace_at(idx, record, &temp_id),
                    None => self.messages[idx] = record,
                }
                return AppendOutcome::Replaced;
            }
        }

        self.messages.push(record);
        AppendOutcome::Inserted
    }

    fn replace_at(&mut self, idx: usize, mut confirmed: Message, temporary_id: &TemporaryId) {
        let previous = &self.messages[idx];
        confirmed.delivery_state = previous.delivery_state.advance(confirmed.delivery_state);
        if confirmed.temporary_id.is_none() {
            confirmed.temporary_id = Some(temporary_id.clone());
        }
        self.messages[idx] = confirmed;
    }

    fn position_of_provisional(&self, temporary_id: &TemporaryId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.is_provisional() && m.temporary_id.as_ref() == Some(temporary_id))
    }

    fn position_of_similar_provisional(&self, record: &Message) -> Option<usize> {
        let window_ms = self.reconcile_window.as_millis();
        self.messages.iter().position(|m| {
            m.is_provisional()
                && m.sender_id == record.sender_id
                && m.content == record.content
                && ((m.created_at - record.created_at)
                    .num_milliseconds()
                    .unsigned_abs() as u128)
                    < window_ms
        })
    }

    // Stable: entries with equal timestamps keep their insertion order.
    fn sort(&mut self) {
        self.messages.sort_by_key(|m| m.effective_time());
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
