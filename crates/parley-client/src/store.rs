//! The dispatching store around [`ChatState`].
//!
//! Actions are applied in dispatch order under a single lock (the only
//! strong ordering guarantee in the engine), and every committed change is
//! announced to subscribers so persistence can react without living inside
//! the reducer.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use parley_shared::{ChannelId, Message};

use crate::reducer::{reduce, ChatAction, StateChange};
use crate::state::ChatState;

/// Commit summary delivered to store subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A channel's message list changed; worth persisting.
    MessagesChanged(ChannelId),
    /// Some other part of the state changed.
    Updated,
}

/// Shared, observable chat state.
pub struct ChatStore {
    state: Mutex<ChatState>,
    events: broadcast::Sender<StoreEvent>,
}

impl ChatStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(ChatState::new()),
            events,
        }
    }

    /// Apply an action and notify subscribers of the committed change.
    /// No-op actions (duplicate inserts, missing targets) notify nobody.
    pub fn dispatch(&self, action: ChatAction) {
        let change = reduce(&mut self.lock_state(), action);
        match change {
            StateChange::Messages(channel_id) => {
                let _ = self.events.send(StoreEvent::MessagesChanged(channel_id));
            }
            StateChange::Other => {
                let _ = self.events.send(StoreEvent::Updated);
            }
            StateChange::Nothing => {}
        }
    }

    /// Read the state under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.lock_state())
    }

    /// Subscribe to commit summaries.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Snapshot of every loaded message list, for cache persistence.
    pub fn snapshot_messages(&self) -> HashMap<ChannelId, Vec<Message>> {
        self.lock_state().messages.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChatState> {
        // A poisoned lock only means another thread panicked mid-dispatch;
        // the state itself is still a consistent value.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
