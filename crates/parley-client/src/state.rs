//! The chat state model.
//!
//! One [`ChatState`] value is the single source of truth for everything the
//! UI renders: channels, per-channel message lists, the canonical user map,
//! typing indicators, and connection status.  It is only ever mutated through
//! the reducer (see [`crate::reducer`]), which is what makes it safely
//! shareable across many subscribers.

use std::collections::HashMap;

use parley_shared::{Channel, ChannelId, Message, MessageId, TypingIndicator, User, UserId};

/// Realtime connection status as seen by the UI.  Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

/// The complete client-side chat state.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub channels: Vec<Channel>,
    /// Message lists keyed by channel, always sorted by ascending id.
    pub messages: HashMap<ChannelId, Vec<Message>>,
    /// Canonical user map; entries merge rather than replace.
    pub users: HashMap<UserId, User>,
    /// Active typing indicators keyed by channel.
    pub typing: HashMap<ChannelId, Vec<TypingIndicator>>,
    pub current_channel: Option<ChannelId>,
    pub connection: ConnectionStatus,
    pub pending_invitations: u32,
    /// Last user-visible operation error; cleared after it has been shown.
    pub error: Option<String>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for one channel (empty slice when none are loaded).
    pub fn channel_messages(&self, channel_id: ChannelId) -> &[Message] {
        self.messages
            .get(&channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Id of the newest loaded message in a channel.
    pub fn last_message_id(&self, channel_id: ChannelId) -> Option<MessageId> {
        self.channel_messages(channel_id).last().map(|m| m.id)
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    /// Users currently typing in a channel (or in one of its threads when
    /// `thread_root` is given).
    pub fn typing_users(
        &self,
        channel_id: ChannelId,
        thread_root: Option<MessageId>,
    ) -> Vec<&TypingIndicator> {
        self.typing
            .get(&channel_id)
            .map(|list| {
                list.iter()
                    .filter(|t| t.thread_root == thread_root)
                    .collect()
            })
            .unwrap_or_default()
    }
}
