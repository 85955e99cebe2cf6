//! The closed action set and the pure reducer.
//!
//! Every mutation of [`ChatState`] goes through [`reduce`].  The reducer
//! performs no I/O; persistence is a store subscriber that inspects the
//! returned [`StateChange`] summaries, which keeps the state "just a data
//! structure" for testing.

use chrono::{DateTime, Utc};
use tracing::warn;

use parley_shared::{
    Channel, ChannelId, Message, MessageId, Reaction, TypingIndicator, User, UserId,
};

use crate::state::ChatState;

/// The closed set of state mutations.
#[derive(Debug, Clone)]
pub enum ChatAction {
    SetChannels(Vec<Channel>),
    AddChannel(Channel),
    UpdateChannel(Channel),
    RemoveChannel(ChannelId),
    /// A member joined; bumps the channel's member count.
    ChannelMemberJoined(ChannelId),
    ClearChannelUnread(ChannelId),
    SetCurrentChannel(Option<ChannelId>),

    /// Wholesale replacement of a channel's message list.
    SetMessages {
        channel_id: ChannelId,
        messages: Vec<Message>,
    },
    /// Prepend an older page; incoming ids already present are dropped.
    PrependMessages {
        channel_id: ChannelId,
        messages: Vec<Message>,
    },
    AddMessage(Message),
    UpdateMessage(Message),
    RemoveMessage {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    /// Replace the reaction list of a message whose channel is unknown.
    UpdateMessageReactions {
        message_id: MessageId,
        reactions: Vec<Reaction>,
    },
    /// Patch thread counters of a message whose channel is unknown.
    UpdateMessageThreadInfo {
        message_id: MessageId,
        thread_count: u32,
        last_thread_message_at: Option<DateTime<Utc>>,
    },

    SetUsers(Vec<User>),
    UpsertUser(User),

    AddTypingUser(TypingIndicator),
    RemoveTypingUser {
        channel_id: ChannelId,
        user_id: UserId,
        thread_root: Option<MessageId>,
    },

    SetConnected(bool),
    SetReconnectAttempts(u32),
    SetPendingInvitations(u32),

    SetError(String),
    ClearError,
}

/// What a committed action touched.  Drives the persistence subscriber:
/// only message-list changes are worth a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// A channel's message list changed.
    Messages(ChannelId),
    /// Something else changed.
    Other,
    /// The action was a no-op (duplicate insert, missing target, ...).
    Nothing,
}

/// Apply one action.  Pure: no I/O, no timers, deterministic.
pub fn reduce(state: &mut ChatState, action: ChatAction) -> StateChange {
    match action {
        ChatAction::SetChannels(channels) => {
            state.channels = channels;
            StateChange::Other
        }
        ChatAction::AddChannel(channel) => {
            if state.channels.iter().any(|c| c.id == channel.id) {
                return StateChange::Nothing;
            }
            state.channels.push(channel);
            StateChange::Other
        }
        ChatAction::UpdateChannel(channel) => {
            match state.channels.iter_mut().find(|c| c.id == channel.id) {
                Some(slot) => {
                    *slot = channel;
                    StateChange::Other
                }
                None => {
                    warn!(channel = %channel.id, "update for unknown channel ignored");
                    StateChange::Nothing
                }
            }
        }
        ChatAction::RemoveChannel(channel_id) => {
            let before = state.channels.len();
            state.channels.retain(|c| c.id != channel_id);
            state.messages.remove(&channel_id);
            state.typing.remove(&channel_id);
            if state.current_channel == Some(channel_id) {
                state.current_channel = None;
            }
            if state.channels.len() == before {
                StateChange::Nothing
            } else {
                StateChange::Other
            }
        }
        ChatAction::ChannelMemberJoined(channel_id) => {
            match state.channels.iter_mut().find(|c| c.id == channel_id) {
                Some(channel) => {
                    channel.member_count += 1;
                    StateChange::Other
                }
                None => StateChange::Nothing,
            }
        }
        ChatAction::ClearChannelUnread(channel_id) => {
            match state.channels.iter_mut().find(|c| c.id == channel_id) {
                Some(channel) => {
                    channel.unread_count = 0;
                    StateChange::Other
                }
                None => StateChange::Nothing,
            }
        }
        ChatAction::SetCurrentChannel(channel_id) => {
            state.current_channel = channel_id;
            StateChange::Other
        }

        ChatAction::SetMessages {
            channel_id,
            mut messages,
        } => {
            messages.sort_by_key(|m| m.id);
            state.messages.insert(channel_id, messages);
            StateChange::Messages(channel_id)
        }
        ChatAction::PrependMessages {
            channel_id,
            messages,
        } => {
            let list = state.messages.entry(channel_id).or_default();
            let mut fresh: Vec<Message> = messages
                .into_iter()
                .filter(|m| !list.iter().any(|existing| existing.id == m.id))
                .collect();
            if fresh.is_empty() {
                return StateChange::Nothing;
            }
            fresh.sort_by_key(|m| m.id);
            list.splice(0..0, fresh);
            StateChange::Messages(channel_id)
        }
        ChatAction::AddMessage(message) => {
            let channel_id = message.channel_id;
            let list = state.messages.entry(channel_id).or_default();
            // Idempotent by id: overlapping cache-merge, incremental-fetch,
            // and live-socket paths may all deliver the same message.
            if list.iter().any(|m| m.id == message.id) {
                return StateChange::Nothing;
            }
            let position = list.partition_point(|m| m.id < message.id);
            list.insert(position, message);
            StateChange::Messages(channel_id)
        }
        ChatAction::UpdateMessage(message) => {
            let Some(list) = state.messages.get_mut(&message.channel_id) else {
                warn!(message = %message.id, "update for message in unloaded channel ignored");
                return StateChange::Nothing;
            };
            match list.iter_mut().find(|m| m.id == message.id) {
                Some(slot) => {
                    let channel_id = message.channel_id;
                    *slot = message;
                    StateChange::Messages(channel_id)
                }
                None => {
                    warn!(message = %message.id, "update for unknown message ignored");
                    StateChange::Nothing
                }
            }
        }
        ChatAction::RemoveMessage {
            channel_id,
            message_id,
        } => {
            let Some(list) = state.messages.get_mut(&channel_id) else {
                return StateChange::Nothing;
            };
            let before = list.len();
            list.retain(|m| m.id != message_id);
            if list.len() == before {
                StateChange::Nothing
            } else {
                StateChange::Messages(channel_id)
            }
        }
        ChatAction::UpdateMessageReactions {
            message_id,
            reactions,
        } => {
            // The event payload carries no channel id, so scan every loaded
            // channel; a message lives in exactly one, first match wins.
            match find_message_mut(state, message_id) {
                Some((channel_id, message)) => {
                    message.reactions = reactions;
                    StateChange::Messages(channel_id)
                }
                None => {
                    warn!(message = %message_id, "reaction update for unknown message ignored");
                    StateChange::Nothing
                }
            }
        }
        ChatAction::UpdateMessageThreadInfo {
            message_id,
            thread_count,
            last_thread_message_at,
        } => match find_message_mut(state, message_id) {
            Some((channel_id, message)) => {
                message.thread_count = thread_count;
                message.last_thread_message_at = last_thread_message_at;
                StateChange::Messages(channel_id)
            }
            None => {
                warn!(message = %message_id, "thread update for unknown message ignored");
                StateChange::Nothing
            }
        },

        ChatAction::SetUsers(users) => {
            for user in users {
                merge_user(state, user);
            }
            StateChange::Other
        }
        ChatAction::UpsertUser(user) => {
            merge_user(state, user);
            StateChange::Other
        }

        ChatAction::AddTypingUser(indicator) => {
            let list = state.typing.entry(indicator.channel_id).or_default();
            match list
                .iter_mut()
                .find(|t| t.user_id == indicator.user_id && t.thread_root == indicator.thread_root)
            {
                // Re-adding an active typer refreshes its timestamp instead
                // of duplicating the entry.
                Some(existing) => existing.started_at = indicator.started_at,
                None => list.push(indicator),
            }
            StateChange::Other
        }
        ChatAction::RemoveTypingUser {
            channel_id,
            user_id,
            thread_root,
        } => {
            // Idempotent: the explicit stop event and the safety timeout may
            // both fire for the same entry.
            let Some(list) = state.typing.get_mut(&channel_id) else {
                return StateChange::Nothing;
            };
            let before = list.len();
            list.retain(|t| !(t.user_id == user_id && t.thread_root == thread_root));
            if list.len() == before {
                StateChange::Nothing
            } else {
                StateChange::Other
            }
        }

        ChatAction::SetConnected(connected) => {
            state.connection.connected = connected;
            if connected {
                state.connection.reconnect_attempts = 0;
            }
            StateChange::Other
        }
        ChatAction::SetReconnectAttempts(attempts) => {
            state.connection.reconnect_attempts = attempts;
            StateChange::Other
        }
        ChatAction::SetPendingInvitations(count) => {
            state.pending_invitations = count;
            StateChange::Other
        }

        ChatAction::SetError(message) => {
            state.error = Some(message);
            StateChange::Other
        }
        ChatAction::ClearError => {
            state.error = None;
            StateChange::Other
        }
    }
}

fn find_message_mut(
    state: &mut ChatState,
    message_id: MessageId,
) -> Option<(ChannelId, &mut Message)> {
    state.messages.iter_mut().find_map(|(channel_id, list)| {
        list.iter_mut()
            .find(|m| m.id == message_id)
            .map(|m| (*channel_id, m))
    })
}

fn merge_user(state: &mut ChatState, user: User) {
    match state.users.get_mut(&user.id) {
        Some(existing) => existing.merge(&user),
        None => {
            state.users.insert(user.id.clone(), user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{MessageKind, UserId};

    fn message(id: i64, channel: i64) -> Message {
        Message {
            id: MessageId(id),
            channel_id: ChannelId(channel),
            user_id: UserId::from("u1"),
            content: format!("m{id}"),
            kind: MessageKind::Text,
            thread_root: None,
            thread_count: 0,
            last_thread_message_at: None,
            reactions: vec![],
            attachments: vec![],
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
        }
    }

    fn ids(state: &ChatState, channel: i64) -> Vec<i64> {
        state
            .channel_messages(ChannelId(channel))
            .iter()
            .map(|m| m.id.0)
            .collect()
    }

    fn typing(channel: i64, user: &str) -> TypingIndicator {
        TypingIndicator {
            channel_id: ChannelId(channel),
            user_id: UserId::from(user),
            thread_root: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn add_message_is_idempotent_by_id() {
        let mut state = ChatState::new();
        assert_eq!(
            reduce(&mut state, ChatAction::AddMessage(message(5, 1))),
            StateChange::Messages(ChannelId(1))
        );

        // Same id again, different content: the first occurrence wins.
        let mut dup = message(5, 1);
        dup.content = "other".into();
        assert_eq!(
            reduce(&mut state, ChatAction::AddMessage(dup)),
            StateChange::Nothing
        );

        let list = state.channel_messages(ChannelId(1));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].content, "m5");
    }

    #[test]
    fn add_message_keeps_ascending_order() {
        let mut state = ChatState::new();
        for id in [3, 1, 2, 5, 4] {
            reduce(&mut state, ChatAction::AddMessage(message(id, 1)));
        }
        assert_eq!(ids(&state, 1), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn prepend_drops_ids_already_present() {
        let mut state = ChatState::new();
        reduce(
            &mut state,
            ChatAction::SetMessages {
                channel_id: ChannelId(1),
                messages: vec![message(10, 1), message(11, 1)],
            },
        );

        reduce(
            &mut state,
            ChatAction::PrependMessages {
                channel_id: ChannelId(1),
                messages: vec![message(8, 1), message(9, 1), message(10, 1)],
            },
        );
        assert_eq!(ids(&state, 1), vec![8, 9, 10, 11]);

        // Prepending only-known ids is a no-op.
        let change = reduce(
            &mut state,
            ChatAction::PrependMessages {
                channel_id: ChannelId(1),
                messages: vec![message(8, 1)],
            },
        );
        assert_eq!(change, StateChange::Nothing);
    }

    #[test]
    fn set_messages_sorts_and_replaces() {
        let mut state = ChatState::new();
        reduce(
            &mut state,
            ChatAction::SetMessages {
                channel_id: ChannelId(1),
                messages: vec![message(2, 1), message(1, 1)],
            },
        );
        assert_eq!(ids(&state, 1), vec![1, 2]);

        reduce(
            &mut state,
            ChatAction::SetMessages {
                channel_id: ChannelId(1),
                messages: vec![message(7, 1)],
            },
        );
        assert_eq!(ids(&state, 1), vec![7]);
    }

    #[test]
    fn reaction_update_finds_message_without_channel_id() {
        let mut state = ChatState::new();
        reduce(&mut state, ChatAction::AddMessage(message(1, 1)));
        reduce(&mut state, ChatAction::AddMessage(message(2, 2)));

        let change = reduce(
            &mut state,
            ChatAction::UpdateMessageReactions {
                message_id: MessageId(2),
                reactions: vec![Reaction {
                    emoji: "🎉".into(),
                    user_id: UserId::from("u2"),
                }],
            },
        );
        assert_eq!(change, StateChange::Messages(ChannelId(2)));
        assert_eq!(state.channel_messages(ChannelId(2))[0].reactions.len(), 1);

        // Unknown message: warn-and-ignore, never an error.
        let change = reduce(
            &mut state,
            ChatAction::UpdateMessageReactions {
                message_id: MessageId(99),
                reactions: vec![],
            },
        );
        assert_eq!(change, StateChange::Nothing);
    }

    #[test]
    fn thread_info_update_patches_counters() {
        let mut state = ChatState::new();
        reduce(&mut state, ChatAction::AddMessage(message(1, 1)));

        let at = Utc::now();
        reduce(
            &mut state,
            ChatAction::UpdateMessageThreadInfo {
                message_id: MessageId(1),
                thread_count: 3,
                last_thread_message_at: Some(at),
            },
        );

        let m = &state.channel_messages(ChannelId(1))[0];
        assert_eq!(m.thread_count, 3);
        assert_eq!(m.last_thread_message_at, Some(at));
        assert!(m.is_thread_root());
    }

    #[test]
    fn user_updates_merge_instead_of_replacing() {
        let mut state = ChatState::new();
        reduce(
            &mut state,
            ChatAction::UpsertUser(User {
                id: UserId::from("u1"),
                username: "ada".into(),
                display_name: Some("Ada".into()),
                avatar_url: None,
                online: false,
                last_seen_at: None,
            }),
        );
        // Partial presence payload.
        reduce(
            &mut state,
            ChatAction::UpsertUser(User {
                id: UserId::from("u1"),
                username: String::new(),
                display_name: None,
                avatar_url: None,
                online: true,
                last_seen_at: Some(Utc::now()),
            }),
        );

        let user = &state.users[&UserId::from("u1")];
        assert!(user.online);
        assert_eq!(user.username, "ada");
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn readding_typing_user_refreshes_timestamp() {
        let mut state = ChatState::new();
        let first = typing(1, "u1");
        reduce(&mut state, ChatAction::AddTypingUser(first.clone()));

        let mut refreshed = typing(1, "u1");
        refreshed.started_at = first.started_at + chrono::Duration::seconds(3);
        reduce(&mut state, ChatAction::AddTypingUser(refreshed.clone()));

        let list = state.typing_users(ChannelId(1), None);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].started_at, refreshed.started_at);
    }

    #[test]
    fn removing_absent_typing_user_is_a_noop() {
        let mut state = ChatState::new();
        reduce(&mut state, ChatAction::AddTypingUser(typing(1, "u1")));

        let remove = ChatAction::RemoveTypingUser {
            channel_id: ChannelId(1),
            user_id: UserId::from("u1"),
            thread_root: None,
        };
        assert_eq!(reduce(&mut state, remove.clone()), StateChange::Other);
        // Second removal (timeout firing after an explicit stop).
        assert_eq!(reduce(&mut state, remove), StateChange::Nothing);
    }

    #[test]
    fn thread_typing_is_tracked_separately() {
        let mut state = ChatState::new();
        reduce(&mut state, ChatAction::AddTypingUser(typing(1, "u1")));
        let mut in_thread = typing(1, "u1");
        in_thread.thread_root = Some(MessageId(10));
        reduce(&mut state, ChatAction::AddTypingUser(in_thread));

        assert_eq!(state.typing_users(ChannelId(1), None).len(), 1);
        assert_eq!(state.typing_users(ChannelId(1), Some(MessageId(10))).len(), 1);
    }

    #[test]
    fn reconnect_counter_resets_when_connected() {
        let mut state = ChatState::new();
        reduce(&mut state, ChatAction::SetReconnectAttempts(3));
        assert_eq!(state.connection.reconnect_attempts, 3);

        reduce(&mut state, ChatAction::SetConnected(true));
        assert!(state.connection.connected);
        assert_eq!(state.connection.reconnect_attempts, 0);
    }

    #[test]
    fn removing_channel_drops_dependent_state() {
        let mut state = ChatState::new();
        state.channels.push(Channel {
            id: ChannelId(1),
            name: "general".into(),
            description: None,
            kind: parley_shared::ChannelKind::Public,
            member_count: 2,
            last_message: None,
            unread_count: 0,
            archived: false,
        });
        reduce(&mut state, ChatAction::AddMessage(message(1, 1)));
        reduce(&mut state, ChatAction::AddTypingUser(typing(1, "u1")));
        reduce(&mut state, ChatAction::SetCurrentChannel(Some(ChannelId(1))));

        reduce(&mut state, ChatAction::RemoveChannel(ChannelId(1)));

        assert!(state.channels.is_empty());
        assert!(state.messages.is_empty());
        assert!(state.typing.is_empty());
        assert_eq!(state.current_channel, None);
    }

    #[test]
    fn update_message_replaces_in_place() {
        let mut state = ChatState::new();
        reduce(&mut state, ChatAction::AddMessage(message(1, 1)));
        reduce(&mut state, ChatAction::AddMessage(message(2, 1)));

        let mut edited = message(1, 1);
        edited.content = "edited".into();
        edited.edited_at = Some(Utc::now());
        reduce(&mut state, ChatAction::UpdateMessage(edited));

        assert_eq!(ids(&state, 1), vec![1, 2]);
        assert_eq!(state.channel_messages(ChannelId(1))[0].content, "edited");
    }
}
