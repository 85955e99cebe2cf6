//! Socket event pump.
//!
//! A background task that applies transport events to the store.  It also
//! owns the typing-timeout timers: one cancellable handle per
//! (channel, user, thread) key, replaced on fresh typing events, aborted on
//! explicit stops, and all aborted when the pump shuts down.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_net::SocketEvent;
use parley_shared::constants::TYPING_TIMEOUT;
use parley_shared::{ChannelId, MessageId, ServerEvent, TypingIndicator, UserId};

use crate::reducer::ChatAction;
use crate::store::ChatStore;
use crate::transport::Transport;

type TypingKey = (ChannelId, UserId, Option<MessageId>);

pub(crate) fn spawn_event_pump(
    store: Arc<ChatStore>,
    transport: Arc<dyn Transport>,
) -> JoinHandle<()> {
    let mut rx = transport.subscribe();
    tokio::spawn(async move {
        let mut typing_timers: HashMap<TypingKey, JoinHandle<()>> = HashMap::new();
        loop {
            match rx.recv().await {
                Ok(event) => apply_event(&store, &mut typing_timers, event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event pump lagged behind the transport");
                }
                Err(RecvError::Closed) => break,
            }
        }
        for (_, timer) in typing_timers {
            timer.abort();
        }
    })
}

fn apply_event(
    store: &Arc<ChatStore>,
    typing_timers: &mut HashMap<TypingKey, JoinHandle<()>>,
    event: SocketEvent,
) {
    match event {
        SocketEvent::Established => store.dispatch(ChatAction::SetConnected(true)),
        SocketEvent::Lost | SocketEvent::Closed => {
            store.dispatch(ChatAction::SetConnected(false))
        }
        SocketEvent::Reconnecting { attempt, .. } => {
            store.dispatch(ChatAction::SetReconnectAttempts(attempt))
        }
        SocketEvent::Failed => {
            warn!("realtime connection terminally failed");
            store.dispatch(ChatAction::SetConnected(false));
        }
        SocketEvent::AuthFailed { reason } => {
            warn!(reason = %reason, "realtime authentication failed");
            store.dispatch(ChatAction::SetConnected(false));
        }
        SocketEvent::Event(server_event) => apply_server_event(store, typing_timers, server_event),
    }
}

fn apply_server_event(
    store: &Arc<ChatStore>,
    typing_timers: &mut HashMap<TypingKey, JoinHandle<()>>,
    event: ServerEvent,
) {
    match event {
        ServerEvent::MessageCreated(message) => store.dispatch(ChatAction::AddMessage(message)),
        ServerEvent::MessageUpdated(message) => store.dispatch(ChatAction::UpdateMessage(message)),
        ServerEvent::MessageDeleted {
            channel_id,
            message_id,
        } => store.dispatch(ChatAction::RemoveMessage {
            channel_id,
            message_id,
        }),

        ServerEvent::TypingStarted {
            channel_id,
            user_id,
            thread_root,
        } => {
            typing_timers.retain(|_, timer| !timer.is_finished());

            let key = (channel_id, user_id.clone(), thread_root);
            if let Some(old) = typing_timers.remove(&key) {
                old.abort();
            }

            store.dispatch(ChatAction::AddTypingUser(TypingIndicator {
                channel_id,
                user_id: user_id.clone(),
                thread_root,
                started_at: Utc::now(),
            }));

            // Safety timeout: stop events can be dropped by the network, so
            // the indicator always dies on its own after a while.  Removal is
            // idempotent, so racing with an explicit stop is harmless.
            let store = Arc::clone(store);
            typing_timers.insert(
                key,
                tokio::spawn(async move {
                    tokio::time::sleep(TYPING_TIMEOUT).await;
                    store.dispatch(ChatAction::RemoveTypingUser {
                        channel_id,
                        user_id,
                        thread_root,
                    });
                }),
            );
        }
        ServerEvent::TypingStopped {
            channel_id,
            user_id,
            thread_root,
        } => {
            let key = (channel_id, user_id.clone(), thread_root);
            if let Some(timer) = typing_timers.remove(&key) {
                timer.abort();
            }
            store.dispatch(ChatAction::RemoveTypingUser {
                channel_id,
                user_id,
                thread_root,
            });
        }

        ServerEvent::Presence { user } => store.dispatch(ChatAction::UpsertUser(user)),

        ServerEvent::ReactionUpdated {
            message_id,
            reactions,
        } => store.dispatch(ChatAction::UpdateMessageReactions {
            message_id,
            reactions,
        }),
        ServerEvent::ThreadUpdated {
            message_id,
            thread_count,
            last_thread_message_at,
        } => store.dispatch(ChatAction::UpdateMessageThreadInfo {
            message_id,
            thread_count,
            last_thread_message_at,
        }),

        ServerEvent::ChannelCreated(channel) => store.dispatch(ChatAction::AddChannel(channel)),
        ServerEvent::ChannelUpdated(channel) => store.dispatch(ChatAction::UpdateChannel(channel)),
        ServerEvent::ChannelDeleted { channel_id } => {
            store.dispatch(ChatAction::RemoveChannel(channel_id))
        }
        ServerEvent::ChannelInvitation { channel_name, .. } => {
            debug!(channel = %channel_name, "channel invitation received");
            let pending = store.with_state(|s| s.pending_invitations);
            store.dispatch(ChatAction::SetPendingInvitations(pending + 1));
        }
        ServerEvent::UserJoinedChannel { channel_id, user } => {
            store.dispatch(ChatAction::UpsertUser(user));
            store.dispatch(ChatAction::ChannelMemberJoined(channel_id));
        }
        ServerEvent::ReadReceipt { channel_id, .. } => {
            // Other users' receipts don't affect local state.
            debug!(channel = %channel_id, "read receipt observed");
        }

        // The handshake consumes these before the session loop starts; a
        // repeat mid-session carries no new information.
        ServerEvent::ConnectionEstablished { .. }
        | ServerEvent::AuthenticationFailed { .. }
        | ServerEvent::ServerError { .. } => {}
    }
}
