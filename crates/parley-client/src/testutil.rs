//! Test doubles shared by the crate's test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use parley_net::{SocketError, SocketEvent};
use parley_shared::{
    Channel, ChannelId, ChannelKind, ClientFrame, Message, MessageId, MessageKind, User, UserId,
};

use crate::api::{ApiError, ApiResult, ChannelDraft, ChatApi, NewMessage, Profile};
use crate::transport::Transport;

pub(crate) fn message(id: i64, channel: i64) -> Message {
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

pub(crate) fn channel(id: i64, name: &str) -> Channel {
    Channel {
        id: ChannelId(id),
        name: name.into(),
        description: None,
        kind: ChannelKind::Public,
        member_count: 1,
        last_message: None,
        unread_count: 0,
        archived: false,
    }
}

pub(crate) fn user(id: &str) -> User {
    User {
        id: UserId::from(id),
        username: id.into(),
        display_name: None,
        avatar_url: None,
        online: true,
        last_seen_at: None,
    }
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: 500,
        message: "boom".into(),
    }
}

/// Scriptable in-memory [`ChatApi`].
#[derive(Default)]
pub(crate) struct MockApi {
    pub channels: Mutex<Vec<Channel>>,
    pub users: Mutex<Vec<User>>,
    pub invitation_count: Mutex<u32>,
    /// Responses for `fetch_latest_messages`, per channel.
    pub latest: Mutex<HashMap<ChannelId, Vec<Message>>>,
    /// Responses for `fetch_messages_after`, per channel.
    pub after: Mutex<HashMap<ChannelId, Vec<Message>>>,
    /// Artificial latency for `fetch_latest_messages`.
    pub latest_delay: Mutex<Option<Duration>>,

    pub latest_calls: Mutex<Vec<ChannelId>>,
    pub after_calls: Mutex<Vec<(ChannelId, MessageId)>>,
    pub mark_read_calls: Mutex<Vec<(ChannelId, Option<MessageId>)>>,

    /// Fail this many `mark_read` calls with a 500 before succeeding.
    pub mark_read_failures: AtomicU32,
    pub fail_channels: AtomicU32,
    pub fail_send: AtomicU32,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn sync_identity(&self, profile: &Profile) -> ApiResult<User> {
        Ok(user(&profile.username))
    }

    async fn fetch_channels(&self) -> ApiResult<Vec<Channel>> {
        if self.fail_channels.load(Ordering::SeqCst) > 0 {
            return Err(server_error());
        }
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn create_channel(&self, draft: &ChannelDraft) -> ApiResult<Channel> {
        Ok(channel(100, &draft.name))
    }

    async fn update_channel(
        &self,
        channel_id: ChannelId,
        draft: &ChannelDraft,
    ) -> ApiResult<Channel> {
        Ok(channel(channel_id.0, &draft.name))
    }

    async fn delete_channel(&self, _channel_id: ChannelId) -> ApiResult<()> {
        Ok(())
    }

    async fn join_channel(&self, channel_id: ChannelId) -> ApiResult<Channel> {
        Ok(channel(channel_id.0, "joined"))
    }

    async fn leave_channel(&self, _channel_id: ChannelId) -> ApiResult<()> {
        Ok(())
    }

    async fn fetch_latest_messages(
        &self,
        channel_id: ChannelId,
        _limit: u32,
    ) -> ApiResult<Vec<Message>> {
        let delay = *self.latest_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.latest_calls.lock().unwrap().push(channel_id);
        Ok(self
            .latest
            .lock()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_messages_after(
        &self,
        channel_id: ChannelId,
        after: MessageId,
    ) -> ApiResult<Vec<Message>> {
        self.after_calls.lock().unwrap().push((channel_id, after));
        Ok(self
            .after
            .lock()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_thread_messages(&self, _root: MessageId) -> ApiResult<Vec<Message>> {
        Ok(vec![])
    }

    async fn send_message(&self, channel_id: ChannelId, draft: &NewMessage) -> ApiResult<Message> {
        if self.fail_send.load(Ordering::SeqCst) > 0 {
            return Err(server_error());
        }
        let mut sent = message(1000, channel_id.0);
        sent.content = draft.content.clone();
        Ok(sent)
    }

    async fn update_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> ApiResult<Message> {
        let mut updated = message(message_id.0, channel_id.0);
        updated.content = content.into();
        Ok(updated)
    }

    async fn delete_message(
        &self,
        _channel_id: ChannelId,
        _message_id: MessageId,
    ) -> ApiResult<()> {
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        _emoji: &str,
    ) -> ApiResult<Message> {
        Ok(message(message_id.0, channel_id.0))
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        _emoji: &str,
    ) -> ApiResult<Message> {
        Ok(message(message_id.0, channel_id.0))
    }

    async fn mark_read(
        &self,
        channel_id: ChannelId,
        message_id: Option<MessageId>,
    ) -> ApiResult<()> {
        if self
            .mark_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.mark_read_calls.lock().unwrap().push((channel_id, message_id));
            return Err(server_error());
        }
        self.mark_read_calls.lock().unwrap().push((channel_id, message_id));
        Ok(())
    }

    async fn fetch_users(&self) -> ApiResult<Vec<User>> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn pending_invitation_count(&self) -> ApiResult<u32> {
        Ok(*self.invitation_count.lock().unwrap())
    }

    async fn accept_invitation(&self, invitation_id: i64) -> ApiResult<Channel> {
        Ok(channel(invitation_id, "invited"))
    }

    async fn decline_invitation(&self, _invitation_id: i64) -> ApiResult<()> {
        Ok(())
    }
}

/// In-memory [`Transport`] double.
pub(crate) struct FakeTransport {
    events: broadcast::Sender<SocketEvent>,
    pub sent: Mutex<Vec<ClientFrame>>,
    pub connects: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            sent: Mutex::new(Vec::new()),
            connects: AtomicU32::new(0),
        }
    }

    /// Inject an event as if it came off the socket.
    pub fn emit(&self, event: SocketEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<(), SocketError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn send(&self, frame: ClientFrame) {
        self.sent.lock().unwrap().push(frame);
    }

    fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.subscribe()
    }
}
