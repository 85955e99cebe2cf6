//! REST chat API collaborator.
//!
//! The engine consumes the backend as a plain request/response interface;
//! [`ChatApi`] is the seam, [`HttpChatApi`] the reqwest implementation.
//! Every call can fail independently, and the error taxonomy is what the
//! retry predicates key on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use parley_shared::auth::{AuthError, AuthProvider};
use parley_shared::{Channel, ChannelId, ChannelKind, Message, MessageId, MessageKind, User};

/// Errors surfaced by API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    /// Whether a retry has a chance of succeeding (server-side failures and
    /// timeouts, not client errors).
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Local profile pushed to the chat backend during bootstrap.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Payload for creating a message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_root: Option<MessageId>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            thread_root: None,
        }
    }
}

/// Payload for creating or editing a channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: ChannelKind,
}

/// The REST surface the engine depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Push the local identity so the chat server knows who this session is.
    async fn sync_identity(&self, profile: &Profile) -> ApiResult<User>;

    async fn fetch_channels(&self) -> ApiResult<Vec<Channel>>;
    async fn create_channel(&self, draft: &ChannelDraft) -> ApiResult<Channel>;
    async fn update_channel(&self, channel_id: ChannelId, draft: &ChannelDraft)
        -> ApiResult<Channel>;
    async fn delete_channel(&self, channel_id: ChannelId) -> ApiResult<()>;
    async fn join_channel(&self, channel_id: ChannelId) -> ApiResult<Channel>;
    async fn leave_channel(&self, channel_id: ChannelId) -> ApiResult<()>;

    /// Latest `limit` messages of a channel, ascending by id.
    async fn fetch_latest_messages(
        &self,
        channel_id: ChannelId,
        limit: u32,
    ) -> ApiResult<Vec<Message>>;
    /// Messages with ids strictly greater than `after`, ascending by id.
    async fn fetch_messages_after(
        &self,
        channel_id: ChannelId,
        after: MessageId,
    ) -> ApiResult<Vec<Message>>;
    async fn fetch_thread_messages(&self, root: MessageId) -> ApiResult<Vec<Message>>;

    async fn send_message(&self, channel_id: ChannelId, draft: &NewMessage) -> ApiResult<Message>;
    async fn update_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> ApiResult<Message>;
    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> ApiResult<()>;

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> ApiResult<Message>;
    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> ApiResult<Message>;

    /// Record a read receipt; `message_id = None` means "newest message".
    async fn mark_read(&self, channel_id: ChannelId, message_id: Option<MessageId>)
        -> ApiResult<()>;

    async fn fetch_users(&self) -> ApiResult<Vec<User>>;

    async fn pending_invitation_count(&self) -> ApiResult<u32>;
    async fn accept_invitation(&self, invitation_id: i64) -> ApiResult<Channel>;
    async fn decline_invitation(&self, invitation_id: i64) -> ApiResult<()>;
}

/// reqwest-backed implementation with bearer auth.
pub struct HttpChatApi {
    base_url: String,
    http: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
}

#[derive(Deserialize)]
struct CountBody {
    count: u32,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, auth: Arc<dyn AuthProvider>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            auth,
        }
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> ApiResult<reqwest::RequestBuilder> {
        let token = self
            .auth
            .get_access_token()
            .await
            .ok_or(AuthError::NotAuthenticated)?;
        let url = format!("{}{}", self.base_url, path);
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> ApiResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn execute_empty(&self, builder: reqwest::RequestBuilder) -> ApiResult<()> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn sync_identity(&self, profile: &Profile) -> ApiResult<User> {
        let builder = self
            .request(reqwest::Method::POST, "/users/sync")
            .await?
            .json(profile);
        self.execute(builder).await
    }

    async fn fetch_channels(&self) -> ApiResult<Vec<Channel>> {
        let builder = self.request(reqwest::Method::GET, "/channels").await?;
        self.execute(builder).await
    }

    async fn create_channel(&self, draft: &ChannelDraft) -> ApiResult<Channel> {
        let builder = self
            .request(reqwest::Method::POST, "/channels")
            .await?
            .json(draft);
        self.execute(builder).await
    }

    async fn update_channel(
        &self,
        channel_id: ChannelId,
        draft: &ChannelDraft,
    ) -> ApiResult<Channel> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("/channels/{channel_id}"))
            .await?
            .json(draft);
        self.execute(builder).await
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> ApiResult<()> {
        let builder = self
            .request(reqwest::Method::DELETE, &format!("/channels/{channel_id}"))
            .await?;
        self.execute_empty(builder).await
    }

    async fn join_channel(&self, channel_id: ChannelId) -> ApiResult<Channel> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/channels/{channel_id}/join"),
            )
            .await?;
        self.execute(builder).await
    }

    async fn leave_channel(&self, channel_id: ChannelId) -> ApiResult<()> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/channels/{channel_id}/leave"),
            )
            .await?;
        self.execute_empty(builder).await
    }

    async fn fetch_latest_messages(
        &self,
        channel_id: ChannelId,
        limit: u32,
    ) -> ApiResult<Vec<Message>> {
        let builder = self
            .request(
                reqwest::Method::GET,
                &format!("/channels/{channel_id}/messages?limit={limit}"),
            )
            .await?;
        self.execute(builder).await
    }

    async fn fetch_messages_after(
        &self,
        channel_id: ChannelId,
        after: MessageId,
    ) -> ApiResult<Vec<Message>> {
        let builder = self
            .request(
                reqwest::Method::GET,
                &format!("/channels/{channel_id}/messages?after={after}"),
            )
            .await?;
        self.execute(builder).await
    }

    async fn fetch_thread_messages(&self, root: MessageId) -> ApiResult<Vec<Message>> {
        let builder = self
            .request(reqwest::Method::GET, &format!("/messages/{root}/thread"))
            .await?;
        self.execute(builder).await
    }

    async fn send_message(&self, channel_id: ChannelId, draft: &NewMessage) -> ApiResult<Message> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/channels/{channel_id}/messages"),
            )
            .await?
            .json(draft);
        self.execute(builder).await
    }

    async fn update_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> ApiResult<Message> {
        let builder = self
            .request(
                reqwest::Method::PATCH,
                &format!("/channels/{channel_id}/messages/{message_id}"),
            )
            .await?
            .json(&json!({ "content": content }));
        self.execute(builder).await
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> ApiResult<()> {
        let builder = self
            .request(
                reqwest::Method::DELETE,
                &format!("/channels/{channel_id}/messages/{message_id}"),
            )
            .await?;
        self.execute_empty(builder).await
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> ApiResult<Message> {
        let builder = self
            .request(
                reqwest::Method::PUT,
                &format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}"),
            )
            .await?;
        self.execute(builder).await
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> ApiResult<Message> {
        let builder = self
            .request(
                reqwest::Method::DELETE,
                &format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}"),
            )
            .await?;
        self.execute(builder).await
    }

    async fn mark_read(
        &self,
        channel_id: ChannelId,
        message_id: Option<MessageId>,
    ) -> ApiResult<()> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/channels/{channel_id}/read"),
            )
            .await?
            .json(&json!({ "messageId": message_id }));
        self.execute_empty(builder).await
    }

    async fn fetch_users(&self) -> ApiResult<Vec<User>> {
        let builder = self.request(reqwest::Method::GET, "/users").await?;
        self.execute(builder).await
    }

    async fn pending_invitation_count(&self) -> ApiResult<u32> {
        let builder = self
            .request(reqwest::Method::GET, "/invitations/pending/count")
            .await?;
        let body: CountBody = self.execute(builder).await?;
        Ok(body.count)
    }

    async fn accept_invitation(&self, invitation_id: i64) -> ApiResult<Channel> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/invitations/{invitation_id}/accept"),
            )
            .await?;
        self.execute(builder).await
    }

    async fn decline_invitation(&self, invitation_id: i64) -> ApiResult<()> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/invitations/{invitation_id}/decline"),
            )
            .await?;
        self.execute_empty(builder).await
    }
}
