//! Domain model structs shared by the store, transport, and client crates.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names, matching both the REST payloads and the on-disk cache format, so
//! the same types flow through all three layers without mapping code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, ChannelKind, MessageId, MessageKind, UserId};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Compact summary of the newest message in a channel, used for sidebar
/// previews without loading the channel's message list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    pub user_id: UserId,
    /// Truncated plain-text preview of the content.
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: ChannelKind,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub archived: bool,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single reaction on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: UserId,
}

/// Metadata for a file attached to a message.  The binary itself lives
/// behind `url`; this crate never touches file contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: i64,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
}

/// A single chat message.
///
/// A message belongs to exactly one channel for its lifetime.  A message may
/// itself be a thread root, in which case `thread_count` and
/// `last_thread_message_at` track its replies; a reply carries the root's id
/// in `thread_root`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub thread_root: Option<MessageId>,
    #[serde(default)]
    pub thread_count: u32,
    #[serde(default)]
    pub last_thread_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Whether any replies hang off this message.
    pub fn is_thread_root(&self) -> bool {
        self.thread_count > 0
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user.
///
/// The client keeps one canonical `User` per id; different event sources
/// (message payloads, presence events, bulk fetches) deliver partial views,
/// so updates go through [`User::merge`] instead of wholesale replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl User {
    /// Merge a partial update into this record.
    ///
    /// Present fields win; absent fields keep the known value, so a bare
    /// presence payload cannot erase profile data learned earlier.
    pub fn merge(&mut self, incoming: &User) {
        if !incoming.username.is_empty() {
            self.username = incoming.username.clone();
        }
        if incoming.display_name.is_some() {
            self.display_name = incoming.display_name.clone();
        }
        if incoming.avatar_url.is_some() {
            self.avatar_url = incoming.avatar_url.clone();
        }
        if incoming.last_seen_at.is_some() {
            self.last_seen_at = incoming.last_seen_at;
        }
        self.online = incoming.online;
    }
}

// ---------------------------------------------------------------------------
// Typing indicator
// ---------------------------------------------------------------------------

/// Ephemeral "user is typing" marker.  Never persisted.
///
/// Removed on an explicit stop event or a safety timeout, whichever fires
/// first; stop events can be dropped by the network, so both paths exist and
/// removal is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    #[serde(default)]
    pub thread_root: Option<MessageId>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> User {
        User {
            id: UserId::from(id),
            username: "ada".into(),
            display_name: Some("Ada L.".into()),
            avatar_url: Some("https://cdn/a.png".into()),
            online: false,
            last_seen_at: None,
        }
    }

    #[test]
    fn merge_keeps_profile_fields_on_presence_update() {
        let mut known = user("u1");
        // Bare presence payload: only id + online flag.
        let presence = User {
            id: UserId::from("u1"),
            username: String::new(),
            display_name: None,
            avatar_url: None,
            online: true,
            last_seen_at: Some(Utc::now()),
        };

        known.merge(&presence);
        assert!(known.online);
        assert!(known.last_seen_at.is_some());
        assert_eq!(known.username, "ada");
        assert_eq!(known.display_name.as_deref(), Some("Ada L."));
    }

    #[test]
    fn merge_takes_fresher_profile_fields() {
        let mut known = user("u1");
        let update = User {
            display_name: Some("Ada Lovelace".into()),
            ..user("u1")
        };

        known.merge(&update);
        assert_eq!(known.display_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn message_json_roundtrip_uses_camel_case() {
        let msg = Message {
            id: MessageId(42),
            channel_id: ChannelId(7),
            user_id: UserId::from("u1"),
            content: "hello".into(),
            kind: MessageKind::Text,
            thread_root: None,
            thread_count: 0,
            last_thread_message_at: None,
            reactions: vec![],
            attachments: vec![],
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["channelId"], 7);
        assert_eq!(json["userId"], "u1");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn partial_message_payload_fills_defaults() {
        // Servers may omit empty collections and zero counters.
        let json = serde_json::json!({
            "id": 5,
            "channelId": 1,
            "userId": "u9",
            "content": "hi",
            "createdAt": "2026-01-01T00:00:00Z"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.reactions.is_empty());
        assert_eq!(msg.thread_count, 0);
    }
}
