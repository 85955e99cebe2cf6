//! Wire protocol for the realtime connection.
//!
//! Inbound frames arrive as JSON envelopes `{"type": <string>, "data": {..}}`.
//! A generic `"message"` frame carries an embedded `action` and fans out to
//! created/updated/deleted events during [`demux`]; every other frame type is
//! already a named event.  Subscribers only ever see [`ServerEvent`] values,
//! never raw envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Channel, Message, Reaction, User};
use crate::types::{ChannelId, MessageId, UserId};

/// Errors produced while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame of a known type carried a payload we could not decode.
    #[error("malformed '{kind}' frame: {source}")]
    MalformedFrame {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// JSON (de)serialization error outside a typed payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Raw inbound envelope as read off the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ServerFrame {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A fully-typed event delivered to transport subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Handshake acknowledged; the session is live.
    ConnectionEstablished { user_id: Option<UserId> },
    /// The server rejected our credentials.
    AuthenticationFailed { reason: String },
    /// Server-side error frame not tied to a request.
    ServerError { message: String },

    MessageCreated(Message),
    MessageUpdated(Message),
    MessageDeleted {
        channel_id: ChannelId,
        message_id: MessageId,
    },

    TypingStarted {
        channel_id: ChannelId,
        user_id: UserId,
        thread_root: Option<MessageId>,
    },
    TypingStopped {
        channel_id: ChannelId,
        user_id: UserId,
        thread_root: Option<MessageId>,
    },

    /// Presence change for a single user (partial payload).
    Presence { user: User },

    /// Full replacement reaction list for one message.
    ReactionUpdated {
        message_id: MessageId,
        reactions: Vec<Reaction>,
    },
    /// Thread counters changed on a root message.
    ThreadUpdated {
        message_id: MessageId,
        thread_count: u32,
        last_thread_message_at: Option<DateTime<Utc>>,
    },

    ChannelCreated(Channel),
    ChannelUpdated(Channel),
    ChannelDeleted { channel_id: ChannelId },
    ChannelInvitation {
        channel_id: ChannelId,
        channel_name: String,
        invited_by: UserId,
    },
    UserJoinedChannel {
        channel_id: ChannelId,
        user: User,
    },
    ReadReceipt {
        channel_id: ChannelId,
        user_id: UserId,
        message_id: Option<MessageId>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFrameData {
    action: String,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    channel_id: Option<ChannelId>,
    #[serde(default)]
    message_id: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingFrameData {
    channel_id: ChannelId,
    user_id: UserId,
    #[serde(default)]
    thread_root: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionFrameData {
    message_id: MessageId,
    #[serde(default)]
    reactions: Vec<Reaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadFrameData {
    message_id: MessageId,
    thread_count: u32,
    #[serde(default)]
    last_thread_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvitationFrameData {
    channel_id: ChannelId,
    channel_name: String,
    invited_by: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinedFrameData {
    channel_id: ChannelId,
    user: User,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceiptFrameData {
    channel_id: ChannelId,
    user_id: UserId,
    #[serde(default)]
    message_id: Option<MessageId>,
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::MalformedFrame {
        kind: kind.to_string(),
        source,
    })
}

/// Demultiplex a raw envelope into a typed event.
///
/// Returns `Ok(None)` for frame types this client does not know about;
/// unknown frames are dropped, never an error, so old clients survive new
/// server features.
pub fn demux(frame: ServerFrame) -> Result<Option<ServerEvent>, ProtocolError> {
    let ServerFrame { kind, data } = frame;
    let event = match kind.as_str() {
        "connection_established" => ServerEvent::ConnectionEstablished {
            user_id: data
                .get("userId")
                .and_then(|v| v.as_str())
                .map(UserId::from),
        },
        "authentication_failed" => ServerEvent::AuthenticationFailed {
            reason: data
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("authentication failed")
                .to_string(),
        },
        "error" => ServerEvent::ServerError {
            message: data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown server error")
                .to_string(),
        },
        "message" => {
            let body: MessageFrameData = payload(&kind, data)?;
            match body.action.as_str() {
                "created" => match body.message {
                    Some(m) => ServerEvent::MessageCreated(m),
                    None => return missing_field(&kind, "message"),
                },
                "updated" => match body.message {
                    Some(m) => ServerEvent::MessageUpdated(m),
                    None => return missing_field(&kind, "message"),
                },
                "deleted" => match (body.channel_id, body.message_id) {
                    (Some(channel_id), Some(message_id)) => ServerEvent::MessageDeleted {
                        channel_id,
                        message_id,
                    },
                    _ => return missing_field(&kind, "channelId/messageId"),
                },
                _ => return Ok(None),
            }
        }
        "typing_start" => {
            let body: TypingFrameData = payload(&kind, data)?;
            ServerEvent::TypingStarted {
                channel_id: body.channel_id,
                user_id: body.user_id,
                thread_root: body.thread_root,
            }
        }
        "typing_stop" => {
            let body: TypingFrameData = payload(&kind, data)?;
            ServerEvent::TypingStopped {
                channel_id: body.channel_id,
                user_id: body.user_id,
                thread_root: body.thread_root,
            }
        }
        "presence" => ServerEvent::Presence {
            user: payload(&kind, data)?,
        },
        "reaction_updated" => {
            let body: ReactionFrameData = payload(&kind, data)?;
            ServerEvent::ReactionUpdated {
                message_id: body.message_id,
                reactions: body.reactions,
            }
        }
        "thread_updated" => {
            let body: ThreadFrameData = payload(&kind, data)?;
            ServerEvent::ThreadUpdated {
                message_id: body.message_id,
                thread_count: body.thread_count,
                last_thread_message_at: body.last_thread_message_at,
            }
        }
        "channel_created" => ServerEvent::ChannelCreated(payload(&kind, data)?),
        "channel_updated" => ServerEvent::ChannelUpdated(payload(&kind, data)?),
        "channel_deleted" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Body {
                channel_id: ChannelId,
            }
            let body: Body = payload(&kind, data)?;
            ServerEvent::ChannelDeleted {
                channel_id: body.channel_id,
            }
        }
        "channel_invitation" => {
            let body: InvitationFrameData = payload(&kind, data)?;
            ServerEvent::ChannelInvitation {
                channel_id: body.channel_id,
                channel_name: body.channel_name,
                invited_by: body.invited_by,
            }
        }
        "user_joined_channel" => {
            let body: JoinedFrameData = payload(&kind, data)?;
            ServerEvent::UserJoinedChannel {
                channel_id: body.channel_id,
                user: body.user,
            }
        }
        "read_receipt" => {
            let body: ReadReceiptFrameData = payload(&kind, data)?;
            ServerEvent::ReadReceipt {
                channel_id: body.channel_id,
                user_id: body.user_id,
                message_id: body.message_id,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn missing_field(kind: &str, field: &str) -> Result<Option<ServerEvent>, ProtocolError> {
    Err(ProtocolError::MalformedFrame {
        kind: kind.to_string(),
        source: serde::de::Error::custom(format!("missing field `{field}`")),
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Outbound control frame.
///
/// Every frame carries a client-generated id and a timestamp so the server
/// can deduplicate and order control traffic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub frame_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl ClientFrame {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            frame_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn authenticate(token: &str) -> Self {
        Self::new("authenticate", json!({ "token": token }))
    }

    pub fn heartbeat() -> Self {
        Self::new("heartbeat", json!({}))
    }

    pub fn typing_start(channel_id: ChannelId, thread_root: Option<MessageId>) -> Self {
        Self::new(
            "typing_start",
            json!({ "channelId": channel_id, "threadRoot": thread_root }),
        )
    }

    pub fn typing_stop(channel_id: ChannelId, thread_root: Option<MessageId>) -> Self {
        Self::new(
            "typing_stop",
            json!({ "channelId": channel_id, "threadRoot": thread_root }),
        )
    }

    pub fn mark_read(channel_id: ChannelId, message_id: Option<MessageId>) -> Self {
        Self::new(
            "mark_read",
            json!({ "channelId": channel_id, "messageId": message_id }),
        )
    }

    /// Serialize to the text payload sent over the socket.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demux_json(v: Value) -> Option<ServerEvent> {
        demux(serde_json::from_value(v).unwrap()).unwrap()
    }

    #[test]
    fn message_frame_fans_out_by_action() {
        let created = demux_json(json!({
            "type": "message",
            "data": {
                "action": "created",
                "message": {
                    "id": 10, "channelId": 1, "userId": "u1",
                    "content": "hi", "createdAt": "2026-01-01T00:00:00Z"
                }
            }
        }));
        assert!(matches!(created, Some(ServerEvent::MessageCreated(m)) if m.id == MessageId(10)));

        let deleted = demux_json(json!({
            "type": "message",
            "data": { "action": "deleted", "channelId": 1, "messageId": 10 }
        }));
        assert_eq!(
            deleted,
            Some(ServerEvent::MessageDeleted {
                channel_id: ChannelId(1),
                message_id: MessageId(10),
            })
        );
    }

    #[test]
    fn unknown_frame_types_are_dropped_not_errors() {
        assert_eq!(
            demux_json(json!({ "type": "link_preview_ready", "data": { "url": "x" } })),
            None
        );
        // Unknown message sub-action is dropped too.
        assert_eq!(
            demux_json(json!({ "type": "message", "data": { "action": "pinned" } })),
            None
        );
    }

    #[test]
    fn malformed_known_frame_is_an_error() {
        let frame = ServerFrame {
            kind: "typing_start".into(),
            data: json!({ "channelId": "not-a-number" }),
        };
        assert!(demux(frame).is_err());
    }

    #[test]
    fn typing_frames_carry_thread_root() {
        let ev = demux_json(json!({
            "type": "typing_start",
            "data": { "channelId": 3, "userId": "u2", "threadRoot": 99 }
        }));
        assert_eq!(
            ev,
            Some(ServerEvent::TypingStarted {
                channel_id: ChannelId(3),
                user_id: UserId::from("u2"),
                thread_root: Some(MessageId(99)),
            })
        );
    }

    #[test]
    fn reaction_frame_replaces_whole_list() {
        let ev = demux_json(json!({
            "type": "reaction_updated",
            "data": {
                "messageId": 5,
                "reactions": [ { "emoji": "👍", "userId": "u1" } ]
            }
        }));
        match ev {
            Some(ServerEvent::ReactionUpdated { message_id, reactions }) => {
                assert_eq!(message_id, MessageId(5));
                assert_eq!(reactions.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn client_frame_serializes_with_type_tag() {
        let frame = ClientFrame::mark_read(ChannelId(7), Some(MessageId(55)));
        let text = frame.to_text().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "mark_read");
        assert_eq!(v["data"]["channelId"], 7);
        assert_eq!(v["data"]["messageId"], 55);
        assert!(v["frameId"].is_string());
    }
}
