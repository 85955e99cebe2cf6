//! # parley-shared
//!
//! Types shared across the Parley client engine: domain models, the realtime
//! wire protocol, the auth-provider interface, the common retry policy, and
//! the tunable constants.  This crate is I/O-free apart from the timer used
//! by [`retry::RetryPolicy`].

pub mod auth;
pub mod constants;
pub mod models;
pub mod protocol;
pub mod retry;
pub mod types;

pub use auth::{AuthError, AuthProvider, StaticTokenProvider};
pub use models::{Attachment, Channel, LastMessage, Message, Reaction, TypingIndicator, User};
pub use protocol::{demux, ClientFrame, ProtocolError, ServerEvent, ServerFrame};
pub use retry::RetryPolicy;
pub use types::{ChannelId, ChannelKind, MessageId, MessageKind, UserId};
