//! Client engine configuration.
//!
//! All settings have sensible defaults apart from the two endpoints, so an
//! application only needs to point the engine at its backend.

use parley_shared::constants::DEFAULT_PAGE_SIZE;

use crate::api::Profile;

/// Configuration for [`crate::ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST chat API, e.g. `https://chat.example.com/api`.
    pub rest_url: String,

    /// WebSocket endpoint of the realtime server, e.g.
    /// `wss://chat.example.com/ws`.
    pub socket_url: String,

    /// Messages fetched per page and per full refresh.
    /// Default: `50`
    pub page_size: u32,

    /// Local profile pushed to the backend during bootstrap.
    pub profile: Profile,
}

impl ClientConfig {
    pub fn new(rest_url: impl Into<String>, socket_url: impl Into<String>, profile: Profile) -> Self {
        Self {
            rest_url: rest_url.into(),
            socket_url: socket_url.into(),
            page_size: DEFAULT_PAGE_SIZE,
            profile,
        }
    }
}
