//! # parley-client
//!
//! The client-side chat engine: a reducer-shaped state store, the REST and
//! realtime collaborators, and the synchronization orchestrator that
//! reconciles cached messages, incremental fetches, and live socket events
//! without duplicates or flicker.
//!
//! Construction is explicit: the application builds an auth provider, wires
//! [`ChatClient`] (directly or via [`ChatClient::with_defaults`]), and reads
//! state through [`ChatStore`].  All mutation flows through the closed
//! [`reducer::ChatAction`] set.

pub mod api;
pub mod config;
pub mod reducer;
pub mod state;
pub mod store;
pub mod sync;
pub mod transport;

mod events;
mod persist;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{ApiError, ChannelDraft, ChatApi, HttpChatApi, NewMessage, Profile};
pub use config::ClientConfig;
pub use reducer::{ChatAction, StateChange};
pub use state::{ChatState, ConnectionStatus};
pub use store::{ChatStore, StoreEvent};
pub use sync::ChatClient;
pub use transport::Transport;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise structured logging for binaries and examples embedding the
/// engine.  Library code only emits `tracing` events and never installs a
/// subscriber on its own.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_net=debug,parley_store=info,warn")
    });

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
