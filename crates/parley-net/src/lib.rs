// Realtime transport layer: one reconnecting WebSocket per client.

pub mod backoff;
pub mod socket;

pub use backoff::{Backoff, BackoffConfig};
pub use socket::{ChatSocket, SocketConfig, SocketError, SocketEvent};
