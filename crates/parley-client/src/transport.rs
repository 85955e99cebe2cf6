//! Realtime transport seam.
//!
//! The engine consumes the transport through this trait so tests can
//! substitute a double; the production implementation is
//! [`parley_net::ChatSocket`], constructed at application start and injected.

use async_trait::async_trait;
use tokio::sync::broadcast;

use parley_net::{ChatSocket, SocketError, SocketEvent};
use parley_shared::ClientFrame;

/// The transport surface the client engine depends on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), SocketError>;
    async fn disconnect(&self);
    /// At-most-once: implementations drop the frame when disconnected.
    async fn send(&self, frame: ClientFrame);
    fn subscribe(&self) -> broadcast::Receiver<SocketEvent>;
}

#[async_trait]
impl Transport for ChatSocket {
    async fn connect(&self) -> Result<(), SocketError> {
        ChatSocket::connect(self).await
    }

    async fn disconnect(&self) {
        ChatSocket::disconnect(self).await;
    }

    async fn send(&self, frame: ClientFrame) {
        ChatSocket::send(self, frame).await;
    }

    fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        ChatSocket::subscribe(self)
    }
}
