//! The realtime WebSocket connection.
//!
//! One [`ChatSocket`] owns at most one live connection at a time and
//! multiplexes every channel over it.  External code talks to the connection
//! task through a command channel and receives typed [`SocketEvent`]s through
//! a broadcast channel; raw wire frames never leave this module.
//!
//! Lifecycle: `disconnected → connecting → connected`, then either a clean
//! close (ours or the server's) or an unintentional loss followed by
//! exponential-backoff reconnection.  The heartbeat timer and the reconnect
//! timer are the only background activity, and both die with the connection
//! task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use parley_shared::auth::{AuthError, AuthProvider};
use parley_shared::constants::HEARTBEAT_INTERVAL;
use parley_shared::protocol::{demux, ClientFrame, ProtocolError, ServerEvent, ServerFrame};
use parley_shared::retry::RetryPolicy;

use crate::backoff::{Backoff, BackoffConfig};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket endpoint, e.g. `wss://chat.example.com/ws`.
    pub url: String,
    pub heartbeat_interval: Duration,
    pub backoff: BackoffConfig,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Errors surfaced by [`ChatSocket::connect`].
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("no access token available")]
    NotAuthenticated,

    #[error("authentication rejected: {reason}")]
    AuthRejected { reason: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed during handshake")]
    HandshakeClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Events delivered to transport subscribers.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// The handshake completed and the session is live.
    Established,
    /// The connection dropped unintentionally; reconnection will follow if
    /// the backoff schedule is not exhausted.
    Lost,
    /// The connection ended cleanly (local `disconnect()` or a server
    /// close frame).  No reconnection follows.
    Closed,
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// All reconnect attempts failed; a user-initiated `connect()` is
    /// required to try again.
    Failed,
    /// The server rejected our credentials even after a token refresh.
    AuthFailed { reason: String },
    /// A demultiplexed server event.
    Event(ServerEvent),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct Session {
    sink: WsSink,
    stream: WsSource,
}

enum Command {
    Send(ClientFrame),
    Disconnect,
}

enum SessionEnd {
    /// Local disconnect or clean server close.
    Intentional,
    /// Network loss; candidate for reconnection.
    Lost,
}

enum ReconnectOutcome {
    Reconnected(Session),
    /// `disconnect()` arrived while waiting.
    Aborted,
    AuthFailed(String),
    Exhausted,
}

struct Shared {
    config: SocketConfig,
    auth: Arc<dyn AuthProvider>,
    events: broadcast::Sender<SocketEvent>,
    connected: AtomicBool,
    /// Set before a local close so the session end is not mistaken for a
    /// network loss.
    intentional: AtomicBool,
}

#[derive(Default)]
struct Slot {
    cmd_tx: Option<mpsc::Sender<Command>>,
    task: Option<JoinHandle<()>>,
}

/// Handle to the single realtime connection.
///
/// Explicitly constructed and passed to whoever needs it; there is no global
/// instance.  Cloning the handle is done by wrapping it in an `Arc`.
pub struct ChatSocket {
    shared: Arc<Shared>,
    slot: Mutex<Slot>,
}

impl ChatSocket {
    pub fn new(config: SocketConfig, auth: Arc<dyn AuthProvider>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                config,
                auth,
                events,
                connected: AtomicBool::new(false),
                intentional: AtomicBool::new(false),
            }),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Subscribe to transport events.  Subscribers never see raw frames.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events.subscribe()
    }

    /// Whether a session is currently live (not merely reconnecting).
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Establish the connection and spawn the connection task.
    ///
    /// Idempotent: callers racing into `connect()` serialize on the
    /// connection slot, so a second caller finds the first caller's live
    /// session (or its error) instead of opening a second socket.
    pub async fn connect(&self) -> Result<(), SocketError> {
        let mut slot = self.slot.lock().await;

        if slot.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        self.shared.intentional.store(false, Ordering::SeqCst);

        let session = self.shared.establish().await.map_err(|e| {
            if let SocketError::AuthRejected { reason } = &e {
                let _ = self.shared.events.send(SocketEvent::AuthFailed {
                    reason: reason.clone(),
                });
            }
            e
        })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let shared = Arc::clone(&self.shared);
        slot.cmd_tx = Some(cmd_tx);
        slot.task = Some(tokio::spawn(supervise(shared, cmd_rx, session)));

        Ok(())
    }

    /// Close the connection and cancel all timers.
    ///
    /// Safe to call at any time, including while a reconnect is pending.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        self.shared.intentional.store(true, Ordering::SeqCst);

        if let Some(cmd_tx) = slot.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Disconnect).await;
        }
        if let Some(task) = slot.task.take() {
            let _ = task.await;
        }
    }

    /// Send a control frame.
    ///
    /// At-most-once from the client's perspective: when no session is live
    /// the frame is dropped with a warning, never queued, never an error.
    pub async fn send(&self, frame: ClientFrame) {
        if !self.is_connected() {
            warn!(kind = %frame.kind, "not connected, dropping frame");
            return;
        }
        let slot = self.slot.lock().await;
        match &slot.cmd_tx {
            Some(cmd_tx) => {
                if cmd_tx.send(Command::Send(frame)).await.is_err() {
                    warn!("connection task gone, frame dropped");
                }
            }
            None => warn!(kind = %frame.kind, "not connected, dropping frame"),
        }
    }
}

impl Shared {
    /// Open the socket and run the authenticated handshake.
    ///
    /// An auth-specific rejection refreshes the token once and retries once:
    /// the same one-retry-after-refreshing-a-credential shape as the
    /// read-receipt path, expressed through the shared [`RetryPolicy`].
    async fn establish(&self) -> Result<Session, SocketError> {
        let refreshed = AtomicBool::new(false);
        let policy = RetryPolicy::new(2, Duration::ZERO);

        policy
            .run(
                || async {
                    let token = if refreshed.swap(true, Ordering::SeqCst) {
                        self.auth.refresh_token().await?
                    } else {
                        self.auth
                            .get_access_token()
                            .await
                            .ok_or(SocketError::NotAuthenticated)?
                    };
                    self.handshake(&token).await
                },
                |e| matches!(e, SocketError::AuthRejected { .. }),
            )
            .await
    }

    async fn handshake(&self, token: &str) -> Result<Session, SocketError> {
        debug!(url = %self.config.url, "connecting");
        let (ws, _) = connect_async(&self.config.url).await?;
        let (mut sink, mut stream) = ws.split();

        let auth_frame = ClientFrame::authenticate(token).to_text()?;
        sink.send(WsMessage::Text(auth_frame)).await?;

        while let Some(msg) = stream.next().await {
            match msg? {
                WsMessage::Text(text) => {
                    let frame = ServerFrame::from_text(&text)?;
                    match demux(frame)? {
                        Some(ServerEvent::ConnectionEstablished { user_id }) => {
                            info!(user = ?user_id, "connection established");
                            return Ok(Session { sink, stream });
                        }
                        Some(ServerEvent::AuthenticationFailed { reason }) => {
                            return Err(SocketError::AuthRejected { reason });
                        }
                        Some(ServerEvent::ServerError { message }) => {
                            return Err(SocketError::Handshake(message));
                        }
                        _ => {
                            // Anything else before the ack is out of order;
                            // skip it rather than failing the handshake.
                            debug!("ignoring pre-handshake frame");
                        }
                    }
                }
                WsMessage::Close(_) => return Err(SocketError::HandshakeClosed),
                _ => {}
            }
        }

        Err(SocketError::HandshakeClosed)
    }
}

/// Connection task: runs sessions and reconnection episodes until the
/// connection ends cleanly, terminally fails, or authentication dies.
async fn supervise(shared: Arc<Shared>, mut cmd_rx: mpsc::Receiver<Command>, session: Session) {
    let mut session = session;
    loop {
        shared.connected.store(true, Ordering::SeqCst);
        let _ = shared.events.send(SocketEvent::Established);

        let end = run_session(&shared, &mut session, &mut cmd_rx).await;
        shared.connected.store(false, Ordering::SeqCst);

        match end {
            SessionEnd::Intentional => {
                let _ = shared.events.send(SocketEvent::Closed);
                return;
            }
            SessionEnd::Lost => {
                let _ = shared.events.send(SocketEvent::Lost);
                if shared.intentional.load(Ordering::SeqCst) {
                    let _ = shared.events.send(SocketEvent::Closed);
                    return;
                }
                match reconnect(&shared, &mut cmd_rx).await {
                    ReconnectOutcome::Reconnected(next) => session = next,
                    ReconnectOutcome::Aborted => {
                        let _ = shared.events.send(SocketEvent::Closed);
                        return;
                    }
                    ReconnectOutcome::AuthFailed(reason) => {
                        warn!(reason = %reason, "reconnect authentication failed");
                        let _ = shared.events.send(SocketEvent::AuthFailed { reason });
                        return;
                    }
                    ReconnectOutcome::Exhausted => {
                        warn!("reconnect attempts exhausted");
                        let _ = shared.events.send(SocketEvent::Failed);
                        return;
                    }
                }
            }
        }
    }
}

async fn run_session(
    shared: &Shared,
    session: &mut Session,
    cmd_rx: &mut mpsc::Receiver<Command>,
) -> SessionEnd {
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + shared.config.heartbeat_interval,
        shared.config.heartbeat_interval,
    );

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(frame)) => match frame.to_text() {
                    Ok(text) => {
                        if let Err(e) = session.sink.send(WsMessage::Text(text)).await {
                            warn!(error = %e, "send failed, connection lost");
                            return SessionEnd::Lost;
                        }
                    }
                    Err(e) => warn!(error = %e, "unencodable frame dropped"),
                },
                Some(Command::Disconnect) | None => {
                    let _ = session.sink.send(WsMessage::Close(None)).await;
                    return SessionEnd::Intentional;
                }
            },

            msg = session.stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => dispatch_frame(shared, &text),
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = session.sink.send(WsMessage::Pong(payload)).await;
                }
                Some(Ok(WsMessage::Close(_))) => {
                    info!("server closed the connection");
                    return SessionEnd::Intentional;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "socket error");
                    return SessionEnd::Lost;
                }
                None => {
                    warn!("socket stream ended");
                    return SessionEnd::Lost;
                }
            },

            _ = heartbeat.tick() => {
                match ClientFrame::heartbeat().to_text() {
                    Ok(text) => {
                        if session.sink.send(WsMessage::Text(text)).await.is_err() {
                            warn!("heartbeat failed, connection lost");
                            return SessionEnd::Lost;
                        }
                    }
                    Err(e) => warn!(error = %e, "heartbeat frame failed to encode"),
                }
            }
        }
    }
}

fn dispatch_frame(shared: &Shared, text: &str) {
    match ServerFrame::from_text(text).and_then(demux) {
        Ok(Some(event)) => {
            let _ = shared.events.send(SocketEvent::Event(event));
        }
        Ok(None) => debug!("ignoring unknown frame type"),
        Err(e) => debug!(error = %e, "undecodable frame dropped"),
    }
}

/// One reconnection episode.  Frames sent while the connection is down are
/// dropped (with a warning), matching the at-most-once send contract.
async fn reconnect(shared: &Shared, cmd_rx: &mut mpsc::Receiver<Command>) -> ReconnectOutcome {
    let mut backoff = Backoff::new(shared.config.backoff.clone());

    loop {
        let Some(delay) = backoff.next_delay() else {
            return ReconnectOutcome::Exhausted;
        };
        let _ = shared.events.send(SocketEvent::Reconnecting {
            attempt: backoff.attempt(),
            delay,
        });

        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        warn!(kind = %frame.kind, "not connected, dropping frame");
                    }
                    Some(Command::Disconnect) | None => return ReconnectOutcome::Aborted,
                },
            }
        }

        match shared.establish().await {
            Ok(session) => return ReconnectOutcome::Reconnected(session),
            Err(SocketError::AuthRejected { reason }) => {
                return ReconnectOutcome::AuthFailed(reason);
            }
            Err(SocketError::NotAuthenticated) => {
                return ReconnectOutcome::AuthFailed("no access token available".into());
            }
            Err(SocketError::Auth(e)) => return ReconnectOutcome::AuthFailed(e.to_string()),
            Err(e) => {
                debug!(error = %e, attempt = backoff.attempt(), "reconnect attempt failed");
            }
        }
    }
}
