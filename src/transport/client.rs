use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use strum_macros::Display;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::error::TransportError;
use super::protocol::{parse_server_message, room_name, ClientMessage, PositionUpdate, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 64;
const CLIENT_DISCONNECT: &str = "io client disconnect";
const SERVER_DISCONNECT: &str = "io server disconnect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    Broadcast(PositionUpdate),
    AuthRefreshed,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Consecutive failed attempts tolerated before giving up.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

/// Authenticated realtime connection with automatic reconnection.
///
/// At most one socket exists per client. Observers subscribe to
/// [`TransportEvent`]s; [`TransportClient::destroy`] drops every observer.
pub struct TransportClient {
    config: TransportConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<TransportEvent>,
    // Latest credential, read again on every reconnect.
    token: Arc<watch::Sender<String>>,
    worker: Option<WorkerHandle>,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (token, _) = watch::channel(String::new());
        Self {
            config,
            state: Arc::new(state),
            events,
            token: Arc::new(token),
            worker: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens a connection to `url`, replacing any existing one.
    pub async fn connect(&mut self, url: &str, token: &str) {
        self.disconnect().await;

        self.token.send_replace(token.to_string());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_connection(
            url.to_string(),
            self.config.clone(),
            self.token.clone(),
            self.state.clone(),
            self.events.clone(),
            outbound_rx,
            stop_rx,
        ));

        self.worker = Some(WorkerHandle {
            stop_tx,
            join,
            outbound,
        });
    }

    pub fn join_room(&self, scope: &str, id: &str) {
        self.emit(ClientMessage::JoinRoom {
            room: room_name(scope, id),
        });
    }

    pub fn leave_room(&self, scope: &str, id: &str) {
        self.emit(ClientMessage::LeaveRoom {
            room: room_name(scope, id),
        });
    }

    /// Fire and forget. Dropped when not connected.
    pub fn send_position(&self, update: PositionUpdate) {
        self.emit(ClientMessage::PositionUpdate(update));
    }

    /// Pushes a new credential over the open connection. Later reconnects
    /// authenticate with it as well.
    pub fn refresh_auth(&self, token: &str) {
        self.token.send_replace(token.to_string());
        self.emit(ClientMessage::RefreshAuth {
            token: token.to_string(),
        });
    }

    /// Closes the connection and removes every observer. Safe to call twice.
    pub async fn destroy(&mut self) {
        self.disconnect().await;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        self.events = events;
    }

    async fn disconnect(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
            self.state.send_replace(ConnectionState::Idle);
        }
    }

    fn emit(&self, message: ClientMessage) {
        match &self.worker {
            Some(worker) if self.is_connected() => {
                let _ = worker.outbound.send(message);
            }
            _ => debug!("Dropping {:?} while {}", message, self.state()),
        }
    }
}

enum SessionEnd {
    Stopped,
    Lost(String),
}

async fn run_connection(
    url: String,
    config: TransportConfig,
    token: Arc<watch::Sender<String>>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut failures = 0u32;

    loop {
        state.send_replace(ConnectionState::Connecting);
        let current_token = token.borrow().clone();
        let attempt = tokio::select! {
            result = open(&url, &current_token, config.connect_timeout) => result,
            _ = &mut stop_rx => return,
        };

        match attempt {
            Ok(ws) => {
                failures = 0;
                info!("Connected to {}", url);
                state.send_replace(ConnectionState::Connected);
                let _ = events.send(TransportEvent::Connected);

                let end = run_session(ws, &events, &mut outbound, &mut stop_rx).await;
                state.send_replace(ConnectionState::Disconnected);
                match end {
                    SessionEnd::Stopped => {
                        let _ = events.send(TransportEvent::Disconnected {
                            reason: CLIENT_DISCONNECT.to_string(),
                        });
                        return;
                    }
                    SessionEnd::Lost(reason) => {
                        warn!("Connection lost: {}", reason);
                        let _ = events.send(TransportEvent::Disconnected { reason });
                    }
                }
            }
            Err(e) => {
                failures += 1;
                state.send_replace(ConnectionState::Disconnected);
                warn!("Connection attempt {} to {} failed: {}", failures, url, e);
                let _ = events.send(TransportEvent::Error {
                    message: e.to_string(),
                });
                if failures > config.reconnect_attempts {
                    warn!("Giving up on {} after {} attempts", url, failures);
                    return;
                }
            }
        }

        // anything queued for the dead socket is stale now
        while outbound.try_recv().is_ok() {}

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = &mut stop_rx => return,
        }
    }
}

async fn open(url: &str, token: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    let mut request = url.into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| TransportError::InvalidToken(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match tokio::time::timeout(timeout, connect_async(request)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TransportError::Timeout),
    }
}

async fn run_session(
    ws: WsStream,
    events: &broadcast::Sender<TransportEvent>,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
    stop_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = send(&mut write, &message).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                None => return close(&mut write, outbound).await,
            },
            frame = read.next() => {
                if let Some(end) = handle_frame(frame, events) {
                    return end;
                }
            }
            _ = &mut *stop_rx => return close(&mut write, outbound).await,
        }
    }
}

/// Flushes what the caller queued before asking to stop, then closes.
async fn close(
    write: &mut SplitSink<WsStream, Message>,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> SessionEnd {
    while let Ok(message) = outbound.try_recv() {
        if send(write, &message).await.is_err() {
            break;
        }
    }
    let _ = write.send(Message::Close(None)).await;
    SessionEnd::Stopped
}

async fn send(
    write: &mut SplitSink<WsStream, Message>,
    message: &ClientMessage,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(message)?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

fn handle_frame(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    events: &broadcast::Sender<TransportEvent>,
) -> Option<SessionEnd> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            match parse_server_message(text.as_str()) {
                Ok(Some(ServerMessage::AuthRefreshed)) => {
                    let _ = events.send(TransportEvent::AuthRefreshed);
                }
                Ok(Some(ServerMessage::Broadcast(update))) => {
                    let _ = events.send(TransportEvent::Broadcast(update));
                }
                Ok(Some(ServerMessage::Error(message))) => {
                    warn!("Server error: {}", message);
                    let _ = events.send(TransportEvent::Error { message });
                }
                Ok(None) => {}
                Err(e) => warn!("Malformed frame: {}", e),
            }
            None
        }
        Some(Ok(Message::Close(frame))) => {
            let reason = frame
                .map(|f| f.reason.to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| SERVER_DISCONNECT.to_string());
            Some(SessionEnd::Lost(reason))
        }
        Some(Ok(_)) => None,
        Some(Err(e)) => Some(SessionEnd::Lost(e.to_string())),
        None => Some(SessionEnd::Lost("transport close".to_string())),
    }
}
