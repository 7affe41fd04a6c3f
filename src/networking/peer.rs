use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::networking::frame::{Frame, MAX_MESSAGE_SIZE, VERSION};
use crate::networking::pool::DispatchPool;
use crate::settings::Settings;
use crate::time::create_timestamp;

/// Minimum interval between two outbound connect attempts.
const CONNECT_COOLDOWN_MS: u64 = 10_000;

/// Extra wait allowed for the session beyond the upgrade timeout.
const CONNECT_GRACE_MS: u64 = 100;

/// Request ids stay in the non-negative `i64` range.
const REQUEST_ID_MASK: u64 = i64::MAX as u64;

/// Application callback for requests arriving on an accepted connection.
///
/// The handler is expected to eventually answer through
/// [`PeerSocket::send_response`], quoting the request id it was given.
/// Responses may go out in any order; correlation is by request id.
#[async_trait]
pub trait PeerServlet: Send + Sync {
    async fn handle(&self, socket: PeerSocket, request_id: u64, request: String);
}

/// Which side of the upgrade this endpoint is.
pub enum PeerRole {
    /// This node originated the upgrade and waits on correlated responses.
    Initiator,
    /// This node accepted the upgrade; inbound requests go to the servlet
    /// through the shared pool.
    Acceptor {
        servlet: Arc<dyn PeerServlet>,
        pool: DispatchPool,
    },
}

type OutboundSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;
type InboundSink = SplitSink<warp::ws::WebSocket, warp::ws::Message>;

/// The write half of a live upgraded connection.
enum PeerSession {
    Outbound(OutboundSink),
    Inbound(InboundSink),
}

impl PeerSession {
    async fn send_binary(&mut self, frame: Vec<u8>) -> Result<()> {
        match self {
            PeerSession::Outbound(sink) => sink
                .send(tungstenite::Message::binary(frame))
                .await
                .map_err(map_tungstenite_error),
            PeerSession::Inbound(sink) => sink
                .send(warp::ws::Message::binary(frame))
                .await
                .map_err(map_warp_error),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            PeerSession::Outbound(sink) => sink.close().await.map_err(map_tungstenite_error),
            PeerSession::Inbound(sink) => sink.close().await.map_err(map_warp_error),
        }
    }
}

fn map_tungstenite_error(err: tungstenite::Error) -> PeerError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            PeerError::SessionClosed
        }
        tungstenite::Error::Io(err) => PeerError::Io(err),
        other => PeerError::Io(io::Error::new(io::ErrorKind::Other, other)),
    }
}

fn map_warp_error(err: warp::Error) -> PeerError {
    PeerError::Io(io::Error::new(io::ErrorKind::Other, err))
}

struct SocketState {
    session: Option<PeerSession>,
    version: u32,
    next_request_id: u64,
    last_connect_ms: u64,
}

type Waiter = oneshot::Sender<Result<String>>;

struct PeerSocketInner {
    role: PeerRole,
    connect_timeout: Duration,
    read_timeout: Duration,
    idle_timeout: Option<Duration>,
    gzip_enabled: bool,
    // Serializes session/version/id mutation and every outbound send. Never
    // held while a caller waits on its response.
    state: Mutex<SocketState>,
    // Outstanding POST requests by id. Kept outside the state lock so a
    // timed-out caller can withdraw its waiter without contending on sends.
    pending: StdMutex<HashMap<u64, Waiter>>,
}

/// One peer-side connection endpoint.
///
/// Cloning yields another handle to the same endpoint; the reader task, the
/// servlet and request callers all share it.
#[derive(Clone)]
pub struct PeerSocket {
    inner: Arc<PeerSocketInner>,
}

impl PeerSocket {
    /// Create an unconnected initiator endpoint.
    pub fn new_client(settings: &Settings) -> PeerSocket {
        PeerSocket::new(PeerRole::Initiator, settings)
    }

    fn new(role: PeerRole, settings: &Settings) -> PeerSocket {
        PeerSocket {
            inner: Arc::new(PeerSocketInner {
                role,
                connect_timeout: settings.connect_timeout(),
                read_timeout: settings.read_timeout(),
                idle_timeout: settings.websocket_idle_timeout(),
                gzip_enabled: settings.gzip_enabled(),
                state: Mutex::new(SocketState {
                    session: None,
                    version: VERSION,
                    next_request_id: 0,
                    last_connect_ms: 0,
                }),
                pending: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Adopt a connection accepted by the peer server.
    pub async fn accept(
        ws: warp::ws::WebSocket,
        servlet: Arc<dyn PeerServlet>,
        pool: DispatchPool,
        settings: &Settings,
    ) -> PeerSocket {
        let socket = PeerSocket::new(PeerRole::Acceptor { servlet, pool }, settings);
        let (sink, stream) = ws.split();
        socket.inner.state.lock().await.session = Some(PeerSession::Inbound(sink));
        debug!("inbound websocket connection completed");
        spawn_inbound_reader(socket.clone(), stream);
        socket
    }

    /// Start a client session.
    ///
    /// Returns `true` once an upgraded session is available and `false` when
    /// the peer declined the upgrade or a connect attempt ran too recently;
    /// on `false` the caller falls back to plain HTTP.
    pub async fn start_client(&self, uri: &str) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            return Ok(true);
        }
        // Attempts are serialized by the endpoint lock and rate limited even
        // when they fail fast.
        let now = create_timestamp();
        if now < state.last_connect_ms + CONNECT_COOLDOWN_MS {
            return Ok(false);
        }
        state.last_connect_ms = now;

        let ws_config = WebSocketConfig {
            max_message_size: Some(MAX_MESSAGE_SIZE),
            max_frame_size: Some(MAX_MESSAGE_SIZE),
            ..WebSocketConfig::default()
        };
        let wait = self.inner.connect_timeout + Duration::from_millis(CONNECT_GRACE_MS);
        let upgrade = connect_async_with_config(uri, Some(ws_config), false);
        match tokio::time::timeout(wait, upgrade).await {
            Ok(Ok((stream, _response))) => {
                let (sink, stream) = stream.split();
                state.session = Some(PeerSession::Outbound(sink));
                debug!("outbound websocket connection with {} completed", uri);
                spawn_outbound_reader(self.clone(), stream);
                Ok(true)
            }
            Ok(Err(tungstenite::Error::Http(response))) => {
                debug!(
                    "websocket connection to {} rejected: {}",
                    uri,
                    response.status()
                );
                Ok(false)
            }
            Ok(Err(tungstenite::Error::Io(err))) => Err(PeerError::Io(err)),
            Ok(Err(err)) => {
                debug!("websocket connection to {} failed: {}", uri, err);
                Ok(false)
            }
            Err(_elapsed) => Err(PeerError::ConnectTimeout),
        }
    }

    /// Send a POST request and wait for the matching response.
    ///
    /// Used by the connection originator. Concurrent calls multiplex over
    /// the session; each gets a fresh request id.
    pub async fn do_post(&self, request: &str) -> Result<String> {
        let request_id;
        let waiter;
        {
            let mut state = self.inner.state.lock().await;
            if state.session.is_none() {
                return Err(PeerError::SessionNotOpen);
            }
            request_id = self.allocate_request_id(&mut state);
            let frame = Frame::encode(
                request.as_bytes(),
                request_id,
                state.version,
                self.inner.gzip_enabled,
            )?;
            let (sender, receiver) = oneshot::channel();
            // Registered before the send so a fast reply cannot beat the
            // waiter into the map.
            self.inner.pending.lock().unwrap().insert(request_id, sender);
            waiter = receiver;
            let session = match state.session.as_mut() {
                Some(session) => session,
                None => {
                    self.inner.pending.lock().unwrap().remove(&request_id);
                    return Err(PeerError::SessionNotOpen);
                }
            };
            if let Err(err) = session.send_binary(frame).await {
                self.inner.pending.lock().unwrap().remove(&request_id);
                return Err(err);
            }
        }
        match tokio::time::timeout(self.inner.read_timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(PeerError::SessionClosed),
            Err(_elapsed) => {
                self.inner.pending.lock().unwrap().remove(&request_id);
                Err(PeerError::ReadTimeout)
            }
        }
    }

    /// Send a POST response.
    ///
    /// Used by the connection acceptor. A response on a session that has
    /// already closed is dropped quietly; the peer has seen the close.
    pub async fn send_response(&self, request_id: u64, response: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let version = state.version;
        let gzip_enabled = self.inner.gzip_enabled;
        if let Some(session) = state.session.as_mut() {
            let frame = Frame::encode(response.as_bytes(), request_id, version, gzip_enabled)?;
            session.send_binary(frame).await?;
        }
        Ok(())
    }

    /// Close the websocket. Best effort; errors are logged and swallowed.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(mut session) = state.session.take() {
            if let Err(err) = session.close().await {
                debug!("error while closing websocket: {}", err);
            }
        }
    }

    // Ids wrap within the non-negative i64 range, skipping any id that is
    // still outstanding.
    fn allocate_request_id(&self, state: &mut SocketState) -> u64 {
        let pending = self.inner.pending.lock().unwrap();
        loop {
            let id = state.next_request_id;
            state.next_request_id = (state.next_request_id + 1) & REQUEST_ID_MASK;
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Process one inbound binary message.
    ///
    /// A frame that fails to decode is logged and dropped; the session stays
    /// up because framing is self-delimited per message. If the bad frame
    /// was a reply, its originator only learns through the read timeout.
    async fn on_message(&self, bytes: &[u8]) {
        let mut state = self.inner.state.lock().await;
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("error while processing websocket message: {}", err);
                return;
            }
        };
        state.version = frame.version.min(VERSION);
        match &self.inner.role {
            PeerRole::Acceptor { servlet, pool } => {
                let servlet = servlet.clone();
                let socket = self.clone();
                pool.submit(async move {
                    servlet.handle(socket, frame.request_id, frame.payload).await;
                });
            }
            PeerRole::Initiator => {
                let waiter = self.inner.pending.lock().unwrap().remove(&frame.request_id);
                match waiter {
                    Some(sender) => {
                        let _ = sender.send(Ok(frame.payload));
                    }
                    None => {
                        debug!("response for unknown request id {}", frame.request_id);
                    }
                }
            }
        }
    }

    /// The session ended; release every outstanding waiter exactly once.
    async fn on_close(&self) {
        let mut state = self.inner.state.lock().await;
        if state.session.take().is_some() {
            debug!("{} websocket connection closed", self.role_label());
        }
        let waiters: Vec<Waiter> = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(PeerError::SessionClosed));
        }
    }

    fn role_label(&self) -> &'static str {
        match self.inner.role {
            PeerRole::Initiator => "outbound",
            PeerRole::Acceptor { .. } => "inbound",
        }
    }
}

fn spawn_outbound_reader(
    socket: PeerSocket,
    mut stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
) {
    tokio::spawn(async move {
        loop {
            let message = match socket.inner.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, stream.next()).await {
                    Ok(message) => message,
                    Err(_elapsed) => {
                        debug!("outbound websocket connection idle, closing");
                        break;
                    }
                },
                None => stream.next().await,
            };
            match message {
                Some(Ok(message)) if message.is_binary() => {
                    socket.on_message(&message.into_data()).await
                }
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("error receiving websocket message: {}", err);
                    break;
                }
                None => break,
            }
        }
        socket.on_close().await;
    });
}

fn spawn_inbound_reader(socket: PeerSocket, mut stream: SplitStream<warp::ws::WebSocket>) {
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(message) if message.is_binary() => socket.on_message(message.as_bytes()).await,
                Ok(message) if message.is_close() => break,
                Ok(_) => {}
                Err(err) => {
                    debug!("error receiving websocket message: {}", err);
                    break;
                }
            }
        }
        socket.on_close().await;
    });
}
