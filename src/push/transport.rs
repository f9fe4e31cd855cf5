use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Session;
use crate::errors::AppError;
use crate::push::frame::{self, Frame, Handshake};

/// A named event exactly as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub payload: Value,
}

/// Opens connections for the push channel. Swapped for a scripted fake in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, AppError>;
}

/// One established connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Next named event. `Ok(None)` means the peer closed the connection.
    async fn recv(&mut self) -> Result<Option<RawEvent>, AppError>;

    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the backend's socket.io endpoint over a WebSocket.
pub struct WsConnector {
    endpoint: Url,
    session: Session,
}

impl WsConnector {
    pub fn new(socket_url: &str, session: Session) -> Result<Self, AppError> {
        Ok(Self { endpoint: socket_endpoint(socket_url)?, session })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// `https://host/` becomes `wss://host/socket.io/?EIO=4&transport=websocket`.
pub fn socket_endpoint(socket_url: &str) -> Result<Url, AppError> {
    let mut url = Url::parse(socket_url)
        .map_err(|e| AppError::config("INBOX_SOCKET_URL", format!("'{socket_url}': {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(AppError::config(
                "INBOX_SOCKET_URL",
                format!("unsupported scheme '{other}'"),
            ))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AppError::config("INBOX_SOCKET_URL", "cannot switch to a websocket scheme"))?;
    url.set_path("/socket.io/");
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, AppError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let cookie = HeaderValue::from_str(self.session.cookie())
            .map_err(|e| AppError::config("INBOX_SESSION_COOKIE", e.to_string()))?;
        request.headers_mut().insert(COOKIE, cookie);

        let (mut stream, _) = tokio_tungstenite::connect_async(request).await?;

        // ── engine.io open ───────────────────────────────────────────────────
        let handshake = loop {
            match next_frame(&mut stream).await? {
                Some(Frame::Open(handshake)) => break handshake,
                Some(Frame::Noop) => continue,
                Some(other) => {
                    return Err(AppError::frame(format!("expected open handshake, got {other:?}")))
                }
                None => return Err(AppError::frame("closed during handshake")),
            }
        };
        debug!("Push handshake complete (sid {})", handshake.sid);

        // ── socket.io namespace connect ──────────────────────────────────────
        stream.send(Message::text(frame::CONNECT)).await?;
        loop {
            match next_frame(&mut stream).await? {
                Some(Frame::Connected) => break,
                Some(Frame::ConnectError(message)) => return Err(AppError::ConnectRefused { message }),
                Some(Frame::Ping) => stream.send(Message::text(frame::PONG)).await?,
                Some(_) => continue,
                None => return Err(AppError::frame("closed before namespace connect")),
            }
        }
        info!("Push socket connected to {}", self.endpoint.host_str().unwrap_or("backend"));

        Ok(Box::new(WsConnection { stream, handshake }))
    }
}

struct WsConnection {
    stream: WsStream,
    handshake: Handshake,
}

impl WsConnection {
    /// The server pings every `ping_interval`; silence beyond interval plus
    /// timeout means the link is dead.
    fn silence_limit(&self) -> Option<Duration> {
        let total = self.handshake.ping_interval + self.handshake.ping_timeout;
        (total > 0).then(|| Duration::from_millis(total))
    }
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn recv(&mut self) -> Result<Option<RawEvent>, AppError> {
        loop {
            let next = match self.silence_limit() {
                Some(limit) => tokio::time::timeout(limit, next_frame(&mut self.stream))
                    .await
                    .map_err(|_| AppError::frame("heartbeat timed out"))?,
                None => next_frame(&mut self.stream).await,
            };
            match next {
                Ok(Some(Frame::Event { name, payload })) => return Ok(Some(RawEvent { name, payload })),
                Ok(Some(Frame::Ping)) => self.stream.send(Message::text(frame::PONG)).await?,
                Ok(Some(Frame::Close | Frame::Disconnected)) | Ok(None) => return Ok(None),
                Ok(Some(Frame::ConnectError(message))) => return Err(AppError::ConnectRefused { message }),
                Ok(Some(_)) => continue,
                Err(AppError::Frame { message }) => {
                    warn!("Skipping undecodable push frame: {message}");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.send(Message::text(frame::DISCONNECT)).await;
        let _ = self.stream.close(None).await;
    }
}

async fn next_frame(stream: &mut WsStream) -> Result<Option<Frame>, AppError> {
    while let Some(msg) = stream.next().await {
        match msg? {
            Message::Text(text) => return frame::decode(text.as_str()).map(Some),
            Message::Close(_) => return Ok(None),
            // websocket-level ping/pong is answered by tungstenite itself
            _ => continue,
        }
    }
    Ok(None)
}
