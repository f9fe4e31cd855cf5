//! Text frames of the push wire: socket.io packets carried inside engine.io
//! packets over a WebSocket.
//!
//! Only what a listening client needs is supported: the open handshake,
//! heartbeats, namespace connect/disconnect, and named events. Binary
//! attachments are rejected.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;

/// Client greeting for the default namespace.
pub const CONNECT: &str = "40";
/// Client leaving the default namespace.
pub const DISCONNECT: &str = "41";
/// Heartbeat answer to a server ping.
pub const PONG: &str = "3";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connected,
    Disconnected,
    ConnectError(String),
    Ack,
    Event { name: String, payload: Value },
}

pub fn decode(text: &str) -> Result<Frame, AppError> {
    let mut chars = text.chars();
    let engine = chars.next().ok_or_else(|| AppError::frame("empty frame"))?;
    let rest = chars.as_str();
    match engine {
        '0' => serde_json::from_str(rest)
            .map(Frame::Open)
            .map_err(|e| AppError::frame(format!("bad handshake: {e}"))),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_packet(rest),
        '6' => Ok(Frame::Noop),
        other => Err(AppError::frame(format!("unknown engine packet type '{other}'"))),
    }
}

fn decode_packet(text: &str) -> Result<Frame, AppError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| AppError::frame("empty socket packet"))?;
    let body = skip_ack_id(skip_namespace(chars.as_str()));
    match kind {
        '0' => Ok(Frame::Connected),
        '1' => Ok(Frame::Disconnected),
        '2' => decode_event(body),
        '3' => Ok(Frame::Ack),
        '4' => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.to_string());
            Ok(Frame::ConnectError(message))
        }
        '5' | '6' => Err(AppError::frame("binary packets are not supported")),
        other => Err(AppError::frame(format!("unknown socket packet type '{other}'"))),
    }
}

fn decode_event(body: &str) -> Result<Frame, AppError> {
    let args: Vec<Value> =
        serde_json::from_str(body).map_err(|e| AppError::frame(format!("bad event body: {e}")))?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(AppError::frame("event without a name")),
    };
    let payload = args.next().unwrap_or(Value::Null);
    Ok(Frame::Event { name, payload })
}

// "/admin,..." addresses a namespace; the default namespace is implicit.
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn skip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}
