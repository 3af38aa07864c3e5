//! Transport adapters behind one open/send/close/event contract
//!
//! - `websocket`: primary full-duplex channel
//! - `sse`: server-push fallback; uplink goes through an HTTP side channel
//! - `poll`: periodic pull fallback; uplink goes through the same side channel
//!
//! Fallback transports learn their server-side connection id from the
//! `{"type":"connected","connection_id":..}` handshake event (SSE) or the
//! `connection_id` field of a pull response, and stamp it on uplink bodies.

pub mod poll;
pub mod sse;
pub mod websocket;

use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Primary,
    ServerPush,
    Poll,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Primary => "primary",
            TransportKind::ServerPush => "fallback-push",
            TransportKind::Poll => "fallback-poll",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-state channel status shared by every adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closed,
}

/// Lock-free status cell shared between an adapter and its background tasks
#[derive(Debug, Clone)]
pub(crate) struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub(crate) fn new(status: ChannelStatus) -> Self {
        let cell = Self(Arc::new(AtomicU8::new(0)));
        cell.set(status);
        cell
    }

    pub(crate) fn get(&self) -> ChannelStatus {
        match self.0.load(Ordering::Acquire) {
            0 => ChannelStatus::Connecting,
            1 => ChannelStatus::Open,
            _ => ChannelStatus::Closed,
        }
    }

    pub(crate) fn set(&self, status: ChannelStatus) {
        let value = match status {
            ChannelStatus::Connecting => 0,
            ChannelStatus::Open => 1,
            ChannelStatus::Closed => 2,
        };
        self.0.store(value, Ordering::Release);
    }

    /// Move to `Closed`; returns true if this call did the transition
    pub(crate) fn close(&self) -> bool {
        self.0.swap(2, Ordering::AcqRel) != 2
    }
}

/// Events an open adapter reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Message(String),
    /// Non-fatal failure (e.g. a single pull error)
    Error(TransportError),
    /// Channel ended without a local close; carries the cause when known
    Closed(Option<TransportError>),
}

/// One open transport
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn status(&self) -> ChannelStatus;

    async fn send(&self, payload: String) -> Result<(), TransportError>;

    /// Server-assigned connection id, once the server has announced it
    fn connection_id(&self) -> Option<String> {
        None
    }

    /// Tear the channel down and stop its background tasks. Idempotent; no
    /// events are reported after it returns.
    async fn close(&self);
}

/// Parameters for opening one transport
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub kind: TransportKind,
    pub url: String,
    /// Side channel used for uplink on fallback transports
    pub send_url: Option<String>,
    /// Resynchronization cursor for pull transports
    pub last_message_id: Option<i64>,
    pub poll_interval: Duration,
    pub max_consecutive_poll_failures: u32,
}

pub struct OpenedTransport {
    pub adapter: Box<dyn TransportAdapter>,
    pub events: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl fmt::Debug for OpenedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedTransport")
            .field("kind", &self.adapter.kind())
            .field("status", &self.adapter.status())
            .finish()
    }
}

/// Factory for adapters; the seam the session state machine is tested through
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self, request: OpenRequest) -> Result<OpenedTransport, TransportError>;
}

/// Connector backed by tokio-tungstenite and reqwest
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TransportConnector for DefaultConnector {
    async fn open(&self, request: OpenRequest) -> Result<OpenedTransport, TransportError> {
        match request.kind {
            TransportKind::Primary => websocket::open(&request.url).await,
            TransportKind::ServerPush => sse::open(self.http.clone(), &request).await,
            TransportKind::Poll => poll::open(self.http.clone(), &request).await,
        }
    }
}

/// Sibling `send` endpoint of a fallback URL: the last path segment is
/// replaced and any query or fragment is dropped.
pub fn derive_send_url(url: &str) -> String {
    let base = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    let path_start = base.find("://").map(|i| i + 3).unwrap_or(0);
    match base[path_start..].rfind('/') {
        Some(i) => format!("{}send", &base[..path_start + i + 1]),
        None => format!("{base}/send"),
    }
}

/// Connection id announced by the server, shared with an adapter's reader task
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionIdCell(Arc<RwLock<Option<String>>>);

impl ConnectionIdCell {
    pub(crate) fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub(crate) fn set(&self, connection_id: String) {
        *self.0.write() = Some(connection_id);
    }
}

/// Connection id carried by a `{"type":"connected"}` handshake event
pub(crate) fn handshake_connection_id(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    if value.get("type")?.as_str()? != "connected" {
        return None;
    }
    value.get("connection_id")?.as_str().map(str::to_string)
}

/// Add `connection_id` to a JSON object payload that lacks one. Anything else
/// passes through unchanged.
pub(crate) fn attach_connection_id(payload: String, connection_id: Option<&str>) -> String {
    let Some(id) = connection_id else {
        return payload;
    };
    match serde_json::from_str::<Value>(&payload) {
        Ok(Value::Object(mut body)) if !body.contains_key("connection_id") => {
            body.insert("connection_id".into(), Value::String(id.to_string()));
            Value::Object(body).to_string()
        }
        _ => payload,
    }
}

/// POST an uplink payload to a fallback transport's side channel
pub(crate) async fn post_uplink(
    http: &reqwest::Client,
    url: &str,
    connection_id: Option<&str>,
    payload: String,
) -> Result<(), TransportError> {
    let payload = attach_connection_id(payload, connection_id);
    let response = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(payload)
        .send()
        .await
        .map_err(|e| TransportError::Send(e.to_string()))?;

    if !response.status().is_success() {
        return Err(TransportError::Http {
            status: response.status().as_u16(),
        });
    }
    Ok(())
}
