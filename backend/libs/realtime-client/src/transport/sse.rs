//! Server-push fallback: a long-lived `text/event-stream` response plus an
//! HTTP side channel for uplink
//!
//! The first event may be the server's `connected` handshake; it is consumed
//! here and its connection id is stamped on every uplink body.

use super::{
    derive_send_url, handshake_connection_id, post_uplink, AdapterEvent, ChannelStatus,
    ConnectionIdCell, OpenRequest, OpenedTransport, StatusCell, TransportAdapter, TransportKind,
};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct SseAdapter {
    http: reqwest::Client,
    send_url: String,
    status: StatusCell,
    connection_id: ConnectionIdCell,
    reader: JoinHandle<()>,
}

pub async fn open(http: reqwest::Client, request: &OpenRequest) -> Result<OpenedTransport, TransportError> {
    let response = http
        .get(&request.url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    if !response.status().is_success() {
        return Err(TransportError::Http {
            status: response.status().as_u16(),
        });
    }
    debug!(url = %request.url, "event stream opened");

    let status = StatusCell::new(ChannelStatus::Open);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let connection_id = ConnectionIdCell::default();

    let reader_status = status.clone();
    let reader_connection_id = connection_id.clone();
    let mut body = response.bytes_stream();
    let reader = tokio::spawn(async move {
        let mut parser = SseParser::default();
        let mut awaiting_handshake = true;
        let cause = loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    for data in parser.feed(&chunk) {
                        if std::mem::take(&mut awaiting_handshake) {
                            if let Some(id) = handshake_connection_id(&data) {
                                debug!(connection_id = %id, "event stream handshake received");
                                reader_connection_id.set(id);
                                continue;
                            }
                        }
                        let _ = events_tx.send(AdapterEvent::Message(data));
                    }
                }
                Some(Err(e)) => break Some(TransportError::from(e)),
                None => break None,
            }
        };

        if reader_status.close() {
            if let Some(error) = &cause {
                warn!(error = %error, "event stream failed");
            }
            let _ = events_tx.send(AdapterEvent::Closed(cause));
        }
    });

    let send_url = request
        .send_url
        .clone()
        .unwrap_or_else(|| derive_send_url(&request.url));

    Ok(OpenedTransport {
        adapter: Box::new(SseAdapter {
            http,
            send_url,
            status,
            connection_id,
            reader,
        }),
        events: events_rx,
    })
}

#[async_trait]
impl TransportAdapter for SseAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::ServerPush
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }

    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if self.status.get() != ChannelStatus::Open {
            return Err(TransportError::Send("event stream is not open".into()));
        }
        let connection_id = self.connection_id.get();
        post_uplink(&self.http, &self.send_url, connection_id.as_deref(), payload).await
    }

    fn connection_id(&self) -> Option<String> {
        self.connection_id.get()
    }

    async fn close(&self) {
        if self.status.close() {
            self.reader.abort();
        }
    }
}

impl Drop for SseAdapter {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Incremental `text/event-stream` decoder
///
/// Only `data:` fields are kept; a blank line dispatches the accumulated
/// data lines joined with `\n`. Comment lines (leading `:`) and other fields
/// (`event`, `id`, `retry`) are ignored.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut dispatched = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    dispatched.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (&*line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        dispatched
    }
}
