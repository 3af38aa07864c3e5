//! Primary transport: full-duplex WebSocket over tokio-tungstenite

use super::{AdapterEvent, ChannelStatus, OpenedTransport, StatusCell, TransportAdapter, TransportKind};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, warn};

pub struct WebSocketAdapter {
    status: StatusCell,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub async fn open(url: &str) -> Result<OpenedTransport, TransportError> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    debug!(url, "websocket connected");

    let (mut sink, mut source) = stream.split();
    let status = StatusCell::new(ChannelStatus::Open);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "websocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_status = status.clone();
    let reader = tokio::spawn(async move {
        let cause = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    let _ = events_tx.send(AdapterEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events_tx.send(AdapterEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) if frame.code != CloseCode::Normal => Some(TransportError::Closed(
                            format!("{} {}", u16::from(frame.code), frame.reason),
                        )),
                        _ => None,
                    };
                }
                // Pings are answered by tungstenite on the next read
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(TransportError::Protocol(e.to_string())),
                None => break Some(TransportError::Closed("connection reset".into())),
            }
        };

        if reader_status.close() {
            if let Some(error) = &cause {
                warn!(error = %error, "websocket closed unexpectedly");
            }
            let _ = events_tx.send(AdapterEvent::Closed(cause));
        }
    });

    let adapter = WebSocketAdapter {
        status,
        outbound: outbound_tx,
        reader,
        writer,
    };

    Ok(OpenedTransport {
        adapter: Box::new(adapter),
        events: events_rx,
    })
}

#[async_trait]
impl TransportAdapter for WebSocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Primary
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }

    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if self.status.get() != ChannelStatus::Open {
            return Err(TransportError::Send("websocket is not open".into()));
        }
        self.outbound
            .send(Message::Text(payload.into()))
            .map_err(|_| TransportError::Send("websocket writer stopped".into()))
    }

    async fn close(&self) {
        if !self.status.close() {
            return;
        }
        self.reader.abort();
        let _ = self.outbound.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        })));
    }
}

impl Drop for WebSocketAdapter {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
