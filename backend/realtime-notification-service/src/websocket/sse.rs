/// Server-push (text/event-stream) rendition of a pooled channel
///
/// The first event is `{"type":"connected","connection_id":..}` so the peer
/// can address `/send` uplinks. Payloads become `data:` events. Liveness
/// probes are written as comment lines and count as a pong; a push-only peer
/// has no other way to answer.
use super::channel::{ChannelEndpoint, ChannelEvent, Outbound};
use actix_web::web::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use tracing::debug;

struct SseSession {
    connection_id: String,
    endpoint: ChannelEndpoint,
}

impl Drop for SseSession {
    fn drop(&mut self) {
        self.endpoint.report_closed();
        debug!(connection_id = %self.connection_id, "sse stream closed");
    }
}

/// Encode one payload as an SSE event; multi-line payloads become multiple
/// `data:` lines.
pub fn encode_event(payload: &str) -> Bytes {
    let mut out = String::with_capacity(payload.len() + 8);
    for line in payload.lines() {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    if payload.is_empty() {
        out.push_str("data: \n");
    }
    out.push('\n');
    Bytes::from(out)
}

/// Body stream for an SSE response. The channel is marked open immediately;
/// dropping the stream (peer gone, or close/terminate from the pool) reports
/// closure.
pub fn event_stream(
    connection_id: String,
    endpoint: ChannelEndpoint,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    endpoint.mark_open();
    let greeting = encode_event(
        &json!({"type": "connected", "connection_id": connection_id}).to_string(),
    );
    let session = SseSession {
        connection_id,
        endpoint,
    };

    let body = stream::unfold(session, |mut session| async move {
        let chunk = match session.endpoint.recv().await? {
            Outbound::Text(text) => encode_event(&text),
            Outbound::Ping => {
                session.endpoint.report(ChannelEvent::Pong);
                Bytes::from_static(b": ping\n\n")
            }
            Outbound::Close { .. } | Outbound::Terminate => return None,
        };
        Some((Ok(chunk), session))
    });

    stream::once(async move { Ok(greeting) }).chain(body)
}
