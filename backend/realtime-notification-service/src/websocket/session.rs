/// WebSocket session actor
///
/// Owns the socket for one pooled connection. Outbound commands from the pool
/// arrive as a stream on the actor context; inbound frames, pongs, errors and
/// closure are reported back through the channel reporter.
use super::channel::{ChannelEndpoint, ChannelEvent, ChannelReporter, Outbound};
use super::messages::{apply_control, ClientControl, ServerMessage};
use super::pool::ConnectionPool;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

pub struct WsSession {
    connection_id: String,
    pool: ConnectionPool,
    reporter: ChannelReporter,
    outbound: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl WsSession {
    pub fn new(connection_id: String, pool: ConnectionPool, endpoint: ChannelEndpoint) -> Self {
        let (outbound, reporter) = endpoint.split();
        Self {
            connection_id,
            pool,
            reporter,
            outbound: Some(outbound),
        }
    }

    fn reply(&self, message: &ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message.to_json() {
            Ok(text) => ctx.text(text),
            Err(e) => warn!(connection_id = %self.connection_id, error = %e, "failed to encode reply"),
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        self.reporter.report(ChannelEvent::Frame { bytes: text.len() });

        match ClientControl::parse(text) {
            Some(Ok(control)) => {
                debug!(connection_id = %self.connection_id, ?control, "control frame");
                let reply = apply_control(&self.pool, &self.connection_id, control);
                self.reply(&reply, ctx);
            }
            Some(Err(e)) => {
                let reply = ServerMessage::error("INVALID_CONTROL", e.to_string());
                self.reply(&reply, ctx);
            }
            None => debug!(
                connection_id = %self.connection_id,
                bytes = text.len(),
                "ignoring application frame"
            ),
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }
        self.reporter.mark_open();
        info!(connection_id = %self.connection_id, "websocket session started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.reporter.report_closed();
        info!(connection_id = %self.connection_id, "websocket session stopped");
    }
}

// Commands from the pool
impl StreamHandler<Outbound> for WsSession {
    fn handle(&mut self, command: Outbound, ctx: &mut Self::Context) {
        match command {
            Outbound::Text(text) => ctx.text(text.to_string()),
            Outbound::Ping => ctx.ping(b""),
            Outbound::Close { code, reason } => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::from(code),
                    description: Some(reason),
                }));
                ctx.stop();
            }
            Outbound::Terminate => ctx.stop(),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // Pool dropped the handle
        ctx.stop();
    }
}

// Frames from the peer
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.reporter.report(ChannelEvent::Pong);
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.reporter.report(ChannelEvent::Pong);
            }
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(bin)) => {
                self.reporter.report(ChannelEvent::Frame { bytes: bin.len() });
                warn!(connection_id = %self.connection_id, "binary frames are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.connection_id, ?reason, "peer closed websocket");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                self.reporter.report(ChannelEvent::Error(e.to_string()));
                warn!(connection_id = %self.connection_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}
