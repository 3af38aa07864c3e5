/// Accept handlers for realtime channels
///
/// `/ws` upgrades to a WebSocket session, `/sse` opens a server-push stream;
/// both register into the shared [`ConnectionPool`]. `/send` is the uplink for
/// clients on a push-only or polling transport.
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::error::{AppError, Result};
use crate::websocket::{
    apply_control, channel_pair, sse, ClientControl, ConnectionPool, HandshakeParams, WsSession,
};

/// Endpoint: GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    pool: web::Data<ConnectionPool>,
    config: web::Data<RealtimeConfig>,
    query: web::Query<HandshakeParams>,
) -> std::result::Result<HttpResponse, actix_web::Error> {
    let connection_id = Uuid::new_v4().to_string();
    let metadata = query.into_inner().into_metadata(connection_id.clone())?;

    let (channel, endpoint) = channel_pair();
    pool.add(channel, metadata)?;

    let session = WsSession::new(connection_id.clone(), pool.get_ref().clone(), endpoint);
    ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(config.max_frame_bytes)
        .start()
        .map_err(|e| {
            warn!(connection_id = %connection_id, error = %e, "websocket handshake failed");
            pool.remove(&connection_id);
            e
        })
}

/// Endpoint: GET /sse
pub async fn sse_connect(
    pool: web::Data<ConnectionPool>,
    query: web::Query<HandshakeParams>,
) -> Result<HttpResponse> {
    let connection_id = Uuid::new_v4().to_string();
    let metadata = query.into_inner().into_metadata(connection_id.clone())?;

    let (channel, endpoint) = channel_pair();
    pool.add(channel, metadata)?;

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(sse::event_stream(connection_id, endpoint)))
}

/// Client-to-server message over a fallback transport
///
/// Endpoint: POST /send
pub async fn send_message(pool: web::Data<ConnectionPool>, body: web::Json<Value>) -> Result<HttpResponse> {
    let body = body.into_inner();
    let connection_id = body
        .get("connection_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(connection) = connection_id.as_deref().and_then(|id| pool.get(id)) {
        let bytes = body.to_string().len();
        connection.touch();
        connection.counters().record_received(bytes);
        pool.totals().record_received(bytes);
    }

    let reply = match ClientControl::from_value(&body) {
        Some(Ok(control)) => match connection_id.as_deref() {
            Some(id) => Some(apply_control(&pool, id, control)),
            None => {
                return Err(AppError::BadRequest(
                    "control messages require a connection_id".into(),
                ))
            }
        },
        Some(Err(e)) => return Err(AppError::BadRequest(format!("invalid control message: {e}"))),
        None => None,
    };

    debug!(connection_id = ?connection_id, "uplink message accepted");

    Ok(HttpResponse::Accepted().json(json!({
        "accepted": true,
        "reply": reply,
    })))
}

/// Register realtime transport routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_connect))
        .route("/sse", web::get().to(sse_connect))
        .route("/send", web::post().to(send_message));
}
