/// Admin endpoints over the connection pool
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::RealtimeConfig;
use crate::error::Result;
use crate::websocket::{ConnectionMetadata, ConnectionPool};

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub payload: Value,
    pub subscriber_id: Option<i64>,
    pub topic_id: Option<i64>,
    pub role: Option<String>,
    pub category: Option<String>,
}

impl BroadcastRequest {
    /// All supplied filters must match
    fn matches(&self, metadata: &ConnectionMetadata) -> bool {
        self.subscriber_id.map_or(true, |s| metadata.subscriber_id == Some(s))
            && self.topic_id.map_or(true, |t| metadata.topics.contains(&t))
            && self
                .role
                .as_ref()
                .map_or(true, |r| metadata.role.as_ref() == Some(r))
            && self
                .category
                .as_ref()
                .map_or(true, |c| metadata.categories.contains(c))
    }
}

/// Endpoint: GET /api/v1/realtime/stats
pub async fn get_stats(
    pool: web::Data<ConnectionPool>,
    config: web::Data<RealtimeConfig>,
) -> HttpResponse {
    HttpResponse::Ok().json(pool.stats(config.stats_top_topics))
}

/// Endpoint: GET /api/v1/realtime/connections/count
pub async fn connection_count(pool: web::Data<ConnectionPool>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "count": pool.connection_count() }))
}

/// Endpoint: POST /api/v1/realtime/broadcast
pub async fn broadcast(
    pool: web::Data<ConnectionPool>,
    body: web::Json<BroadcastRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    let payload = &request.payload;

    // Single filters go through their index; combinations scan with a predicate.
    let sent = match (
        request.subscriber_id,
        request.topic_id,
        request.role.as_deref(),
        request.category.as_deref(),
    ) {
        (None, None, None, None) => pool.broadcast(payload)?,
        (Some(subscriber_id), None, None, None) => pool.send_to_subscriber(subscriber_id, payload)?,
        (None, Some(topic_id), None, None) => pool.broadcast_to_topic(topic_id, payload)?,
        (None, None, Some(role), None) => pool.broadcast_to_role(role, payload)?,
        (None, None, None, Some(category)) => pool.broadcast_to_category(category, payload)?,
        _ => pool.broadcast_where(payload, |m| request.matches(m))?,
    };

    info!(sent, "admin broadcast");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "sent": sent,
    })))
}

/// Endpoint: GET /health
pub async fn health(pool: web::Data<ConnectionPool>) -> HttpResponse {
    if pool.is_shut_down() {
        return HttpResponse::ServiceUnavailable().json(json!({ "status": "shutting_down" }));
    }
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "connections": pool.connection_count(),
    }))
}

/// Register admin routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1/realtime")
            .route("/stats", web::get().to(get_stats))
            .route("/connections/count", web::get().to(connection_count))
            .route("/broadcast", web::post().to(broadcast)),
    );
}
