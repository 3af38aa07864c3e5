/// Integration tests for the realtime-notification-service HTTP API
///
/// Covers the admin endpoints (stats, count, broadcast, health), the `/send`
/// uplink and handshake validation. Connections are registered directly with
/// in-memory channel pairs.
use actix_web::{test, web, App};
use realtime_notification_service::handlers;
use realtime_notification_service::websocket::{channel_pair, ChannelEndpoint, Outbound};
use realtime_notification_service::{ConnectionMetadata, ConnectionPool, RealtimeConfig};
use serde_json::{json, Value};

fn register(pool: &ConnectionPool, metadata: ConnectionMetadata) -> ChannelEndpoint {
    let (channel, endpoint) = channel_pair();
    endpoint.mark_open();
    pool.add(channel, metadata).unwrap();
    endpoint
}

fn texts(endpoint: &mut ChannelEndpoint) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(command) = endpoint.try_recv() {
        if let Outbound::Text(text) = command {
            out.push(serde_json::from_str(&text).unwrap());
        }
    }
    out
}

macro_rules! app {
    ($pool:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($pool.clone()))
                .app_data(web::Data::new(RealtimeConfig::default()))
                .configure(handlers::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health_and_count() {
    let pool = ConnectionPool::new();
    let _a = register(&pool, ConnectionMetadata::new("a"));
    let app = app!(pool);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/realtime/connections/count")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 1);
}

#[actix_web::test]
async fn test_stats_snapshot() {
    let pool = ConnectionPool::new();
    let _a = register(
        &pool,
        ConnectionMetadata::new("a").with_subscriber(1).with_role("buyer").with_topics([3]),
    );
    let _b = register(
        &pool,
        ConnectionMetadata::new("b").with_subscriber(2).with_role("seller").with_topics([3, 4]),
    );
    let app = app!(pool);

    let req = test::TestRequest::get().uri("/api/v1/realtime/stats").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["total_connections"], 2);
    assert_eq!(body["unique_subscribers"], 2);
    assert_eq!(body["by_role"]["buyer"], 1);
    assert_eq!(body["by_type"]["user"], 2);
    assert_eq!(body["top_topics"][0]["topic_id"], 3);
    assert_eq!(body["top_topics"][0]["connections"], 2);
}

#[actix_web::test]
async fn test_broadcast_filters() {
    let pool = ConnectionPool::new();
    let mut buyer = register(
        &pool,
        ConnectionMetadata::new("buyer").with_subscriber(1).with_role("buyer").with_categories(["bid"]),
    );
    let mut seller = register(
        &pool,
        ConnectionMetadata::new("seller").with_subscriber(2).with_role("seller"),
    );
    let app = app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/v1/realtime/broadcast")
        .set_json(json!({"payload": {"type": "maintenance"}}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["sent"], 2);

    let req = test::TestRequest::post()
        .uri("/api/v1/realtime/broadcast")
        .set_json(json!({"payload": {"type": "bid_update"}, "role": "buyer", "category": "bid"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["sent"], 1);

    let req = test::TestRequest::post()
        .uri("/api/v1/realtime/broadcast")
        .set_json(json!({"payload": {"type": "x"}, "subscriber_id": 99}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["sent"], 0);

    let buyer_frames = texts(&mut buyer);
    assert_eq!(buyer_frames.len(), 2);
    assert_eq!(buyer_frames[1]["type"], "bid_update");
    assert_eq!(texts(&mut seller).len(), 1);
}

#[actix_web::test]
async fn test_send_applies_control_for_known_connection() {
    let pool = ConnectionPool::new();
    let _a = register(&pool, ConnectionMetadata::new("a"));
    let app = app!(pool);

    let req = test::TestRequest::post()
        .uri("/send")
        .set_json(json!({"type": "subscribe", "topic_id": 12, "connection_id": "a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["reply"]["type"], "subscribed");

    assert_eq!(pool.get_by_topic(12).len(), 1);
}

#[actix_web::test]
async fn test_send_accepts_application_payloads() {
    let pool = ConnectionPool::new();
    let app = app!(pool);

    let req = test::TestRequest::post()
        .uri("/send")
        .set_json(json!({"type": "chat", "body": "hello"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
}

#[actix_web::test]
async fn test_send_rejects_malformed_control() {
    let pool = ConnectionPool::new();
    let app = app!(pool);

    let req = test::TestRequest::post()
        .uri("/send")
        .set_json(json!({"type": "subscribe", "topic_id": "nope", "connection_id": "a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_sse_rejects_invalid_topics() {
    let pool = ConnectionPool::new();
    let app = app!(pool);

    let req = test::TestRequest::get().uri("/sse?topics=1,abc").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(pool.connection_count(), 0);
}

#[actix_web::test]
async fn test_sse_registers_connection() {
    let pool = ConnectionPool::new();
    let app = app!(pool);

    let req = test::TestRequest::get()
        .uri("/sse?subscriber_id=7&role=buyer&topics=1,2")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(pool.get_by_subscriber(7).len(), 1);
    assert_eq!(pool.get_by_topic(2).len(), 1);
}

#[actix_web::test]
async fn test_health_reports_shutdown() {
    let pool = ConnectionPool::new();
    let app = app!(pool);
    pool.shutdown();

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    let req = test::TestRequest::get().uri("/sse").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_web::test]
async fn test_metrics_endpoint_exposes_pool_gauge() {
    let pool = ConnectionPool::new();
    let _a = register(&pool, ConnectionMetadata::new("a"));
    let app = app!(pool);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("realtime_connections_active"));
}
