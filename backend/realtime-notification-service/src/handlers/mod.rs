/// HTTP handlers for the realtime notification service
pub mod realtime;
pub mod websocket;

use actix_web::web;

pub use realtime::register_routes as register_admin;
pub use websocket::register_routes as register_transport;

/// Mount every route; shared state (`ConnectionPool`, `RealtimeConfig`) is
/// expected as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    register_transport(cfg);
    register_admin(cfg);
    cfg.route("/metrics", web::get().to(crate::metrics::serve_metrics));
}
