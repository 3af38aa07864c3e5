use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use realtime_notification_service::{handlers, logging, metrics, Config, ConnectionPool};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        address = %config.bind_address(),
        health_interval_secs = config.realtime.health_interval_secs,
        "starting realtime notification service"
    );

    let pool = ConnectionPool::new();
    pool.start_health_monitor(config.realtime.health_interval());

    let pool_data = web::Data::new(pool.clone());
    let realtime_data = web::Data::new(config.realtime.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .app_data(realtime_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/", web::get().to(|| async { "Realtime Notification Service v1.0" }))
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(config.bind_address())
    .with_context(|| format!("failed to bind {}", config.bind_address()))?
    .run();

    let handle = server.handle();
    actix_rt::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        pool.shutdown();
        handle.stop(true).await;
    });

    server.await.context("http server failed")?;
    tracing::info!("realtime notification service stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
