use std::net::SocketAddr;

use tracing::info;

mod app;
mod http;
mod reaper;
mod worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batchline_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("BATCHLINE_CONFIG").ok();
    let config = batchline_core::config::BatchlineConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("config load failed ({}), using defaults", e);
            batchline_core::config::BatchlineConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let worker_count = config.workers.count;

    let wired = app::wire(config, app::Endpoints::default())?;
    let router = app::build_router(wired.state.clone());

    let (shutdown_tx, shutdown_rx) = app::shutdown_channel();

    tokio::spawn(wired.queue_engine.run(shutdown_rx.clone()));
    tokio::spawn(worker::run_pool(
        worker_count,
        wired.stage_b,
        wired.channel_queues,
        wired.delivered_rx,
        shutdown_rx.clone(),
    ));
    tokio::spawn(reaper::run(wired.kv, shutdown_rx.clone()));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("batchline gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
