use anyhow::Context;

use mrp_api::app::{build_app, services};
use mrp_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mrp_observability::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let services = services::start(&config).await?;

    let app = build_app(services.outbox.clone());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
