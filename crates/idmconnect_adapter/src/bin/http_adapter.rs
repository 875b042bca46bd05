#![forbid(unsafe_code)]

use std::sync::Arc;

use idmconnect_adapter::{router, AdapterConfig, AdapterRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env()?;
    let runtime = Arc::new(AdapterRuntime::default_from_env()?);
    let endpoints = runtime
        .workflow()
        .client()
        .config()
        .configured_endpoints()
        .join(",");
    let app = router(runtime);

    tracing::info!(
        bind = %config.bind,
        endpoints_configured = %endpoints,
        "idmconnect_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
