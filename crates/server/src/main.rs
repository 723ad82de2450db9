use anyhow::Context;
use server::{AppState, routes};
use services::services::config::Config;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    utils::logging::init(config.log_filter.as_deref());

    let state = AppState::from_config(&config).await?;
    info!(
        collections = state.registry().len(),
        folder_root = %config.folder_root.display(),
        "Collections loaded"
    );

    let report = state.integrity().report(state.registry()).await?;
    if !report.is_ok() {
        warn!("{}", report.summary());
    }

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let address = config.bind_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
