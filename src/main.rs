use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tracks_radio::{
    catalog::HttpCatalog,
    channel::RadioChannel,
    config::Config,
    events::Broadcaster,
    rotation::{RotationEngine, RotationSettings},
    server::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tracks_radio=debug")),
        )
        .init();

    // 2. Load Config
    let config = Config::from_env()?;
    info!("Catalog URL: {}", config.catalog_url);
    info!("Disconnect policy: {:?}", config.disconnect_policy);

    // 3. Catalog client
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let catalog = Arc::new(HttpCatalog::new(client, config.catalog_url.clone()));

    // 4. Rotation engine and its channel
    let broadcaster = Broadcaster::new(config.broadcast_capacity);
    let engine = RotationEngine::new(
        catalog,
        broadcaster.clone(),
        RotationSettings {
            period: config.rotation_interval,
            pool_limit: config.catalog_limit,
        },
    );

    // Warm the pool in the background; an unreachable catalog only leaves the radio idle.
    let warmup = engine.clone();
    tokio::spawn(async move {
        if warmup.load_pool().await == 0 {
            error!("Rotation pool is empty. Radio stays silent until a refresh finds tracks.");
        }
    });

    let channel = RadioChannel::new(engine.clone(), broadcaster, config.disconnect_policy);
    let app = router(AppState { channel });

    // 5. Start Server
    let addr = config.bind_addr()?;
    info!("Radio server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop();
    info!("Radio server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
