//! leserve binary entry point

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = leserve::ServerConfig::load()?;
    leserve::init_logging(&config);

    info!(
        host = %config.host,
        port = config.port,
        pacing_ms = config.pacing_interval_ms,
        provider = %config.provider_base_url,
        "Starting leserve"
    );

    let server = leserve::LeServeServer::new(config)?;
    info!("WebSocket events on: {}", server.websocket_url());

    server.start().await?;

    Ok(())
}
