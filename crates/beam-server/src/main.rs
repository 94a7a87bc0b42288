use tracing::info;

use beam_server::ServerState;
use beam_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beam=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr()?;
    info!("Beam registry listening on {} (heartbeat {:?})", addr, config.heartbeat);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    beam_server::serve(listener, ServerState::new(config.heartbeat)).await?;

    Ok(())
}
