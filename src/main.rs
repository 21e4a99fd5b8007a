//! Cryptid Duel Server
//!
//! Authoritative match server. Configuration comes from the environment;
//! see `ServerConfig::from_env`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cryptid_duel::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Cryptid Duel Server v{}", VERSION);

    let config = ServerConfig::from_env().context("reading configuration")?;
    info!(
        bind = %config.bind_addr,
        turn_seconds = config.session.turn_time_limit.as_secs(),
        auth = config.auth.is_verified(),
        "Configuration loaded"
    );

    let server = GameServer::new(config).context("starting server")?;

    tokio::select! {
        result = server.run() => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}
