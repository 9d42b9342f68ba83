//! Gridfire Server
//!
//! Loads configuration from the environment, builds the world from the
//! configured map and serves clients until Ctrl-C.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridfire::{
    game::{layout::load_map, layout::MapLayout, world::World},
    network::server::{GameServer, ServerConfig},
    TICK_RATE, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Gridfire Server v{} (protocol {:?})", VERSION, config.version);
    info!("Tick Rate: {} Hz (default {})", config.tick_rate, TICK_RATE);
    info!("Mode: {:?}", config.mode);

    let layout = match &config.map_path {
        Some(path) => load_map(path),
        None => {
            info!("No map configured; using an empty map");
            MapLayout::empty()
        }
    };
    let world = World::from_layout(&layout, config.game_mode(), config.seed);
    info!("World ready: {} entities, state hash {}", world.len(), world.state_hash());

    let server = GameServer::bind(config.clone(), world)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("Listening on {}", server.local_addr()?);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
