use std::{sync::Arc, time::Duration};

use flume::Sender;
use log::{debug, error, info};
use tokio::{net::TcpListener, select, signal, time};
use tokio_util::codec::Framed;

use worldmask::{
    block_state,
    catalog::{MemoryCatalog, RegionFlags},
    client::ClientHandler,
    config::ServerConfig,
    error::Result,
    mc::MinecraftCodec,
    server::{ClientEvent, ServerHandler},
    world::{Dimension, RegionData},
};

const CONFIG_PATH: &str = "worldmask.toml";
const SEED_RADIUS: i32 = 4;

/// Fills the catalog with a flat region for every configured name, plus the
/// spawn region, which is always pinned in memory.
fn seed_regions(catalog: &MemoryCatalog, config: &ServerConfig) -> Result<()> {
    for (name, flags) in &config.regions {
        let mut flags = *flags;
        if *name == config.spawn_region {
            flags.load_on_start = true;
            flags.keep_in_memory = true;
        }
        let data = RegionData::flat(name, Dimension::Overworld, SEED_RADIUS, block_state!(1, 0));
        catalog.create_region(data, flags)?;
    }

    if !config.regions.contains_key(&config.spawn_region) {
        let data = RegionData::flat(
            &config.spawn_region,
            Dimension::Overworld,
            SEED_RADIUS,
            block_state!(2, 0),
        );
        catalog.create_region(
            data,
            RegionFlags {
                load_on_start: true,
                keep_in_memory: true,
                ..Default::default()
            },
        )?;
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, events: Sender<ClientEvent>, config: Arc<ServerConfig>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set nodelay for {}: {}", addr, e);
                }
                let handler = ClientHandler::new(
                    Framed::new(stream, MinecraftCodec::new()),
                    events.clone(),
                    config.clone(),
                );
                tokio::spawn(handler.loop_until_disconnect());
            }
            Err(e) => error!("Accept failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = Arc::new(ServerConfig::load(CONFIG_PATH)?);
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.start(config.storage_threads);
    seed_regions(&catalog, &config)?;

    let mut server = ServerHandler::new(config.clone(), catalog);
    server.startup()?;

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Listening on {}", config.bind_address);
    tokio::spawn(accept_loop(listener, server.client_events(), config.clone()));

    let tick_ms = 1000 / u64::from(config.tick_rate.max(1));
    let mut ticker = time::interval(Duration::from_millis(tick_ms));
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = ticker.tick() => server.tick(),
            _ = &mut shutdown => break,
        }
    }

    server.shutdown();
    Ok(())
}
