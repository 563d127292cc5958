use std::{collections::BTreeMap, fs, io, path::Path};

use log::info;
use serde_derive::Deserialize;

use crate::{catalog::RegionFlags, error::Result};

#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub bind_address: String,
    pub spawn_region: String,
    pub view_dist: i32,
    pub net_compression: usize,
    pub tick_rate: u32,
    pub keep_alive_secs: u64,
    pub storage_threads: u32,

    /// Resync by diffing loaded chunks instead of moving the client away and back.
    pub realtime_world_loading: bool,
    pub max_realtime_render_distance: i32,
    pub updates_per_tick: usize,

    pub regions: BTreeMap<String, RegionFlags>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: "127.0.0.1:25565".to_string(),
            spawn_region: "world".to_string(),
            view_dist: 8,
            net_compression: 256,
            tick_rate: 20,
            keep_alive_secs: 10,
            storage_threads: 2,
            realtime_world_loading: true,
            max_realtime_render_distance: 8,
            updates_per_tick: 8,
            regions: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ServerConfig> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(data) => Self::parse(&data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Ok(ServerConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(data: &str) -> Result<ServerConfig> {
        Ok(toml::from_str::<ServerConfig>(data)?)
    }

}
