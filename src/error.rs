use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("entity serialization failed: {0}")]
    Entity(#[from] serde_json::Error),

    #[error("region {0} is not known")]
    UnknownRegion(String),

    #[error("region {0} already exists")]
    RegionExists(String),

    #[error("client {0} is not connected")]
    UnknownClient(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server loop has stopped")]
    ServerGone,
}

pub type Result<T> = std::result::Result<T, Error>;
