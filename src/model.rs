use std::{collections::HashSet, fmt};

use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::world::{BlockPos, ChunkPos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn random() -> ClientId {
        ClientId(Uuid::from_u128(rand::thread_rng().gen()))
    }

    /// Stable id derived from the username, the way offline-mode servers do it.
    pub fn offline(username: &str) -> ClientId {
        let name = format!("OfflinePlayer:{}", username);
        ClientId(Uuid::new_v3(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub fn new(x: f64, y: f64, z: f64) -> Vec3d {
        Vec3d { x, y, z }
    }
}

/// Where a connected client is and what the server has streamed to it.
pub struct Session {
    pub id: ClientId,
    pub username: String,
    pub region: String,
    pub position: Vec3d,
    pub view_dist: i32,
    pub known_chunks: HashSet<ChunkPos>,
}

impl Session {
    pub fn new(id: ClientId, username: &str, region: &str, view_dist: i32) -> Session {
        Session {
            id,
            username: username.to_string(),
            region: region.to_string(),
            position: Vec3d::new(0.5, 64.0, 0.5),
            view_dist,
            known_chunks: HashSet::new(),
        }
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::from_pos(self.position.x, self.position.y, self.position.z)
    }

    pub fn chunk_pos(&self) -> ChunkPos {
        self.block_pos().chunk_pos()
    }
}
