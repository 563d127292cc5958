use crate::world::{BlockPos, Chunk, Dimension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    /// Chunk-local x and z, absolute y.
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub block_state: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Handshake,
    Status,
    Login,
    Play,
}

impl PlayState {
    pub fn from_next_state(next_state: i32) -> Option<PlayState> {
        match next_state {
            1 => Some(PlayState::Status),
            2 => Some(PlayState::Login),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // Serverbound
    C00Handshake {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: PlayState,
    },
    C00LoginStart {
        username: String,
    },
    C00KeepAlive {
        id: i32,
    },
    C04PlayerPos {
        x: f64,
        y: f64,
        z: f64,
        on_ground: bool,
    },
    C06PlayerPosRot {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },

    // Clientbound
    S02LoginSuccess {
        uuid: String,
        username: String,
    },
    S03LoginCompression {
        threshold: i32,
    },
    S00KeepAlive {
        id: i32,
    },
    S01JoinGame {
        entity_id: i32,
        game_mode: u8,
        dimension: Dimension,
        difficulty: u8,
        max_players: u8,
        level_type: String,
        reduced_debug_info: bool,
    },
    S07Respawn {
        dimension: Dimension,
        difficulty: u8,
        game_mode: u8,
        level_type: String,
    },
    S08SetPlayerPosition {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        flags: u8,
    },
    /// Full chunk column. Without a chunk the client unloads the column.
    S21ChunkData {
        x: i32,
        z: i32,
        skylight: bool,
        chunk: Option<Box<Chunk>>,
    },
    S22MultiBlockChange {
        chunk_x: i32,
        chunk_z: i32,
        records: Vec<BlockRecord>,
    },
    S23BlockChange {
        location: BlockPos,
        block_state: u16,
    },
}

impl Packet {
    pub fn id(&self) -> i32 {
        match self {
            Packet::C00Handshake { .. } => 0x00,
            Packet::C00LoginStart { .. } => 0x00,
            Packet::C00KeepAlive { .. } => 0x00,
            Packet::C04PlayerPos { .. } => 0x04,
            Packet::C06PlayerPosRot { .. } => 0x06,

            Packet::S02LoginSuccess { .. } => 0x02,
            Packet::S03LoginCompression { .. } => 0x03,
            Packet::S00KeepAlive { .. } => 0x00,
            Packet::S01JoinGame { .. } => 0x01,
            Packet::S07Respawn { .. } => 0x07,
            Packet::S08SetPlayerPosition { .. } => 0x08,
            Packet::S21ChunkData { .. } => 0x21,
            Packet::S22MultiBlockChange { .. } => 0x22,
            Packet::S23BlockChange { .. } => 0x23,
        }
    }

    pub fn chunk_data(chunk: Chunk, skylight: bool) -> Packet {
        Packet::S21ChunkData {
            x: chunk.x,
            z: chunk.z,
            skylight,
            chunk: Some(Box::new(chunk)),
        }
    }

    pub fn unload_chunk(x: i32, z: i32) -> Packet {
        Packet::S21ChunkData {
            x,
            z,
            skylight: false,
            chunk: None,
        }
    }
}
