mod region;

pub use region::{
    ChangeCause, Dimension, Entity, EntityBlob, Region, RegionData, WorldEvent, Worlds,
};

use serde_derive::{Deserialize, Serialize};

#[macro_export]
macro_rules! block_state {
    ($id: expr, $data: expr) => {
        (($id as u16) << 4 | (($data as u16) & 0x0f))
    };
}

#[macro_export]
macro_rules! block_id {
    ($state: expr) => {
        ($state as u16) >> 4
    };
}

#[macro_export]
macro_rules! block_meta {
    ($state: expr) => {
        (($state as u16) & 0x0f) as u8
    };
}

pub const SECTION_VOLUME: usize = 4096;
pub const SECTIONS_PER_CHUNK: usize = 16;

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos { x, y, z }
    }

    pub fn from_pos(x: f64, y: f64, z: f64) -> BlockPos {
        BlockPos::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    pub fn from_u64(serialized: u64) -> BlockPos {
        BlockPos {
            x: Self::to_signed(serialized >> 38, 26),
            y: Self::to_signed((serialized >> 26) & 0xFFF, 12),
            z: Self::to_signed(serialized << 38 >> 38, 26),
        }
    }

    pub fn to_u64(&self) -> u64 {
        let x = self.x as u64;
        let y = self.y as u64;
        let z = self.z as u64;
        ((x & 0x3FFFFFF) << 38) | ((y & 0xFFF) << 26) | (z & 0x3FFFFFF)
    }

    pub fn chunk_pos(&self) -> ChunkPos {
        ChunkPos::from_block_pos(self.x, self.z)
    }

    /// Position relative to the owning chunk's origin.
    pub fn local(&self) -> (i32, i32, i32) {
        (self.x & 0x0f, self.y, self.z & 0x0f)
    }

    fn to_signed(val: u64, bits: u32) -> i32 {
        let mut val = val as i32;
        if val >= i32::pow(2, bits - 1) {
            val -= i32::pow(2, bits);
        }
        val
    }
}

/// Hashable 64-bit address of a chunk column: chunk z in the upper half,
/// chunk x in the lower half.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct ChunkKey(pub u64);

impl ChunkKey {
    pub fn new(x: i32, z: i32) -> ChunkKey {
        ChunkKey(((z as u32 as u64) << 32) | (x as u32 as u64))
    }

    pub fn x(self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn z(self) -> i32 {
        (self.0 >> 32) as u32 as i32
    }

    pub fn pos(self) -> ChunkPos {
        ChunkPos::new(self.x(), self.z())
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> ChunkPos {
        ChunkPos { x, z }
    }

    pub fn from_block_pos(x: i32, z: i32) -> ChunkPos {
        ChunkPos::new(x >> 4, z >> 4)
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.x, self.z)
    }

    pub fn distance_sq(&self, other: ChunkPos) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dz * dz
    }

    pub fn within(&self, center: ChunkPos, r: i32) -> bool {
        (self.x - center.x).abs() <= r && (self.z - center.z).abs() <= r
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub data: [u16; SECTION_VOLUME],
}

static EMPTY_SECTION: Section = Section {
    data: [0; SECTION_VOLUME],
};

impl Section {
    pub fn new() -> Section {
        Section {
            data: [0; SECTION_VOLUME],
        }
    }

    pub fn empty() -> &'static Section {
        &EMPTY_SECTION
    }

    pub fn index(x: i32, y: i32, z: i32) -> usize {
        (x + 16 * (z + 16 * y)) as usize
    }

    /// Inverse of [`Section::index`], as `(x, y, z)`.
    pub fn coords(idx: usize) -> (u8, u8, u8) {
        let idx = idx as u16;
        ((idx & 0x0f) as u8, (idx >> 8) as u8, ((idx >> 4) & 0x0f) as u8)
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> u16 {
        if x < 0 || y < 0 || z < 0 || x > 15 || y > 15 || z > 15 {
            return 0;
        }

        self.data[Self::index(x, y, z)]
    }

    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block_state: u16) {
        self.data[Self::index(x, y, z)] = block_state
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|s| *s == 0)
    }
}

impl Default for Section {
    fn default() -> Self {
        Section::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub x: i32,
    pub z: i32,
    pub sections: [Option<Box<Section>>; SECTIONS_PER_CHUNK],
    pub biomes: [u8; 256],
}

impl Chunk {
    pub fn new(x: i32, z: i32) -> Chunk {
        Chunk {
            x,
            z,
            sections: Default::default(),
            biomes: [0; 256],
        }
    }

    pub fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.x, self.z)
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.x, self.z)
    }

    /// A missing section reads as all air.
    pub fn section(&self, idx: usize) -> &Section {
        match &self.sections[idx] {
            Some(section) => section,
            None => Section::empty(),
        }
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> u16 {
        if !(0..256).contains(&y) {
            return 0;
        }

        let section_idx = (y >> 4) as usize;
        match &self.sections[section_idx] {
            Some(section) => section.get_block(x, y & 0x0f, z),
            None => 0,
        }
    }

    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block_state: u16) {
        if !(0..256).contains(&y) {
            return;
        }

        let section = self.sections[(y >> 4) as usize].get_or_insert_with(Default::default);
        section.set_block(x, y & 0x0f, z, block_state)
    }

    pub fn set_biome(&mut self, x: i32, z: i32, biome: u8) {
        self.biomes[(z * 16 + x) as usize] = biome;
    }

    /// Bitmask of sections that carry at least one non-air block.
    pub fn section_mask(&self) -> u16 {
        let mut mask = 0u16;
        for (i, section) in self.sections.iter().enumerate() {
            if let Some(section) = section {
                if !section.is_empty() {
                    mask |= 1 << i;
                }
            }
        }
        mask
    }
}
