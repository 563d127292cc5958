use std::collections::HashMap;

use log::{debug, trace};
use serde_derive::{Deserialize, Serialize};

use crate::{error::Result, model::Vec3d};

use super::{BlockPos, Chunk, ChunkPos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Overworld,
    Nether,
    End,
}

impl Dimension {
    pub fn id(self) -> i32 {
        match self {
            Dimension::Overworld => 0,
            Dimension::Nether => -1,
            Dimension::End => 1,
        }
    }

    pub fn has_skylight(self) -> bool {
        self == Dimension::Overworld
    }

    pub fn other(self) -> Dimension {
        match self {
            Dimension::Overworld => Dimension::Nether,
            _ => Dimension::Overworld,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i32,
    pub kind: String,
    pub position: Vec3d,
    #[serde(default)]
    pub player: bool,
}

impl Entity {
    pub fn chunk_pos(&self) -> ChunkPos {
        BlockPos::from_pos(self.position.x, self.position.y, self.position.z).chunk_pos()
    }
}

/// An entity in the engine's serialized form. Consumers treat the bytes as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityBlob(pub Vec<u8>);

#[derive(Serialize, Deserialize)]
struct EntityRecord {
    kind: String,
    position: Vec3d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Gameplay,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    RegionLoaded {
        region: String,
    },
    RegionUnloaded {
        region: String,
    },
    ChunkLoaded {
        region: String,
        pos: ChunkPos,
    },
    BlockChanged {
        region: String,
        pos: BlockPos,
        block_state: u16,
        cause: ChangeCause,
    },
}

#[derive(Debug, Clone)]
pub struct RegionData {
    pub name: String,
    pub dimension: Dimension,
    pub time: i64,
    pub chunks: Vec<Chunk>,
    pub entities: Vec<Entity>,
}

impl RegionData {
    pub fn new(name: &str, dimension: Dimension) -> RegionData {
        RegionData {
            name: name.to_string(),
            dimension,
            time: 0,
            chunks: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// A square of chunks around the origin with `floor` filling everything below y = 64.
    pub fn flat(name: &str, dimension: Dimension, radius: i32, floor: u16) -> RegionData {
        let mut data = RegionData::new(name, dimension);
        for cx in -radius..=radius {
            for cz in -radius..=radius {
                let mut chunk = Chunk::new(cx, cz);
                for x in 0..16 {
                    for z in 0..16 {
                        for y in 0..64 {
                            chunk.set_block(x, y, z, floor);
                        }
                    }
                }
                data.chunks.push(chunk);
            }
        }
        data
    }

    pub fn renamed(mut self, name: &str) -> RegionData {
        self.name = name.to_string();
        self
    }
}

pub struct Region {
    name: String,
    dimension: Dimension,
    time: i64,
    loaded: HashMap<ChunkPos, Chunk>,
    stored: HashMap<ChunkPos, Chunk>,
    entities: Vec<Entity>,
}

impl Region {
    pub fn new(name: &str, dimension: Dimension) -> Region {
        Region::from_data(RegionData::new(name, dimension))
    }

    pub fn from_data(data: RegionData) -> Region {
        Region {
            name: data.name,
            dimension: data.dimension,
            time: data.time,
            loaded: HashMap::new(),
            stored: data.chunks.into_iter().map(|c| (c.pos(), c)).collect(),
            entities: data.entities,
        }
    }

    pub fn to_data(&self) -> RegionData {
        RegionData {
            name: self.name.clone(),
            dimension: self.dimension,
            time: self.time,
            chunks: self
                .loaded
                .values()
                .chain(self.stored.values())
                .cloned()
                .collect(),
            entities: self.entities.iter().filter(|e| !e.player).cloned().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Places a chunk into storage without loading it.
    pub fn store_chunk(&mut self, chunk: Chunk) {
        let pos = chunk.pos();
        self.loaded.remove(&pos);
        self.stored.insert(pos, chunk);
    }
}

pub struct Worlds {
    regions: HashMap<String, Region>,
    events: Vec<WorldEvent>,
    next_entity_id: i32,
}

impl Worlds {
    pub fn new() -> Worlds {
        Worlds {
            regions: HashMap::new(),
            events: Vec::new(),
            next_entity_id: 1,
        }
    }

    pub fn insert_region(&mut self, region: Region) {
        let name = region.name.clone();
        debug!("Region {} loaded ({:?})", name, region.dimension);
        self.regions.insert(name.clone(), region);
        self.events.push(WorldEvent::RegionLoaded { region: name });
    }

    pub fn remove_region(&mut self, name: &str) -> Option<Region> {
        let region = self.regions.remove(name)?;
        debug!("Region {} unloaded", name);
        self.events.push(WorldEvent::RegionUnloaded {
            region: name.to_string(),
        });
        Some(region)
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn region_mut(&mut self, name: &str) -> Option<&mut Region> {
        self.regions.get_mut(name)
    }

    pub fn has_region(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }

    pub fn region_names(&self) -> Vec<String> {
        self.regions.keys().cloned().collect()
    }

    pub fn dimension(&self, name: &str) -> Option<Dimension> {
        self.regions.get(name).map(|r| r.dimension)
    }

    pub fn is_chunk_loaded(&self, region: &str, pos: ChunkPos) -> bool {
        self.regions
            .get(region)
            .map_or(false, |r| r.loaded.contains_key(&pos))
    }

    pub fn loaded_chunks(&self, region: &str) -> Vec<ChunkPos> {
        match self.regions.get(region) {
            Some(r) => r.loaded.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    pub fn chunk(&self, region: &str, pos: ChunkPos) -> Option<&Chunk> {
        self.regions.get(region)?.loaded.get(&pos)
    }

    pub fn load_chunk(&mut self, region: &str, pos: ChunkPos) -> bool {
        let r = match self.regions.get_mut(region) {
            Some(r) => r,
            None => return false,
        };
        if r.loaded.contains_key(&pos) {
            return true;
        }

        match r.stored.remove(&pos) {
            Some(chunk) => {
                trace!("Loading chunk {:?} of {}", pos, region);
                r.loaded.insert(pos, chunk);
                self.events.push(WorldEvent::ChunkLoaded {
                    region: region.to_string(),
                    pos,
                });
                true
            }
            None => false,
        }
    }

    pub fn unload_chunk(&mut self, region: &str, pos: ChunkPos) -> bool {
        match self.regions.get_mut(region) {
            Some(r) => match r.loaded.remove(&pos) {
                Some(chunk) => {
                    r.stored.insert(pos, chunk);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Inserts a freshly built chunk as loaded.
    pub fn put_chunk(&mut self, region: &str, chunk: Chunk) -> bool {
        let r = match self.regions.get_mut(region) {
            Some(r) => r,
            None => return false,
        };
        let pos = chunk.pos();
        r.stored.remove(&pos);
        r.loaded.insert(pos, chunk);
        self.events.push(WorldEvent::ChunkLoaded {
            region: region.to_string(),
            pos,
        });
        true
    }

    pub fn block_at(&self, region: &str, pos: BlockPos) -> Option<u16> {
        let (x, y, z) = pos.local();
        self.chunk(region, pos.chunk_pos())
            .map(|chunk| chunk.get_block(x, y, z))
    }

    /// Loads or creates the chunk first. Only real changes emit `BlockChanged`.
    pub fn set_block(
        &mut self,
        region: &str,
        pos: BlockPos,
        block_state: u16,
        cause: ChangeCause,
    ) -> bool {
        if !(0..256).contains(&pos.y) {
            return false;
        }
        let chunk_pos = pos.chunk_pos();
        if !self.load_chunk(region, chunk_pos) && !self.put_chunk(region, Chunk::new(chunk_pos.x, chunk_pos.z)) {
            return false;
        }

        let chunk = match self
            .regions
            .get_mut(region)
            .and_then(|r| r.loaded.get_mut(&chunk_pos))
        {
            Some(chunk) => chunk,
            None => return false,
        };

        let (x, y, z) = pos.local();
        if chunk.get_block(x, y, z) == block_state {
            return true;
        }
        chunk.set_block(x, y, z, block_state);
        self.events.push(WorldEvent::BlockChanged {
            region: region.to_string(),
            pos,
            block_state,
            cause,
        });
        true
    }

    pub fn entities(&self, region: &str) -> &[Entity] {
        match self.regions.get(region) {
            Some(r) => &r.entities,
            None => &[],
        }
    }

    pub fn chunk_entities<'a>(
        &'a self,
        region: &str,
        pos: ChunkPos,
    ) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities(region)
            .iter()
            .filter(move |e| e.chunk_pos() == pos)
    }

    pub fn add_entity(
        &mut self,
        region: &str,
        kind: &str,
        position: Vec3d,
        player: bool,
    ) -> Option<i32> {
        let id = self.next_entity_id;
        let r = self.regions.get_mut(region)?;
        r.entities.push(Entity {
            id,
            kind: kind.to_string(),
            position,
            player,
        });
        self.next_entity_id += 1;
        Some(id)
    }

    pub fn move_entity(&mut self, region: &str, id: i32, position: Vec3d) -> bool {
        let entity = self
            .regions
            .get_mut(region)
            .and_then(|r| r.entities.iter_mut().find(|e| e.id == id));
        match entity {
            Some(entity) => {
                entity.position = position;
                true
            }
            None => false,
        }
    }

    pub fn remove_entity(&mut self, region: &str, id: i32) -> bool {
        match self.regions.get_mut(region) {
            Some(r) => {
                let before = r.entities.len();
                r.entities.retain(|e| e.id != id);
                r.entities.len() != before
            }
            None => false,
        }
    }

    pub fn remove_non_player_entities(&mut self, region: &str) -> usize {
        match self.regions.get_mut(region) {
            Some(r) => {
                let before = r.entities.len();
                r.entities.retain(|e| e.player);
                before - r.entities.len()
            }
            None => 0,
        }
    }

    pub fn serialize_entity(&self, entity: &Entity) -> Result<EntityBlob> {
        let record = EntityRecord {
            kind: entity.kind.clone(),
            position: entity.position,
        };
        Ok(EntityBlob(serde_json::to_vec(&record)?))
    }

    /// Spawns a serialized entity under a fresh id.
    pub fn spawn_entity(&mut self, region: &str, blob: &EntityBlob) -> Result<Option<i32>> {
        let record: EntityRecord = serde_json::from_slice(&blob.0)?;
        Ok(self.add_entity(region, &record.kind, record.position, false))
    }

    pub fn time(&self, region: &str) -> Option<i64> {
        self.regions.get(region).map(|r| r.time)
    }

    pub fn set_time(&mut self, region: &str, time: i64) -> bool {
        match self.regions.get_mut(region) {
            Some(r) => {
                r.time = time;
                true
            }
            None => false,
        }
    }

    pub fn advance_time(&mut self, ticks: i64) {
        for r in self.regions.values_mut() {
            r.time += ticks;
        }
    }

    pub fn snapshot(&self, region: &str) -> Option<RegionData> {
        self.regions.get(region).map(|r| r.to_data())
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Default for Worlds {
    fn default() -> Self {
        Worlds::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_state;

    fn worlds_with(name: &str) -> Worlds {
        let mut worlds = Worlds::new();
        let mut region = Region::new(name, Dimension::Overworld);
        region.store_chunk(Chunk::new(0, 0));
        worlds.insert_region(region);
        worlds.drain_events();
        worlds
    }

    #[test]
    fn load_chunk_moves_from_storage_once() {
        let mut worlds = worlds_with("alpha");
        assert!(!worlds.is_chunk_loaded("alpha", ChunkPos::new(0, 0)));
        assert!(worlds.load_chunk("alpha", ChunkPos::new(0, 0)));
        assert!(worlds.load_chunk("alpha", ChunkPos::new(0, 0)));
        assert!(!worlds.load_chunk("alpha", ChunkPos::new(5, 5)));
        assert!(!worlds.load_chunk("missing", ChunkPos::new(0, 0)));

        let events = worlds.drain_events();
        assert_eq!(
            events,
            vec![WorldEvent::ChunkLoaded {
                region: "alpha".to_string(),
                pos: ChunkPos::new(0, 0)
            }]
        );
    }

    #[test]
    fn set_block_reports_only_real_changes() {
        let mut worlds = worlds_with("alpha");
        let pos = BlockPos::new(1, 64, 1);
        let stone = block_state!(1, 0);

        assert!(worlds.set_block("alpha", pos, stone, ChangeCause::Gameplay));
        assert!(worlds.set_block("alpha", pos, stone, ChangeCause::Gameplay));
        assert_eq!(worlds.block_at("alpha", pos), Some(stone));

        let changes = worlds
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, WorldEvent::BlockChanged { .. }))
            .count();
        assert_eq!(changes, 1);
    }

    #[test]
    fn set_block_creates_missing_chunks() {
        let mut worlds = worlds_with("alpha");
        let pos = BlockPos::new(-40, 10, 300);
        assert!(worlds.set_block("alpha", pos, block_state!(3, 0), ChangeCause::Gameplay));
        assert!(worlds.is_chunk_loaded("alpha", pos.chunk_pos()));
    }

    #[test]
    fn set_block_outside_the_build_height_is_refused() {
        let mut worlds = worlds_with("alpha");
        for y in [-1, 256, 300] {
            let pos = BlockPos::new(1, y, 1);
            assert!(!worlds.set_block("alpha", pos, block_state!(1, 0), ChangeCause::Gameplay));
        }
        assert!(!worlds.is_chunk_loaded("alpha", ChunkPos::new(0, 0)));
        assert!(worlds.drain_events().is_empty());
    }

    #[test]
    fn entity_blobs_respawn_with_fresh_ids() {
        let mut worlds = worlds_with("alpha");
        let id = worlds
            .add_entity("alpha", "pig", Vec3d::new(1.5, 64.0, 2.5), false)
            .unwrap();
        let entity = worlds.entities("alpha")[0].clone();
        let blob = worlds.serialize_entity(&entity).unwrap();

        let respawned = worlds.spawn_entity("alpha", &blob).unwrap().unwrap();
        assert_ne!(respawned, id);
        let copy = worlds.entities("alpha").iter().find(|e| e.id == respawned).unwrap();
        assert_eq!(copy.kind, "pig");
        assert_eq!(copy.position, entity.position);
    }

    #[test]
    fn remove_non_player_entities_keeps_players() {
        let mut worlds = worlds_with("alpha");
        worlds.add_entity("alpha", "pig", Vec3d::default(), false);
        worlds.add_entity("alpha", "player", Vec3d::default(), true);
        assert_eq!(worlds.remove_non_player_entities("alpha"), 1);
        assert_eq!(worlds.entities("alpha").len(), 1);
    }

    #[test]
    fn data_round_trip_keeps_chunks_unloaded() {
        let mut worlds = worlds_with("alpha");
        worlds.set_block("alpha", BlockPos::new(0, 0, 0), block_state!(7, 0), ChangeCause::Gameplay);
        let data = worlds.snapshot("alpha").unwrap();
        let region = Region::from_data(data.renamed("beta"));
        worlds.insert_region(region);

        assert!(!worlds.is_chunk_loaded("beta", ChunkPos::new(0, 0)));
        assert!(worlds.load_chunk("beta", ChunkPos::new(0, 0)));
        assert_eq!(worlds.block_at("beta", BlockPos::new(0, 0, 0)), Some(block_state!(7, 0)));
    }
}
