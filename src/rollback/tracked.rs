use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use stopwatch::Stopwatch;

use crate::world::{BlockPos, ChangeCause, Chunk, ChunkKey, ChunkPos, EntityBlob, Worlds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Tracking,
    Resetting,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub restored: usize,
    /// Dirty voxels that already held their saved state.
    pub unchanged: usize,
    /// Dirty voxels whose chunk was never captured.
    pub skipped: usize,
    pub removed: usize,
    pub spawned: usize,
}

/// Checkpoint of one region: the chunks seen since the last save point, the
/// voxels touched since then, its non-player entities and its clock.
pub struct TrackedRegion {
    name: String,
    state: TrackingState,
    chunks: HashMap<ChunkKey, Chunk>,
    dirty: HashSet<BlockPos>,
    entities: Vec<EntityBlob>,
    time: i64,
}

impl TrackedRegion {
    pub fn new(name: &str) -> TrackedRegion {
        TrackedRegion {
            name: name.to_string(),
            state: TrackingState::Tracking,
            chunks: HashMap::new(),
            dirty: HashSet::new(),
            entities: Vec::new(),
            time: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn captured_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_captured(&self, key: ChunkKey) -> bool {
        self.chunks.contains_key(&key)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drops the old checkpoint and captures the region as it is now. Returns
    /// false when the region is not loaded.
    pub fn update_save(&mut self, worlds: &Worlds) -> bool {
        let time = match worlds.time(&self.name) {
            Some(time) => time,
            None => return false,
        };

        let sw = Stopwatch::start_new();
        self.dirty.clear();
        self.chunks.clear();
        self.entities.clear();
        self.time = time;

        for pos in worlds.loaded_chunks(&self.name) {
            self.capture_chunk(worlds, pos);
        }
        info!(
            "Checkpoint of {}: {} chunks, {} entities in {}ms",
            self.name,
            self.chunks.len(),
            self.entities.len(),
            sw.elapsed_ms()
        );
        true
    }

    /// Captures a loaded chunk and the non-player entities standing in it.
    pub fn capture_chunk(&mut self, worlds: &Worlds, pos: ChunkPos) -> bool {
        let key = pos.key();
        if self.chunks.contains_key(&key) {
            return false;
        }
        let chunk = match worlds.chunk(&self.name, pos) {
            Some(chunk) => chunk.clone(),
            None => return false,
        };
        self.chunks.insert(key, chunk);

        for entity in worlds.chunk_entities(&self.name, pos).filter(|e| !e.player) {
            match worlds.serialize_entity(entity) {
                Ok(blob) => self.entities.push(blob),
                Err(e) => warn!("Could not capture entity {} in {}: {}", entity.id, self.name, e),
            }
        }
        true
    }

    pub fn mark_dirty(&mut self, pos: BlockPos) -> bool {
        self.dirty.insert(pos)
    }

    /// `None` when the region is not loaded.
    pub fn reset(&mut self, worlds: &mut Worlds) -> Option<ResetReport> {
        if !worlds.has_region(&self.name) {
            debug!("Not resetting {}: region is not loaded", self.name);
            return None;
        }

        let sw = Stopwatch::start_new();
        self.state = TrackingState::Resetting;
        let mut report = ResetReport::default();

        for pos in self.dirty.drain() {
            let chunk = match self.chunks.get(&pos.chunk_pos().key()) {
                Some(chunk) => chunk,
                None => {
                    report.skipped += 1;
                    continue;
                }
            };

            let (x, y, z) = pos.local();
            let block_state = chunk.get_block(x, y, z);
            worlds.load_chunk(&self.name, pos.chunk_pos());
            if worlds.block_at(&self.name, pos) == Some(block_state) {
                report.unchanged += 1;
            } else if worlds.set_block(&self.name, pos, block_state, ChangeCause::Rollback) {
                report.restored += 1;
            } else {
                report.skipped += 1;
            }
        }

        report.removed = worlds.remove_non_player_entities(&self.name);
        for blob in &self.entities {
            match worlds.spawn_entity(&self.name, blob) {
                Ok(Some(_)) => report.spawned += 1,
                Ok(None) => {}
                Err(e) => warn!("Could not respawn entity in {}: {}", self.name, e),
            }
        }
        worlds.set_time(&self.name, self.time);

        self.state = TrackingState::Tracking;
        info!(
            "Reset {}: {} voxels restored, {} skipped, {} entities respawned in {}ms",
            self.name,
            report.restored,
            report.skipped,
            report.spawned,
            sw.elapsed_ms()
        );
        Some(report)
    }
}
