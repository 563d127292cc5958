mod tracked;

pub use tracked::{ResetReport, TrackedRegion, TrackingState};

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    error::{Error, Result},
    world::{ChangeCause, WorldEvent, Worlds},
};

/// The set of regions whose state can be rolled back, kept in step with the
/// catalog's rollback flags.
#[derive(Default)]
pub struct RegionTracker {
    tracked: HashMap<String, TrackedRegion>,
}

impl RegionTracker {
    pub fn new() -> RegionTracker {
        RegionTracker::default()
    }

    /// Starts tracking new rollback regions and drops the ones that lost the
    /// flag or left the catalog. Regions already tracked keep their checkpoint.
    pub fn sync<'a>(&mut self, rollback_regions: impl IntoIterator<Item = &'a str>, worlds: &Worlds) {
        let wanted = rollback_regions.into_iter().collect::<HashSet<&str>>();

        self.tracked.retain(|name, _| {
            let keep = wanted.contains(name.as_str());
            if !keep {
                debug!("No longer tracking {}", name);
            }
            keep
        });

        for name in wanted {
            if self.tracked.contains_key(name) {
                continue;
            }
            debug!("Tracking {}", name);
            let mut tracked = TrackedRegion::new(name);
            tracked.update_save(worlds);
            self.tracked.insert(name.to_string(), tracked);
        }
    }

    pub fn handle_event(&mut self, event: &WorldEvent, worlds: &Worlds) {
        match event {
            WorldEvent::RegionLoaded { region } => {
                if let Some(tracked) = self.tracked.get_mut(region) {
                    tracked.update_save(worlds);
                }
            }
            WorldEvent::ChunkLoaded { region, pos } => {
                if let Some(tracked) = self.tracked.get_mut(region) {
                    tracked.capture_chunk(worlds, *pos);
                }
            }
            WorldEvent::BlockChanged {
                region,
                pos,
                cause: ChangeCause::Gameplay,
                ..
            } => {
                if let Some(tracked) = self.tracked.get_mut(region) {
                    tracked.mark_dirty(*pos);
                }
            }
            _ => {}
        }
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.contains_key(name)
    }

    pub fn tracked(&self, name: &str) -> Option<&TrackedRegion> {
        self.tracked.get(name)
    }

    pub fn tracked_mut(&mut self, name: &str) -> Option<&mut TrackedRegion> {
        self.tracked.get_mut(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tracked.keys().cloned().collect()
    }

    pub fn update_save(&mut self, name: &str, worlds: &Worlds) -> Result<bool> {
        match self.tracked.get_mut(name) {
            Some(tracked) => Ok(tracked.update_save(worlds)),
            None => Err(Error::UnknownRegion(name.to_string())),
        }
    }

    pub fn reset(&mut self, name: &str, worlds: &mut Worlds) -> Result<Option<ResetReport>> {
        match self.tracked.get_mut(name) {
            Some(tracked) => Ok(tracked.reset(worlds)),
            None => Err(Error::UnknownRegion(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block_state,
        world::{BlockPos, Chunk, ChunkPos, Dimension, Region},
    };

    fn feed(tracker: &mut RegionTracker, worlds: &mut Worlds) {
        for event in worlds.drain_events() {
            tracker.handle_event(&event, worlds);
        }
    }

    fn lobby() -> Region {
        let mut region = Region::new("lobby", Dimension::Overworld);
        let mut chunk = Chunk::new(0, 0);
        chunk.set_block(2, 10, 2, block_state!(1, 0));
        region.store_chunk(chunk);
        region
    }

    #[test]
    fn sync_follows_the_catalog() {
        let worlds = Worlds::new();
        let mut tracker = RegionTracker::new();
        tracker.sync(["a", "b"], &worlds);
        assert!(tracker.is_tracked("a") && tracker.is_tracked("b"));

        tracker.sync(["b", "c"], &worlds);
        assert!(!tracker.is_tracked("a"));
        let mut names = tracker.names();
        names.sort();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn events_drive_capture_and_dirty_tracking() {
        let mut worlds = Worlds::new();
        let mut tracker = RegionTracker::new();
        tracker.sync(["lobby"], &worlds);

        worlds.insert_region(lobby());
        worlds.load_chunk("lobby", ChunkPos::new(0, 0));
        feed(&mut tracker, &mut worlds);
        assert!(tracker.tracked("lobby").unwrap().is_captured(ChunkPos::new(0, 0).key()));

        let pos = BlockPos::new(2, 10, 2);
        worlds.set_block("lobby", pos, 0, ChangeCause::Gameplay);
        feed(&mut tracker, &mut worlds);
        assert_eq!(tracker.tracked("lobby").unwrap().dirty_count(), 1);

        let report = tracker.reset("lobby", &mut worlds).unwrap().unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(worlds.block_at("lobby", pos), Some(block_state!(1, 0)));

        // The restore itself must not be recorded as a new change.
        feed(&mut tracker, &mut worlds);
        assert_eq!(tracker.tracked("lobby").unwrap().dirty_count(), 0);
    }

    #[test]
    fn untracked_regions_are_errors() {
        let mut worlds = Worlds::new();
        let mut tracker = RegionTracker::new();
        assert!(matches!(
            tracker.reset("nowhere", &mut worlds),
            Err(Error::UnknownRegion(_))
        ));
        assert!(tracker.update_save("nowhere", &worlds).is_err());
    }
}
