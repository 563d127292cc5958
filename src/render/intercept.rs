use log::{trace, warn};

use super::{cache::ClientViewCache, mapping::ViewMappings};
use crate::{
    mc::Packet,
    model::ClientId,
    world::{BlockPos, ChunkPos, Worlds},
};

/// Rewrites outbound chunk and block packets so a client sees its mapped
/// regions instead of the one it stands in.
pub struct Interceptor<'a> {
    mappings: &'a ViewMappings,
    cache: &'a mut ClientViewCache,
    worlds: &'a mut Worlds,
}

impl<'a> Interceptor<'a> {
    pub fn new(
        mappings: &'a ViewMappings,
        cache: &'a mut ClientViewCache,
        worlds: &'a mut Worlds,
    ) -> Interceptor<'a> {
        Interceptor {
            mappings,
            cache,
            worlds,
        }
    }

    /// Returns the packet to put on the wire, or `None` when it must be dropped.
    pub fn outbound(&mut self, client: ClientId, region: &str, packet: Packet) -> Option<Packet> {
        match packet {
            Packet::S21ChunkData { .. } => self.chunk_data(client, region, packet),
            Packet::S23BlockChange {
                location,
                block_state,
            } => self.block_change(client, region, location, block_state),
            packet => Some(packet),
        }
    }

    fn chunk_data(&mut self, client: ClientId, region: &str, packet: Packet) -> Option<Packet> {
        let (x, z, skylight, has_chunk) = match &packet {
            Packet::S21ChunkData {
                x,
                z,
                skylight,
                chunk,
            } => (*x, *z, *skylight, chunk.is_some()),
            _ => return Some(packet),
        };
        let pos = ChunkPos::new(x, z);
        let key = pos.key();

        if !has_chunk {
            self.cache.forget(client, key);
            return Some(packet);
        }

        let mappings = self.mappings;
        let target = mappings.resolve(client, region, key);
        if target == region {
            self.cache.record(client, key, region);
            return Some(packet);
        }

        // The light layout has to match what the client expects for the
        // dimension it is in, so the incoming sky light flag is kept.
        let rebuilt = match substitute_chunk(self.worlds, target, pos, skylight) {
            Some(rebuilt) => rebuilt,
            None => {
                warn!(
                    "Dropping chunk {:?} for {}: {} cannot load it",
                    pos, client, target
                );
                return None;
            }
        };

        trace!("Substituted chunk {:?} of {} with {} for {}", pos, region, target, client);
        self.cache.record(client, key, target);
        Some(rebuilt)
    }

    fn block_change(
        &mut self,
        client: ClientId,
        region: &str,
        location: BlockPos,
        block_state: u16,
    ) -> Option<Packet> {
        let unchanged = Packet::S23BlockChange {
            location,
            block_state,
        };
        if !self.mappings.has_overrides(client) {
            return Some(unchanged);
        }

        let mappings = self.mappings;
        let pos = location.chunk_pos();
        let target = mappings.resolve(client, region, pos.key());
        if target == region {
            return Some(unchanged);
        }

        // Someone else is already showing this client a fake block.
        if self.worlds.block_at(region, location) != Some(block_state) {
            return Some(unchanged);
        }

        if !self.worlds.load_chunk(target, pos) {
            warn!(
                "Dropping block change at {:?} for {}: {} cannot load chunk {:?}",
                location, client, target, pos
            );
            return None;
        }

        let block_state = self.worlds.block_at(target, location)?;
        Some(Packet::S23BlockChange {
            location,
            block_state,
        })
    }
}

pub fn substitute_chunk(
    worlds: &mut Worlds,
    region: &str,
    pos: ChunkPos,
    skylight: bool,
) -> Option<Packet> {
    if !worlds.load_chunk(region, pos) {
        return None;
    }
    let chunk = worlds.chunk(region, pos)?.clone();
    Some(Packet::chunk_data(chunk, skylight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block_state,
        world::{Chunk, ChunkKey, Dimension, Region},
    };

    const STONE: u16 = block_state!(1, 0);
    const GLASS: u16 = block_state!(20, 0);

    fn worlds() -> Worlds {
        let mut worlds = Worlds::new();
        for (name, state) in [("alpha", STONE), ("beta", GLASS)] {
            let mut region = Region::new(name, Dimension::Overworld);
            let mut chunk = Chunk::new(0, 0);
            chunk.set_block(1, 64, 1, state);
            region.store_chunk(chunk);
            worlds.insert_region(region);
        }
        worlds.insert_region(Region::new("void", Dimension::Overworld));
        worlds.load_chunk("alpha", ChunkPos::new(0, 0));
        worlds
    }

    fn alpha_chunk(worlds: &Worlds) -> Packet {
        let chunk = worlds.chunk("alpha", ChunkPos::new(0, 0)).unwrap().clone();
        Packet::chunk_data(chunk, true)
    }

    fn block_in(packet: &Packet) -> u16 {
        match packet {
            Packet::S21ChunkData {
                chunk: Some(chunk), ..
            } => chunk.get_block(1, 64, 1),
            Packet::S23BlockChange { block_state, .. } => *block_state,
            _ => panic!("unexpected packet {:?}", packet),
        }
    }

    #[test]
    fn identity_passes_through_and_is_recorded() {
        let mut worlds = worlds();
        let mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let client = ClientId::random();
        let packet = alpha_chunk(&worlds);

        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(client, "alpha", packet.clone());
        assert_eq!(out, Some(packet));
        assert_eq!(cache.get(client, ChunkKey::new(0, 0)), Some("alpha"));
    }

    #[test]
    fn substitutes_mapped_chunks() {
        let mut worlds = worlds();
        let mut mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let client = ClientId::random();
        mappings.set_region_override(client, "alpha", "beta");
        let packet = alpha_chunk(&worlds);

        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(client, "alpha", packet)
            .unwrap();
        assert_eq!(block_in(&out), GLASS);
        assert_eq!(cache.get(client, ChunkKey::new(0, 0)), Some("beta"));
        assert!(worlds.is_chunk_loaded("beta", ChunkPos::new(0, 0)));
    }

    #[test]
    fn unloadable_substitutes_are_dropped() {
        let mut worlds = worlds();
        let mut mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let client = ClientId::random();
        mappings.set_chunk_override(client, ChunkKey::new(0, 0), "void");
        let packet = alpha_chunk(&worlds);

        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(client, "alpha", packet);
        assert_eq!(out, None);
        assert_eq!(cache.get(client, ChunkKey::new(0, 0)), None);
    }

    #[test]
    fn unload_packets_forget_the_cache_entry() {
        let mut worlds = worlds();
        let mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let client = ClientId::random();
        cache.record(client, ChunkKey::new(0, 0), "alpha");

        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(client, "alpha", Packet::unload_chunk(0, 0));
        assert_eq!(out, Some(Packet::unload_chunk(0, 0)));
        assert_eq!(cache.get(client, ChunkKey::new(0, 0)), None);
    }

    #[test]
    fn gameplay_block_changes_show_the_substitute() {
        let mut worlds = worlds();
        let mut mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let client = ClientId::random();
        mappings.set_region_override(client, "alpha", "beta");

        let location = BlockPos::new(1, 64, 1);
        let packet = Packet::S23BlockChange {
            location,
            block_state: STONE,
        };
        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(client, "alpha", packet)
            .unwrap();
        assert_eq!(block_in(&out), GLASS);
    }

    #[test]
    fn fabricated_block_changes_are_left_alone() {
        let mut worlds = worlds();
        let mut mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let client = ClientId::random();
        mappings.set_region_override(client, "alpha", "beta");

        let packet = Packet::S23BlockChange {
            location: BlockPos::new(1, 64, 1),
            block_state: block_state!(41, 0),
        };
        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(client, "alpha", packet.clone());
        assert_eq!(out, Some(packet));
    }

    #[test]
    fn unmapped_clients_get_block_changes_untouched() {
        let mut worlds = worlds();
        let mappings = ViewMappings::new();
        let mut cache = ClientViewCache::new();
        let packet = Packet::S23BlockChange {
            location: BlockPos::new(1, 64, 1),
            block_state: STONE,
        };

        let out = Interceptor::new(&mappings, &mut cache, &mut worlds)
            .outbound(ClientId::random(), "alpha", packet.clone());
        assert_eq!(out, Some(packet));
    }
}
