use std::collections::HashSet;

use log::{trace, warn};

use super::{
    cache::ClientViewCache,
    diff::diff_chunk,
    intercept::substitute_chunk,
    mapping::ViewMappings,
    pacing::ScheduledUpdate,
};
use crate::{
    mc::Packet,
    model::ClientId,
    world::{ChunkKey, ChunkPos, Worlds},
};

/// Where a client stands, as far as a resync cares.
#[derive(Debug, Clone, Copy)]
pub struct ClientView<'a> {
    pub region: &'a str,
    pub center: ChunkPos,
    pub view_dist: i32,
    /// Chunks the host has streamed to the client and not unloaded since.
    pub known: &'a HashSet<ChunkPos>,
}

#[derive(Debug, Default)]
pub struct ResyncPlan {
    pub updates: Vec<ScheduledUpdate>,
    /// Chunks whose client-side content already matches their new target.
    pub settled: Vec<(ChunkKey, String)>,
    pub examined: usize,
}

pub fn plan_incremental(
    mappings: &ViewMappings,
    cache: &ClientViewCache,
    worlds: &mut Worlds,
    client: ClientId,
    view: &ClientView,
    radius: i32,
) -> ResyncPlan {
    let mut chunks = worlds
        .loaded_chunks(view.region)
        .into_iter()
        .filter(|pos| pos.within(view.center, radius))
        .collect::<Vec<ChunkPos>>();
    chunks.sort_by_key(|pos| (pos.distance_sq(view.center), pos.x, pos.z));

    let skylight = worlds
        .dimension(view.region)
        .map_or(true, |dimension| dimension.has_skylight());

    let mut plan = ResyncPlan::default();
    for pos in chunks {
        plan.examined += 1;
        let key = pos.key();
        let target = mappings.resolve(client, view.region, key);

        match cache.get(client, key) {
            Some(baseline) if baseline == target => {}
            Some(baseline) if worlds.load_chunk(baseline, pos) => {
                diff_against(worlds, &mut plan, pos, target, baseline)
            }
            Some(_) => full_resend(worlds, &mut plan, pos, target, skylight),
            // Never delivered: only resend what the client is meant to hold.
            None if view.known.contains(&pos) => full_resend(worlds, &mut plan, pos, target, skylight),
            None => {}
        }
    }
    plan
}

fn diff_against(worlds: &mut Worlds, plan: &mut ResyncPlan, pos: ChunkPos, target: &str, baseline: &str) {
    if !worlds.load_chunk(target, pos) {
        warn!("Skipping chunk {:?}: {} cannot load it", pos, target);
        return;
    }
    let (target_chunk, baseline_chunk) = match (worlds.chunk(target, pos), worlds.chunk(baseline, pos)) {
        (Some(t), Some(b)) => (t, b),
        _ => return,
    };

    let sections = diff_chunk(target_chunk, baseline_chunk);
    let key = pos.key();
    if sections.is_empty() {
        plan.settled.push((key, target.to_string()));
        return;
    }

    trace!("Chunk {:?}: {} sections differ between {} and {}", pos, sections.len(), baseline, target);
    let last = sections.len() - 1;
    for (i, (_, records)) in sections.into_iter().enumerate() {
        let packet = Packet::S22MultiBlockChange {
            chunk_x: pos.x,
            chunk_z: pos.z,
            records,
        };
        plan.updates.push(if i == last {
            ScheduledUpdate::committing(packet, key, target)
        } else {
            ScheduledUpdate::new(packet)
        });
    }
}

fn full_resend(worlds: &mut Worlds, plan: &mut ResyncPlan, pos: ChunkPos, target: &str, skylight: bool) {
    match substitute_chunk(worlds, target, pos, skylight) {
        Some(packet) => plan
            .updates
            .push(ScheduledUpdate::committing(packet, pos.key(), target)),
        None => warn!("Skipping chunk {:?}: {} cannot load it", pos, target),
    }
}
