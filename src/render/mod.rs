pub mod cache;
pub mod diff;
pub mod intercept;
pub mod mapping;
pub mod pacing;
pub mod resync;

use flume::{Receiver, Sender};
use log::{debug, info};
use stopwatch::Stopwatch;

use self::{
    cache::ClientViewCache,
    intercept::Interceptor,
    mapping::ViewMappings,
    pacing::PacedDelivery,
    resync::plan_incremental,
};
use crate::{
    config::ServerConfig,
    mc::Packet,
    model::ClientId,
    world::{ChunkKey, Worlds},
};

pub use self::resync::ClientView;

pub trait ClientLink {
    fn is_online(&self, client: ClientId) -> bool;

    fn send_packet(&mut self, client: ClientId, packet: Packet);

    /// Makes the client drop all world state and stream it again from scratch.
    fn reload_view(&mut self, client: ClientId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    Started(ClientId),
    Finished(ClientId),
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub realtime: bool,
    pub max_distance: i32,
    pub updates_per_tick: usize,
}

impl RenderSettings {
    pub fn from_config(config: &ServerConfig) -> RenderSettings {
        RenderSettings {
            realtime: config.realtime_world_loading,
            max_distance: config.max_realtime_render_distance,
            updates_per_tick: config.updates_per_tick,
        }
    }

    pub fn radius(&self, view_dist: i32) -> i32 {
        view_dist.min(self.max_distance) + 1
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings::from_config(&ServerConfig::default())
    }
}

pub struct ViewSystem {
    settings: RenderSettings,
    mappings: ViewMappings,
    cache: ClientViewCache,
    delivery: PacedDelivery,
    subscribers: Vec<Sender<RenderEvent>>,
}

impl ViewSystem {
    pub fn new(settings: RenderSettings) -> ViewSystem {
        let delivery = PacedDelivery::new(settings.updates_per_tick);
        ViewSystem {
            settings,
            mappings: ViewMappings::new(),
            cache: ClientViewCache::new(),
            delivery,
            subscribers: Vec::new(),
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ClientViewCache {
        &self.cache
    }

    pub fn subscribe(&mut self) -> Receiver<RenderEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn set_region_override(&mut self, client: ClientId, real: &str, substitute: &str) {
        debug!("{} now sees {} as {}", client, real, substitute);
        self.mappings.set_region_override(client, real, substitute);
    }

    pub fn set_chunk_override(&mut self, client: ClientId, key: ChunkKey, substitute: &str) {
        debug!("{} now sees chunk {:?} from {}", client, key.pos(), substitute);
        self.mappings.set_chunk_override(client, key, substitute);
    }

    pub fn clear_client(&mut self, client: ClientId) -> bool {
        self.mappings.clear_client(client)
    }

    pub fn clear_region_override(&mut self, client: ClientId, real: &str) -> bool {
        self.mappings.clear_region_override(client, real)
    }

    pub fn clear_chunk_override(&mut self, client: ClientId, key: ChunkKey) -> bool {
        self.mappings.clear_chunk_override(client, key)
    }

    pub fn resolve<'a>(&'a self, client: ClientId, real: &'a str, key: ChunkKey) -> &'a str {
        self.mappings.resolve(client, real, key)
    }

    /// Outbound hook; `None` means the packet must not be sent.
    pub fn intercept(
        &mut self,
        client: ClientId,
        region: &str,
        packet: Packet,
        worlds: &mut Worlds,
    ) -> Option<Packet> {
        Interceptor::new(&self.mappings, &mut self.cache, worlds).outbound(client, region, packet)
    }

    pub fn resync(
        &mut self,
        client: ClientId,
        view: &ClientView,
        worlds: &mut Worlds,
        link: &mut impl ClientLink,
    ) {
        self.emit(RenderEvent::Started(client));

        if !self.settings.realtime {
            self.delivery.cancel(client);
            link.reload_view(client);
            return;
        }

        let sw = Stopwatch::start_new();
        let radius = self.settings.radius(view.view_dist);
        let plan = plan_incremental(&self.mappings, &self.cache, worlds, client, view, radius);
        for (key, region) in &plan.settled {
            self.cache.record(client, *key, region);
        }

        info!(
            "Resync of {}: {} chunks examined, {} updates queued in {}ms",
            client,
            plan.examined,
            plan.updates.len(),
            sw.elapsed_ms()
        );

        if plan.updates.is_empty() {
            self.delivery.cancel(client);
            self.emit(RenderEvent::Finished(client));
        } else {
            self.delivery.schedule(client, plan.updates);
        }
    }

    pub fn is_resyncing(&self, client: ClientId) -> bool {
        self.delivery.is_pending(client)
    }

    /// Sends this tick's share of queued updates. Returns how many went out.
    pub fn tick(&mut self, link: &mut impl ClientLink) -> usize {
        let report = self.delivery.tick(link);
        for (client, key, region) in &report.commits {
            self.cache.record(*client, *key, region);
        }
        for client in report.finished {
            self.emit(RenderEvent::Finished(client));
        }
        report.sent
    }

    /// For a client that is about to receive its whole view again.
    pub fn forget_view(&mut self, client: ClientId) {
        self.cache.clear_client(client);
        self.delivery.cancel(client);
    }

    /// Called by the host once a requested view reload has been streamed.
    pub fn finish_reload(&mut self, client: ClientId) {
        self.emit(RenderEvent::Finished(client));
    }

    pub fn disconnect(&mut self, client: ClientId) {
        self.mappings.clear_client(client);
        self.cache.clear_client(client);
        self.delivery.cancel(client);
    }

    fn emit(&mut self, event: RenderEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}
