use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::Arc,
};

use flume::{Receiver, Sender};
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc;

use crate::{
    catalog::{RegionCatalog, RegionFlags, StorageCallback},
    config::ServerConfig,
    error::{Error, Result},
    mc::Packet,
    model::{ClientId, Session, Vec3d},
    render::{ClientLink, ClientView, RenderEvent, RenderSettings, ViewSystem},
    rollback::{RegionTracker, ResetReport},
    world::{BlockPos, ChangeCause, Chunk, ChunkPos, Region, WorldEvent, Worlds},
};

const GAME_MODE: u8 = 1;
const DIFFICULTY: u8 = 0;
const LEVEL_TYPE: &str = "flat";

/// Messages from the per-connection network tasks to the main loop.
#[derive(Debug)]
pub enum ClientEvent {
    Joined {
        id: ClientId,
        username: String,
        tx: mpsc::UnboundedSender<Packet>,
    },
    Moved {
        id: ClientId,
        position: Vec3d,
    },
    Left {
        id: ClientId,
    },
}

/// Work handed back to the main loop, usually from a storage callback.
pub type MainThreadTask = Box<dyn FnOnce(&mut ServerHandler) + Send>;

struct Connection {
    session: Session,
    entity_id: Option<i32>,
    tx: mpsc::UnboundedSender<Packet>,
}

#[derive(Default)]
pub struct Connections {
    clients: HashMap<ClientId, Connection>,
    reloads: HashSet<ClientId>,
}

impl Connections {
    pub fn session(&self, id: ClientId) -> Option<&Session> {
        self.clients.get(&id).map(|c| &c.session)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn in_region(&self, region: &str) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| c.session.region == region)
            .map(|c| c.session.id)
            .collect()
    }
}

impl ClientLink for Connections {
    fn is_online(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    fn send_packet(&mut self, client: ClientId, packet: Packet) {
        if let Some(conn) = self.clients.get(&client) {
            if conn.tx.send(packet).is_err() {
                trace!("Outbound channel of {} is closed", client);
            }
        }
    }

    fn reload_view(&mut self, client: ClientId) {
        self.reloads.insert(client);
    }
}

pub struct ServerHandler {
    pub config: Arc<ServerConfig>,
    worlds: Worlds,
    connections: Connections,
    views: ViewSystem,
    render_events: Receiver<RenderEvent>,
    tracker: RegionTracker,
    catalog: Arc<dyn RegionCatalog>,
    event_tx: Sender<ClientEvent>,
    event_rx: Receiver<ClientEvent>,
    task_tx: Sender<MainThreadTask>,
    task_rx: Receiver<MainThreadTask>,
}

impl ServerHandler {
    pub fn new(config: Arc<ServerConfig>, catalog: Arc<dyn RegionCatalog>) -> ServerHandler {
        let (event_tx, event_rx) = flume::unbounded();
        let (task_tx, task_rx) = flume::unbounded();
        let mut views = ViewSystem::new(RenderSettings::from_config(&config));
        let render_events = views.subscribe();

        ServerHandler {
            config,
            worlds: Worlds::new(),
            connections: Connections::default(),
            views,
            render_events,
            tracker: RegionTracker::new(),
            catalog,
            event_tx,
            event_rx,
            task_tx,
            task_rx,
        }
    }

    pub fn client_events(&self) -> Sender<ClientEvent> {
        self.event_tx.clone()
    }

    pub fn main_thread(&self) -> Sender<MainThreadTask> {
        self.task_tx.clone()
    }

    pub fn worlds(&self) -> &Worlds {
        &self.worlds
    }

    pub fn worlds_mut(&mut self) -> &mut Worlds {
        &mut self.worlds
    }

    pub fn views(&self) -> &ViewSystem {
        &self.views
    }

    pub fn views_mut(&mut self) -> &mut ViewSystem {
        &mut self.views
    }

    pub fn tracker(&self) -> &RegionTracker {
        &self.tracker
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn startup(&mut self) -> Result<()> {
        for entry in self.catalog.list_regions() {
            if entry.flags.load_on_start || entry.flags.keep_in_memory {
                if let Err(e) = self.load_region(&entry.name) {
                    error!("Failed to load {} on startup: {}", entry.name, e);
                }
            }
        }

        let spawn = self.config.spawn_region.clone();
        self.load_region(&spawn)?;
        self.sync_tracker();
        info!("Started with regions {:?}", self.worlds.region_names());
        Ok(())
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down");
        let clients = self.connections.clients.keys().copied().collect::<Vec<_>>();
        for id in clients {
            self.disconnect(id);
        }
        for name in self.worlds.region_names() {
            if let Err(e) = self.unload(&name, true, true) {
                error!("Failed to unload {}: {}", name, e);
            }
        }
    }

    // Regions

    pub fn load_region(&mut self, name: &str) -> Result<()> {
        if self.worlds.has_region(name) {
            return Ok(());
        }

        let data = self.catalog.load_region(name)?;
        self.worlds.insert_region(Region::from_data(data));
        info!("Loaded region {}", name);
        Ok(())
    }

    /// Returns false when the region is pinned in memory.
    pub fn unload_region(&mut self, name: &str) -> Result<bool> {
        self.unload(name, false, true)
    }

    fn unload(&mut self, name: &str, force: bool, save: bool) -> Result<bool> {
        let entry = self
            .catalog
            .entry(name)
            .ok_or_else(|| Error::UnknownRegion(name.to_string()))?;
        if entry.flags.keep_in_memory && !force {
            warn!("Not unloading {}: it is kept in memory", name);
            return Ok(false);
        }

        for id in self.connections.in_region(name) {
            info!("Disconnecting {} from unloading region {}", id, name);
            self.disconnect(id);
        }

        let region = match self.worlds.remove_region(name) {
            Some(region) => region,
            None => return Ok(true),
        };
        info!("Unloaded region {}", name);

        let backup = entry.flags.backup_on_unload;
        if save && entry.flags.persistent {
            let catalog = self.catalog.clone();
            let region_name = name.to_string();
            self.catalog.save_region(
                region.to_data(),
                Box::new(move |ok, message| {
                    if !ok {
                        error!("Save on unload failed: {}", message);
                    } else if backup {
                        catalog.backup_region(&region_name, Box::new(log_result));
                    }
                }),
            );
        } else if backup {
            self.catalog.backup_region(name, Box::new(log_result));
        }
        Ok(true)
    }

    pub fn save_region(&mut self, name: &str, callback: StorageCallback) -> Result<()> {
        let data = self
            .worlds
            .snapshot(name)
            .ok_or_else(|| Error::UnknownRegion(name.to_string()))?;
        self.catalog.save_region(data, callback);
        Ok(())
    }

    pub fn copy_region(&mut self, source: &str, dest: &str, persistent: bool, callback: StorageCallback) {
        let callback = self.resync_tracker_after(callback);
        self.catalog.copy_region(source, dest, persistent, callback);
    }

    /// Unloads the region without saving, then deletes it from the catalog.
    pub fn remove_region(&mut self, name: &str, callback: StorageCallback) -> Result<()> {
        if self.worlds.has_region(name) {
            self.unload(name, true, false)?;
        }
        let callback = self.resync_tracker_after(callback);
        self.catalog.remove_region(name, callback);
        Ok(())
    }

    pub fn backup_region(&mut self, name: &str, callback: StorageCallback) {
        self.catalog.backup_region(name, callback);
    }

    fn resync_tracker_after(&self, callback: StorageCallback) -> StorageCallback {
        let tasks = self.task_tx.clone();
        Box::new(move |ok, message| {
            let task: MainThreadTask = Box::new(|server| server.sync_tracker());
            if tasks.send(task).is_err() {
                debug!("Main loop is gone, tracker not rebuilt");
            }
            callback(ok, message);
        })
    }

    pub fn set_region_flags(&mut self, name: &str, flags: RegionFlags) -> Result<()> {
        self.catalog.set_flags(name, flags)?;
        self.sync_tracker();
        Ok(())
    }

    pub fn sync_tracker(&mut self) {
        let entries = self.catalog.list_regions();
        let names = entries
            .iter()
            .filter(|e| e.flags.rollback)
            .map(|e| e.name.as_str());
        self.tracker.sync(names, &self.worlds);
    }

    pub fn update_save(&mut self, name: &str) -> Result<bool> {
        self.tracker.update_save(name, &self.worlds)
    }

    /// Rolls the region back and shows the restored voxels to everyone in it.
    pub fn reset_region(&mut self, name: &str) -> Result<Option<ResetReport>> {
        let report = self.tracker.reset(name, &mut self.worlds)?;
        self.process_world_events();
        Ok(report)
    }

    // Clients

    pub fn connect(&mut self, id: ClientId, username: &str, tx: mpsc::UnboundedSender<Packet>) -> Result<()> {
        let region = self.config.spawn_region.clone();
        let dimension = self
            .worlds
            .dimension(&region)
            .ok_or_else(|| Error::UnknownRegion(region.clone()))?;

        let session = Session::new(id, username, &region, self.config.view_dist);
        let entity_id = self
            .worlds
            .add_entity(&region, "player", session.position, true);
        let position = session.position;

        let _ = tx.send(Packet::S01JoinGame {
            entity_id: entity_id.unwrap_or_default(),
            game_mode: GAME_MODE,
            dimension,
            difficulty: DIFFICULTY,
            max_players: 20,
            level_type: LEVEL_TYPE.to_string(),
            reduced_debug_info: false,
        });
        self.connections.clients.insert(
            id,
            Connection {
                session,
                entity_id,
                tx,
            },
        );
        self.stream_chunks(id);
        self.connections.send_packet(id, teleport(position));

        info!("{} ({}) joined {}", username, id, region);
        Ok(())
    }

    pub fn disconnect(&mut self, id: ClientId) {
        self.views.disconnect(id);
        self.connections.reloads.remove(&id);
        if let Some(conn) = self.connections.clients.remove(&id) {
            if let Some(entity_id) = conn.entity_id {
                self.worlds.remove_entity(&conn.session.region, entity_id);
            }
            info!("{} left", conn.session.username);
        }
    }

    pub fn move_client(&mut self, id: ClientId, position: Vec3d) {
        let conn = match self.connections.clients.get_mut(&id) {
            Some(conn) => conn,
            None => return,
        };

        let before = conn.session.chunk_pos();
        conn.session.position = position;
        if let Some(entity_id) = conn.entity_id {
            self.worlds
                .move_entity(&conn.session.region, entity_id, position);
        }
        if conn.session.chunk_pos() != before {
            self.stream_chunks(id);
        }
    }

    /// Changes a block the way gameplay would. Clients are told on the next tick.
    pub fn set_block(&mut self, region: &str, pos: BlockPos, block_state: u16) -> bool {
        if !(0..256).contains(&pos.y) {
            return false;
        }
        // Rollback captures a chunk on its load event, which has to see the
        // chunk before the change.
        let chunk_pos = pos.chunk_pos();
        if !self.worlds.is_chunk_loaded(region, chunk_pos) {
            if !self.worlds.load_chunk(region, chunk_pos) {
                self.worlds
                    .put_chunk(region, Chunk::new(chunk_pos.x, chunk_pos.z));
            }
            self.process_world_events();
        }
        self.worlds
            .set_block(region, pos, block_state, ChangeCause::Gameplay)
    }

    /// Re-sends the client's surroundings after its view mapping changed.
    pub fn resync(&mut self, id: ClientId) -> Result<()> {
        let (region, center, view_dist, known) = match self.connections.session(id) {
            Some(s) => (s.region.clone(), s.chunk_pos(), s.view_dist, s.known_chunks.clone()),
            None => return Err(Error::UnknownClient(id.to_string())),
        };
        let view = ClientView {
            region: &region,
            center,
            view_dist,
            known: &known,
        };
        self.views
            .resync(id, &view, &mut self.worlds, &mut self.connections);
        Ok(())
    }

    /// Sends chunks that entered the client's view and unloads those that left it.
    fn stream_chunks(&mut self, id: ClientId) {
        let conn = match self.connections.clients.get_mut(&id) {
            Some(conn) => conn,
            None => return,
        };
        let center = conn.session.chunk_pos();
        let r = conn.session.view_dist;
        let region = conn.session.region.clone();
        let skylight = self
            .worlds
            .dimension(&region)
            .map_or(true, |d| d.has_skylight());

        let leaving = conn
            .session
            .known_chunks
            .iter()
            .filter(|pos| !pos.within(center, r))
            .copied()
            .collect::<Vec<ChunkPos>>();
        for pos in leaving {
            conn.session.known_chunks.remove(&pos);
            if let Some(packet) =
                self.views
                    .intercept(id, &region, Packet::unload_chunk(pos.x, pos.z), &mut self.worlds)
            {
                let _ = conn.tx.send(packet);
            }
        }

        for x in center.x - r..=center.x + r {
            for z in center.z - r..=center.z + r {
                let pos = ChunkPos::new(x, z);
                if conn.session.known_chunks.contains(&pos) || !self.worlds.load_chunk(&region, pos) {
                    continue;
                }
                let chunk = match self.worlds.chunk(&region, pos) {
                    Some(chunk) => chunk.clone(),
                    None => continue,
                };

                conn.session.known_chunks.insert(pos);
                let packet = Packet::chunk_data(chunk, skylight);
                if let Some(packet) = self.views.intercept(id, &region, packet, &mut self.worlds) {
                    let _ = conn.tx.send(packet);
                }
            }
        }
    }

    fn full_reload(&mut self, id: ClientId) {
        self.respawn_and_restream(id);
        self.views.finish_reload(id);
    }

    fn respawn_and_restream(&mut self, id: ClientId) {
        let (region, position) = match self.connections.clients.get_mut(&id) {
            Some(conn) => {
                conn.session.known_chunks.clear();
                (conn.session.region.clone(), conn.session.position)
            }
            None => return,
        };
        let dimension = match self.worlds.dimension(&region) {
            Some(dimension) => dimension,
            None => return,
        };

        debug!("Reloading view of {}", id);
        self.views.forget_view(id);
        for dimension in [dimension.other(), dimension] {
            self.connections.send_packet(
                id,
                Packet::S07Respawn {
                    dimension,
                    difficulty: DIFFICULTY,
                    game_mode: GAME_MODE,
                    level_type: LEVEL_TYPE.to_string(),
                },
            );
        }
        self.stream_chunks(id);
        self.connections.send_packet(id, teleport(position));
    }

    // Tick

    pub fn tick(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_client_event(event);
        }

        while let Ok(task) = self.task_rx.try_recv() {
            task(self);
        }

        self.worlds.advance_time(1);
        self.process_world_events();

        for id in mem::take(&mut self.connections.reloads) {
            self.full_reload(id);
        }

        self.views.tick(&mut self.connections);
        while let Ok(event) = self.render_events.try_recv() {
            trace!("{:?}", event);
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Joined { id, username, tx } => {
                if let Err(e) = self.connect(id, &username, tx) {
                    error!("Could not place {} in the world: {}", username, e);
                }
            }
            ClientEvent::Moved { id, position } => self.move_client(id, position),
            ClientEvent::Left { id } => self.disconnect(id),
        }
    }

    fn process_world_events(&mut self) {
        for event in self.worlds.drain_events() {
            self.tracker.handle_event(&event, &self.worlds);

            if let WorldEvent::BlockChanged {
                region,
                pos,
                block_state,
                ..
            } = event
            {
                self.broadcast_block(&region, pos, block_state);
            }
        }
    }

    fn broadcast_block(&mut self, region: &str, pos: BlockPos, block_state: u16) {
        let chunk_pos = pos.chunk_pos();
        for conn in self.connections.clients.values() {
            if conn.session.region != region || !conn.session.known_chunks.contains(&chunk_pos) {
                continue;
            }
            let packet = Packet::S23BlockChange {
                location: pos,
                block_state,
            };
            if let Some(packet) = self
                .views
                .intercept(conn.session.id, region, packet, &mut self.worlds)
            {
                let _ = conn.tx.send(packet);
            }
        }
    }
}

fn teleport(position: Vec3d) -> Packet {
    Packet::S08SetPlayerPosition {
        x: position.x,
        y: position.y,
        z: position.z,
        yaw: 0.0,
        pitch: 0.0,
        flags: 0,
    }
}

fn log_result(ok: bool, message: String) {
    if ok {
        debug!("{}", message);
    } else {
        error!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        block_state,
        catalog::MemoryCatalog,
        world::{ChunkKey, Dimension, RegionData},
    };

    const STONE: u16 = block_state!(1, 0);
    const GLASS: u16 = block_state!(20, 0);

    fn server() -> ServerHandler {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.start(1);
        let pinned = RegionFlags {
            load_on_start: true,
            keep_in_memory: true,
            ..Default::default()
        };
        catalog
            .create_region(RegionData::flat("alpha", Dimension::Overworld, 2, STONE), pinned)
            .unwrap();
        catalog
            .create_region(RegionData::flat("beta", Dimension::Overworld, 2, GLASS), pinned)
            .unwrap();
        catalog
            .create_region(
                RegionData::flat("arena", Dimension::Overworld, 1, STONE),
                RegionFlags {
                    rollback: true,
                    persistent: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let config = ServerConfig {
            spawn_region: "alpha".to_string(),
            view_dist: 2,
            ..Default::default()
        };
        let mut server = ServerHandler::new(Arc::new(config), catalog);
        server.startup().unwrap();
        server
    }

    fn join(server: &mut ServerHandler) -> (ClientId, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::random();
        server
            .client_events()
            .send(ClientEvent::Joined {
                id,
                username: "alice".to_string(),
                tx,
            })
            .unwrap();
        server.tick();
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            out.push(packet);
        }
        out
    }

    #[test]
    fn join_streams_the_view() {
        let mut server = server();
        let (id, mut rx) = join(&mut server);
        let packets = drain(&mut rx);

        assert!(matches!(packets[0], Packet::S01JoinGame { .. }));
        assert!(matches!(packets.last(), Some(Packet::S08SetPlayerPosition { .. })));
        let chunks = packets
            .iter()
            .filter(|p| matches!(p, Packet::S21ChunkData { .. }))
            .count();
        assert_eq!(chunks, 25);
        assert_eq!(server.views().cache().len(id), 25);
    }

    #[test]
    fn region_override_resyncs_in_paced_batches() {
        let mut server = server();
        let (id, mut rx) = join(&mut server);
        drain(&mut rx);

        server.views_mut().set_region_override(id, "alpha", "beta");
        server.resync(id).unwrap();
        let mut batches = Vec::new();
        while server.views().is_resyncing(id) {
            server.tick();
            batches.push(drain(&mut rx).len());
        }

        assert!(batches.iter().all(|&n| n <= 8));
        // 25 chunks with four changed sections each.
        assert_eq!(batches.iter().sum::<usize>(), 100);
        assert_eq!(server.views().cache().get(id, ChunkKey::new(0, 0)), Some("beta"));
    }

    #[test]
    fn full_reload_respawns_and_restreams() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog
            .create_region(
                RegionData::flat("alpha", Dimension::Overworld, 1, STONE),
                RegionFlags {
                    load_on_start: true,
                    ..Default::default()
                },
            )
            .unwrap();
        catalog
            .create_region(
                RegionData::flat("beta", Dimension::Overworld, 1, GLASS),
                RegionFlags {
                    load_on_start: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let config = ServerConfig {
            spawn_region: "alpha".to_string(),
            view_dist: 1,
            realtime_world_loading: false,
            ..Default::default()
        };
        let mut server = ServerHandler::new(Arc::new(config), catalog);
        server.startup().unwrap();
        let (id, mut rx) = join(&mut server);
        drain(&mut rx);

        let events = server.views_mut().subscribe();
        server.views_mut().set_region_override(id, "alpha", "beta");
        server.resync(id).unwrap();
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![RenderEvent::Started(id)]
        );
        assert!(drain(&mut rx).is_empty());

        server.tick();
        assert_eq!(events.try_recv(), Ok(RenderEvent::Finished(id)));

        let packets = drain(&mut rx);
        assert!(matches!(
            packets[0],
            Packet::S07Respawn {
                dimension: Dimension::Nether,
                ..
            }
        ));
        assert!(matches!(
            packets[1],
            Packet::S07Respawn {
                dimension: Dimension::Overworld,
                ..
            }
        ));
        let glass_chunks = packets
            .iter()
            .filter(|p| match p {
                Packet::S21ChunkData {
                    chunk: Some(chunk), ..
                } => chunk.get_block(0, 0, 0) == GLASS,
                _ => false,
            })
            .count();
        assert_eq!(glass_chunks, 9);
    }

    #[test]
    fn resync_after_moving_only_resends_chunks_the_client_holds() {
        let catalog = Arc::new(MemoryCatalog::new());
        let pinned = RegionFlags {
            load_on_start: true,
            keep_in_memory: true,
            ..Default::default()
        };
        for (name, state) in [("alpha", STONE), ("beta", GLASS)] {
            catalog
                .create_region(RegionData::flat(name, Dimension::Overworld, 4, state), pinned)
                .unwrap();
        }
        let config = ServerConfig {
            spawn_region: "alpha".to_string(),
            view_dist: 2,
            ..Default::default()
        };
        let mut server = ServerHandler::new(Arc::new(config), catalog);
        server.startup().unwrap();
        let (id, mut rx) = join(&mut server);
        server
            .client_events()
            .send(ClientEvent::Moved {
                id,
                position: Vec3d::new(16.5, 64.0, 0.5),
            })
            .unwrap();
        server.tick();
        drain(&mut rx);

        // Chunks at x = -2 are still loaded but were unloaded from the client.
        let known = server.connections().session(id).unwrap().known_chunks.clone();
        assert_eq!(known.len(), 25);
        assert!(server.worlds().is_chunk_loaded("alpha", ChunkPos::new(-2, 0)));

        server.views_mut().set_region_override(id, "alpha", "beta");
        server.resync(id).unwrap();
        let mut packets = Vec::new();
        while server.views().is_resyncing(id) {
            server.tick();
            packets.extend(drain(&mut rx));
        }

        for packet in &packets {
            if let Packet::S21ChunkData {
                x, z, chunk: Some(_), ..
            } = packet
            {
                assert!(known.contains(&ChunkPos::new(*x, *z)), "sent ({}, {})", x, z);
            }
        }
        assert_eq!(server.views().cache().len(id), known.len());
        assert_eq!(server.views().cache().get(id, ChunkKey::new(-2, 0)), None);
    }

    #[test]
    fn gameplay_changes_reach_clients_through_their_mapping() {
        let mut server = server();
        let (plain, mut plain_rx) = join(&mut server);
        let (mapped, mut mapped_rx) = join(&mut server);
        drain(&mut plain_rx);
        drain(&mut mapped_rx);
        server.views_mut().set_region_override(mapped, "alpha", "beta");

        let pos = BlockPos::new(3, 10, 3);
        assert!(server.set_block("alpha", pos, block_state!(41, 0)));
        server.tick();

        assert_eq!(
            drain(&mut plain_rx),
            vec![Packet::S23BlockChange {
                location: pos,
                block_state: block_state!(41, 0)
            }]
        );
        assert_eq!(
            drain(&mut mapped_rx),
            vec![Packet::S23BlockChange {
                location: pos,
                block_state: GLASS
            }]
        );
        assert!(server.connections().session(plain).is_some());
    }

    #[test]
    fn moving_streams_new_chunks_and_unloads_old_ones() {
        let mut server = server();
        let (id, mut rx) = join(&mut server);
        drain(&mut rx);

        server
            .client_events()
            .send(ClientEvent::Moved {
                id,
                position: Vec3d::new(16.5, 64.0, 0.5),
            })
            .unwrap();
        server.tick();

        let packets = drain(&mut rx);
        let unloads = packets
            .iter()
            .filter(|p| matches!(p, Packet::S21ChunkData { chunk: None, .. }))
            .count();
        assert_eq!(unloads, 5);
        assert_eq!(server.views().cache().len(id), 20);
        assert_eq!(
            server.connections().session(id).unwrap().chunk_pos(),
            ChunkPos::new(1, 0)
        );
    }

    #[test]
    fn rollback_through_the_server() {
        let mut server = server();
        server.load_region("arena").unwrap();
        server.tick();
        assert!(server.tracker().is_tracked("arena"));

        let pos = BlockPos::new(0, 63, 0);
        server.set_block("arena", pos, 0);
        server.tick();
        let report = server.reset_region("arena").unwrap().unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(server.worlds().block_at("arena", pos), Some(STONE));

        assert!(server.update_save("arena").unwrap());
        assert_eq!(
            server.reset_region("arena").unwrap().unwrap().restored,
            0
        );
    }

    #[test]
    fn rollback_undoes_blocks_placed_in_new_chunks() {
        let mut server = server();
        server.load_region("arena").unwrap();
        server.tick();

        // Far outside the arena's stored chunks.
        let pos = BlockPos::new(100, 10, 100);
        assert!(server.set_block("arena", pos, block_state!(41, 0)));
        server.tick();

        let report = server.reset_region("arena").unwrap().unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(server.worlds().block_at("arena", pos), Some(0));
    }

    #[test]
    fn copying_a_region_is_picked_up_on_the_main_loop() {
        let mut server = server();
        let (tx, rx) = flume::bounded(1);
        server.copy_region(
            "arena",
            "arena-2",
            false,
            Box::new(move |ok, _| {
                tx.send(ok).unwrap();
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        server.tick();
        // Copies do not inherit the rollback flag.
        assert!(!server.tracker().is_tracked("arena-2"));
        server.load_region("arena-2").unwrap();
        assert!(server.worlds().has_region("arena-2"));
    }

    #[test]
    fn flag_changes_rebuild_the_tracker() {
        let mut server = server();
        assert!(!server.tracker().is_tracked("beta"));

        let flags = RegionFlags {
            rollback: true,
            keep_in_memory: true,
            ..Default::default()
        };
        server.set_region_flags("beta", flags).unwrap();
        assert!(server.tracker().is_tracked("beta"));
        assert!(server.set_region_flags("nowhere", flags).is_err());
    }

    #[test]
    fn pinned_regions_stay_loaded() {
        let mut server = server();
        assert!(!server.unload_region("alpha").unwrap());
        assert!(server.worlds().has_region("alpha"));

        server.load_region("arena").unwrap();
        assert!(server.unload_region("arena").unwrap());
        assert!(!server.worlds().has_region("arena"));
    }

    #[test]
    fn unloading_disconnects_clients_in_the_region() {
        let mut server = server();
        let (id, _rx) = join(&mut server);
        server.shutdown();
        assert!(server.connections().session(id).is_none());
        assert!(server.worlds().region_names().is_empty());
    }
}
