use std::collections::HashMap;

use crate::{model::ClientId, world::ChunkKey};

#[derive(Default, Debug)]
struct ViewMapping {
    regions: HashMap<String, String>,
    chunks: HashMap<ChunkKey, String>,
}

impl ViewMapping {
    fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.chunks.is_empty()
    }
}

#[derive(Default)]
pub struct ViewMappings {
    clients: HashMap<ClientId, ViewMapping>,
}

impl ViewMappings {
    pub fn new() -> ViewMappings {
        ViewMappings::default()
    }

    pub fn set_region_override(&mut self, client: ClientId, real: &str, substitute: &str) {
        self.clients
            .entry(client)
            .or_default()
            .regions
            .insert(real.to_string(), substitute.to_string());
    }

    pub fn set_chunk_override(&mut self, client: ClientId, key: ChunkKey, substitute: &str) {
        self.clients
            .entry(client)
            .or_default()
            .chunks
            .insert(key, substitute.to_string());
    }

    pub fn clear_client(&mut self, client: ClientId) -> bool {
        self.clients.remove(&client).is_some()
    }

    pub fn clear_region_override(&mut self, client: ClientId, real: &str) -> bool {
        self.clear_with(client, |mapping| mapping.regions.remove(real).is_some())
    }

    pub fn clear_chunk_override(&mut self, client: ClientId, key: ChunkKey) -> bool {
        self.clear_with(client, |mapping| mapping.chunks.remove(&key).is_some())
    }

    fn clear_with(&mut self, client: ClientId, f: impl FnOnce(&mut ViewMapping) -> bool) -> bool {
        let mapping = match self.clients.get_mut(&client) {
            Some(mapping) => mapping,
            None => return false,
        };
        let removed = f(mapping);
        if mapping.is_empty() {
            self.clients.remove(&client);
        }
        removed
    }

    pub fn has_overrides(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    /// The region whose content `client` should see at `key` while standing in `real`.
    pub fn resolve<'a>(&'a self, client: ClientId, real: &'a str, key: ChunkKey) -> &'a str {
        let mapping = match self.clients.get(&client) {
            Some(mapping) => mapping,
            None => return real,
        };

        if let Some(substitute) = mapping.chunks.get(&key) {
            return substitute;
        }
        match mapping.regions.get(real) {
            Some(substitute) => substitute,
            None => real,
        }
    }
}
