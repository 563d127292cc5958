use std::collections::HashMap;

use crate::{model::ClientId, world::ChunkKey};

/// Which region's content each client last received, per chunk column.
#[derive(Default)]
pub struct ClientViewCache {
    clients: HashMap<ClientId, HashMap<ChunkKey, String>>,
}

impl ClientViewCache {
    pub fn new() -> ClientViewCache {
        ClientViewCache::default()
    }

    /// `None` means the client holds no data we know of for this column.
    pub fn get(&self, client: ClientId, key: ChunkKey) -> Option<&str> {
        self.clients
            .get(&client)
            .and_then(|chunks| chunks.get(&key))
            .map(String::as_str)
    }

    pub fn record(&mut self, client: ClientId, key: ChunkKey, region: &str) {
        let chunks = self.clients.entry(client).or_default();
        match chunks.get_mut(&key) {
            Some(current) if current == region => {}
            Some(current) => *current = region.to_string(),
            None => {
                chunks.insert(key, region.to_string());
            }
        }
    }

    pub fn forget(&mut self, client: ClientId, key: ChunkKey) {
        if let Some(chunks) = self.clients.get_mut(&client) {
            chunks.remove(&key);
            if chunks.is_empty() {
                self.clients.remove(&client);
            }
        }
    }

    pub fn clear_client(&mut self, client: ClientId) {
        self.clients.remove(&client);
    }

    pub fn len(&self, client: ClientId) -> usize {
        self.clients.get(&client).map_or(0, HashMap::len)
    }
}
