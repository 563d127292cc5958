use std::{
    sync::Arc,
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use dashmap::{mapref::entry::Entry, DashMap};
use flume::{Receiver, Sender};
use log::{debug, error, info};

use super::{RegionCatalog, RegionEntry, RegionFlags, StorageCallback};
use crate::{
    error::{Error, Result},
    world::RegionData,
};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
struct Backup {
    taken_at: u64,
    data: RegionData,
}

/// Keeps saved regions in memory. Storage operations run on a small pool of
/// worker threads and report back through their callback.
pub struct MemoryCatalog {
    flags: Arc<DashMap<String, RegionFlags>>,
    saved: Arc<DashMap<String, RegionData>>,
    backups: Arc<DashMap<String, Vec<Backup>>>,
    job_tx: Sender<Job>,
    job_rx: Receiver<Job>,
}

impl MemoryCatalog {
    pub fn new() -> MemoryCatalog {
        let (job_tx, job_rx) = flume::unbounded();
        MemoryCatalog {
            flags: Arc::new(DashMap::new()),
            saved: Arc::new(DashMap::new()),
            backups: Arc::new(DashMap::new()),
            job_tx,
            job_rx,
        }
    }

    pub fn start(&self, num_threads: u32) {
        for i in 0..num_threads {
            let rx = self.job_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("storage-{}", i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                });
            if let Err(e) = spawned {
                error!("Failed to start storage worker: {}", e);
            }
        }
    }

    /// Registers a region with its initial content.
    pub fn create_region(&self, data: RegionData, flags: RegionFlags) -> Result<()> {
        match self.flags.entry(data.name.clone()) {
            Entry::Occupied(_) => Err(Error::RegionExists(data.name)),
            Entry::Vacant(slot) => {
                debug!("Created region {}", data.name);
                let _reserved = slot.insert(flags);
                self.saved.insert(data.name.clone(), data);
                Ok(())
            }
        }
    }

    /// Timestamps (seconds since the epoch) of the backups of a region, oldest first.
    pub fn backups(&self, name: &str) -> Vec<u64> {
        self.backups
            .get(name)
            .map(|b| b.iter().map(|b| b.taken_at).collect())
            .unwrap_or_default()
    }

    pub fn restore_backup(&self, name: &str, taken_at: u64) -> Result<()> {
        let data = self
            .backups
            .get(name)
            .and_then(|b| b.iter().find(|b| b.taken_at == taken_at).map(|b| b.data.clone()))
            .ok_or_else(|| Error::UnknownRegion(format!("{}@{}", name, taken_at)))?;
        self.saved.insert(name.to_string(), data);
        Ok(())
    }

    fn submit(&self, job: Job) {
        if let Err(flume::SendError(job)) = self.job_tx.send(job) {
            job();
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        MemoryCatalog::new()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn finish(callback: StorageCallback, result: std::result::Result<String, String>) {
    match result {
        Ok(message) => {
            info!("{}", message);
            callback(true, message);
        }
        Err(message) => {
            error!("{}", message);
            callback(false, message);
        }
    }
}

impl RegionCatalog for MemoryCatalog {
    fn list_regions(&self) -> Vec<RegionEntry> {
        let mut entries = self
            .flags
            .iter()
            .map(|e| RegionEntry {
                name: e.key().clone(),
                flags: *e.value(),
            })
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    fn entry(&self, name: &str) -> Option<RegionEntry> {
        self.flags.get(name).map(|flags| RegionEntry {
            name: name.to_string(),
            flags: *flags,
        })
    }

    fn set_flags(&self, name: &str, flags: RegionFlags) -> Result<()> {
        match self.flags.get_mut(name) {
            Some(mut entry) => {
                *entry = flags;
                Ok(())
            }
            None => Err(Error::UnknownRegion(name.to_string())),
        }
    }

    fn load_region(&self, name: &str) -> Result<RegionData> {
        self.saved
            .get(name)
            .map(|data| data.clone())
            .ok_or_else(|| Error::UnknownRegion(name.to_string()))
    }

    fn save_region(&self, data: RegionData, callback: StorageCallback) {
        let flags = self.flags.clone();
        let saved = self.saved.clone();
        self.submit(Box::new(move || {
            let result = if flags.contains_key(&data.name) {
                let message = format!("Saved region {}", data.name);
                saved.insert(data.name.clone(), data);
                Ok(message)
            } else {
                Err(format!("Cannot save {}: region is not known", data.name))
            };
            finish(callback, result);
        }));
    }

    fn copy_region(&self, source: &str, dest: &str, persistent: bool, callback: StorageCallback) {
        let flags = self.flags.clone();
        let saved = self.saved.clone();
        let source = source.to_string();
        let dest = dest.to_string();
        self.submit(Box::new(move || {
            let data = saved.get(&source).map(|data| data.clone());
            let result = match (data, flags.entry(dest.clone())) {
                (None, _) => Err(format!("Cannot copy {}: region is not known", source)),
                (Some(_), Entry::Occupied(_)) => {
                    Err(format!("Cannot copy {} to {}: region already exists", source, dest))
                }
                (Some(data), Entry::Vacant(slot)) => {
                    // The destination stays locked until its data is in place.
                    let _reserved = slot.insert(RegionFlags {
                        persistent,
                        ..Default::default()
                    });
                    saved.insert(dest.clone(), data.renamed(&dest));
                    Ok(format!("Copied region {} to {}", source, dest))
                }
            };
            finish(callback, result);
        }));
    }

    fn remove_region(&self, name: &str, callback: StorageCallback) {
        let flags = self.flags.clone();
        let saved = self.saved.clone();
        let name = name.to_string();
        self.submit(Box::new(move || {
            let result = match flags.remove(&name) {
                Some(_) => {
                    saved.remove(&name);
                    Ok(format!("Removed region {}", name))
                }
                None => Err(format!("Cannot remove {}: region is not known", name)),
            };
            finish(callback, result);
        }));
    }

    fn backup_region(&self, name: &str, callback: StorageCallback) {
        let saved = self.saved.clone();
        let backups = self.backups.clone();
        let name = name.to_string();
        self.submit(Box::new(move || {
            let result = match saved.get(&name).map(|data| data.clone()) {
                Some(data) => {
                    let taken_at = now_secs();
                    backups
                        .entry(name.clone())
                        .or_default()
                        .push(Backup { taken_at, data });
                    Ok(format!("Backed up region {} at {}", name, taken_at))
                }
                None => Err(format!("Cannot back up {}: region is not known", name)),
            };
            finish(callback, result);
        }));
    }
}
