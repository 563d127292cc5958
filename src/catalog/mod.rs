mod memory;

pub use memory::MemoryCatalog;

use serde_derive::{Deserialize, Serialize};

use crate::{error::Result, world::RegionData};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegionFlags {
    /// Saved when unloaded; otherwise changes are discarded.
    pub persistent: bool,
    pub backup_on_unload: bool,
    pub load_on_start: bool,
    /// Never unloaded while the server runs.
    pub keep_in_memory: bool,
    pub rollback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEntry {
    pub name: String,
    pub flags: RegionFlags,
}

/// Fired exactly once with a success flag and a message for the operator.
/// May run on any thread.
pub type StorageCallback = Box<dyn FnOnce(bool, String) + Send>;

pub trait RegionCatalog: Send + Sync {
    fn list_regions(&self) -> Vec<RegionEntry>;

    fn entry(&self, name: &str) -> Option<RegionEntry>;

    fn set_flags(&self, name: &str, flags: RegionFlags) -> Result<()>;

    /// Reads the last saved state of a region. Runs on the caller's thread.
    fn load_region(&self, name: &str) -> Result<RegionData>;

    fn save_region(&self, data: RegionData, callback: StorageCallback);

    fn copy_region(&self, source: &str, dest: &str, persistent: bool, callback: StorageCallback);

    fn remove_region(&self, name: &str, callback: StorageCallback);

    fn backup_region(&self, name: &str, callback: StorageCallback);
}
