//! Host collaborator for the standalone bridge.
//!
//! Keeps the registered accessories in memory and, when a cache path is
//! configured, persists them as JSON so they can be restored on the next run
//! before discovery starts.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use pir_client::MotionSink;
use pir_core::types::{AccessoryHandle, AccessoryInformation, DeviceId};
use pir_discovery::AccessoryHost;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One accessory as exposed by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessoryEntry {
    handle: AccessoryHandle,
    #[serde(default)]
    information: Option<AccessoryInformation>,
    #[serde(skip)]
    reachable: bool,
    #[serde(skip)]
    motion_detected: bool,
}

impl AccessoryEntry {
    fn new(handle: AccessoryHandle) -> Self {
        Self {
            handle,
            information: None,
            reachable: false,
            motion_detected: false,
        }
    }
}

type Accessories = Arc<RwLock<HashMap<DeviceId, AccessoryEntry>>>;

/// Accessory host with an optional on-disk cache
pub struct CachedAccessoryHost {
    cache_path: Option<PathBuf>,
    accessories: Accessories,
}

impl CachedAccessoryHost {
    pub fn new(cache_path: Option<PathBuf>) -> Self {
        Self {
            cache_path,
            accessories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Loads the cached accessories, returning their handles for restore.
    ///
    /// A missing cache file is treated as an empty cache.
    pub fn load(&self) -> Result<Vec<AccessoryHandle>> {
        let Some(path) = &self.cache_path else {
            return Ok(Vec::new());
        };

        if !path.exists() {
            debug!(path = %path.display(), "No accessory cache yet");
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read accessory cache: {}", path.display()))?;
        let entries: Vec<AccessoryEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse accessory cache: {}", path.display()))?;

        let mut accessories = self.accessories.write();
        let handles = entries
            .into_iter()
            .map(|entry| {
                let handle = entry.handle.clone();
                accessories.insert(handle.id, entry);
                handle
            })
            .collect::<Vec<_>>();

        info!(count = handles.len(), path = %path.display(), "Loaded accessory cache");
        Ok(handles)
    }

    /// Handles of all registered accessories
    pub fn accessories(&self) -> Vec<AccessoryHandle> {
        self.accessories
            .read()
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn is_reachable(&self, id: DeviceId) -> bool {
        self.accessories
            .read()
            .get(&id)
            .map(|entry| entry.reachable)
            .unwrap_or(false)
    }

    /// Motion state last published to the accessory
    pub fn motion_detected(&self, id: DeviceId) -> Option<bool> {
        self.accessories.read().get(&id).map(|entry| entry.motion_detected)
    }

    pub fn information(&self, id: DeviceId) -> Option<AccessoryInformation> {
        self.accessories
            .read()
            .get(&id)
            .and_then(|entry| entry.information.clone())
    }

    fn persist(&self) {
        let Some(path) = &self.cache_path else {
            return;
        };

        let mut entries = self.accessories.read().values().cloned().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.handle.display_handle.cmp(&b.handle.display_handle));

        if let Err(e) = write_cache(path, &entries) {
            warn!(path = %path.display(), error = %e, "Failed to persist accessory cache");
        }
    }
}

fn write_cache(path: &Path, entries: &[AccessoryEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json)?;
    Ok(())
}

impl AccessoryHost for CachedAccessoryHost {
    fn register_new_accessory(&self, handle: &AccessoryHandle) {
        info!(accessory = %handle.display_handle, id = %handle.id, "Registering new accessory");
        self.accessories
            .write()
            .insert(handle.id, AccessoryEntry::new(handle.clone()));
        self.persist();
    }

    fn characteristic_sink(&self, id: DeviceId) -> Arc<dyn MotionSink> {
        Arc::new(MotionCharacteristic {
            id,
            accessories: Arc::clone(&self.accessories),
        })
    }

    fn configure_accessory(&self, id: DeviceId, info: &AccessoryInformation) {
        let changed = match self.accessories.write().get_mut(&id) {
            Some(entry) if entry.information.as_ref() != Some(info) => {
                entry.information = Some(info.clone());
                true
            }
            Some(_) => false,
            None => {
                warn!(id = %id, "Configure for unregistered accessory");
                false
            }
        };

        if changed {
            self.persist();
        }
    }

    fn update_reachability(&self, id: DeviceId, reachable: bool) {
        if let Some(entry) = self.accessories.write().get_mut(&id) {
            entry.reachable = reachable;
        }
    }
}

/// Motion characteristic of one accessory
struct MotionCharacteristic {
    id: DeviceId,
    accessories: Accessories,
}

impl MotionSink for MotionCharacteristic {
    fn update_motion_detected(&self, detected: bool) {
        let mut accessories = self.accessories.write();
        let Some(entry) = accessories.get_mut(&self.id) else {
            return;
        };
        entry.motion_detected = detected;

        if detected {
            info!(accessory = %entry.handle.display_handle, "Motion detected");
        } else {
            info!(accessory = %entry.handle.display_handle, "Motion cleared");
        }
    }
}
