//! Known device registry.

use crate::record::DeviceRecord;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pir_core::types::DeviceId;
use std::sync::Arc;

/// Map from device identity to its record.
///
/// Holds at most one record per identity and never removes entries: a device
/// seen once stays known for the process lifetime.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: DashMap<DeviceId, Arc<DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `id`, creating it with `create` if absent.
    ///
    /// The boolean is true when this call inserted the record. Concurrent
    /// callers for the same identity observe exactly one insertion.
    pub fn get_or_insert_with<F>(&self, id: DeviceId, create: F) -> (Arc<DeviceRecord>, bool)
    where
        F: FnOnce() -> DeviceRecord,
    {
        match self.records.entry(id) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let record = Arc::new(create());
                entry.insert(Arc::clone(&record));
                (record, true)
            }
        }
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<DeviceRecord>> {
        self.records.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<Arc<DeviceRecord>> {
        self.records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
