//! Interface to the host application that exposes accessories.
//!
//! The coordinator calls into the host; the host never reaches back into the
//! coordinator except through [`restore_cached_device`] at startup.
//!
//! [`restore_cached_device`]: crate::coordinator::DiscoveryCoordinator::restore_cached_device

use pir_client::MotionSink;
use pir_core::types::{AccessoryHandle, AccessoryInformation, DeviceId};
use std::sync::Arc;

/// Host application collaborator
pub trait AccessoryHost: Send + Sync {
    /// Creates and exposes a new accessory.
    ///
    /// Called exactly once per device identity for the process lifetime, and
    /// never for identities restored from the host's own cache.
    fn register_new_accessory(&self, handle: &AccessoryHandle);

    /// Returns the observable motion characteristic of the accessory.
    fn characteristic_sink(&self, id: DeviceId) -> Arc<dyn MotionSink>;

    /// Updates the descriptive information of the accessory.
    ///
    /// Called every time the device is (re)started by a discovery.
    fn configure_accessory(&self, _id: DeviceId, _info: &AccessoryInformation) {}

    /// Marks the accessory reachable or unreachable.
    fn update_reachability(&self, _id: DeviceId, _reachable: bool) {}
}
