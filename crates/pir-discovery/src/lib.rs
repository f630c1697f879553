//! mDNS discovery and device lifecycle for PIR sensors
//!
//! This crate reconciles an unreliable, repeating discovery feed against a set
//! of long-lived per-device connections:
//! - Browse for sensors advertising the fixed DNS-SD service type
//! - Deduplicate devices by a stable identity derived from their hardware address
//! - Resolve the advertised hostname on every sighting (addresses change)
//! - Create one persistent connection per device, redirect it when the device moves
//! - Re-scan shortly after start and then periodically for the process lifetime
//!
//! # Architecture
//!
//! The [`DiscoveryCoordinator`] consumes a [`DiscoveryFeed`] on a dispatcher task
//! that fans announcements out to one worker per device identity. Each worker
//! calls [`DiscoveryCoordinator::on_device_found`] in arrival order, so updates
//! for one device are never reordered while different devices proceed
//! concurrently. The host application is reached only through the
//! [`AccessoryHost`] trait.
//!
//! # Example
//!
//! ```no_run
//! use pir_discovery::{CoordinatorSettings, DiscoveryCoordinator, MdnsFeed, MdnsResolver};
//! # use pir_discovery::AccessoryHost;
//! # use std::sync::Arc;
//! # async fn run(host: Arc<dyn AccessoryHost>) -> pir_discovery::Result<()> {
//! let settings = CoordinatorSettings::default();
//! let daemon = MdnsFeed::create_daemon()?;
//! let timeout = settings.discovery.resolve_timeout();
//! let resolver = Arc::new(MdnsResolver::new(daemon.clone(), timeout));
//! let feed = Arc::new(MdnsFeed::new(daemon, settings.discovery.service_type_fqdn()));
//!
//! let coordinator = DiscoveryCoordinator::new(settings, resolver, host)?;
//! coordinator.start(feed).await?;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod feed;
pub mod host;
pub mod record;
pub mod registry;
pub mod resolver;

pub use coordinator::{CoordinatorSettings, DiscoveryCoordinator, DiscoveryOutcome};
pub use error::{DiscoveryError, Result};
pub use feed::{DiscoveryFeed, MdnsFeed, ServiceAnnouncement};
pub use host::AccessoryHost;
pub use record::{DeviceRecord, DeviceSummary, RecordUpdate};
pub use registry::DeviceRegistry;
pub use resolver::{AddressResolver, MdnsResolver};
