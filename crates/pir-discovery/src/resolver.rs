//! Hostname to IPv4 address resolution.
//!
//! Device addresses can change between scans (DHCP lease renewal), so the
//! coordinator resolves the advertised hostname on every announcement. There
//! is no caching here.

use async_trait::async_trait;
use mdns_sd::{HostnameResolutionEvent, ServiceDaemon};
use pir_core::error::ResolutionError;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Resolves an advertised hostname to its current IPv4 address
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolves `hostname`, failing with a [`ResolutionError`] when no IPv4
    /// address is found within the resolver's timeout
    async fn resolve(&self, hostname: &str) -> Result<Ipv4Addr, ResolutionError>;
}

/// Resolver for `.local` names over multicast DNS, falling back to the system
/// resolver for everything else
pub struct MdnsResolver {
    daemon: Option<Arc<ServiceDaemon>>,
    timeout: Duration,
}

impl MdnsResolver {
    /// Creates a resolver sharing the given mDNS daemon
    pub fn new(daemon: Arc<ServiceDaemon>, timeout: Duration) -> Self {
        Self {
            daemon: Some(daemon),
            timeout,
        }
    }

    /// Creates a resolver that only uses the system resolver
    pub fn system(timeout: Duration) -> Self {
        Self {
            daemon: None,
            timeout,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn resolve_mdns(
        &self,
        daemon: &ServiceDaemon,
        hostname: &str,
    ) -> Result<Ipv4Addr, ResolutionError> {
        let fqdn = if hostname.ends_with('.') {
            hostname.to_string()
        } else {
            format!("{}.", hostname)
        };

        let receiver = daemon
            .resolve_hostname(&fqdn, Some(self.timeout_ms()))
            .map_err(|e| ResolutionError::unresolvable(hostname, e.to_string()))?;

        let lookup = async {
            let mut non_ipv4_only = false;
            loop {
                match receiver.recv_async().await {
                    Ok(HostnameResolutionEvent::AddressesFound(_, addresses)) => {
                        match first_ipv4(addresses.iter().copied()) {
                            Some(address) => return Ok(address),
                            None => non_ipv4_only = true,
                        }
                    }
                    Ok(HostnameResolutionEvent::SearchTimeout(_))
                    | Ok(HostnameResolutionEvent::SearchStopped(_)) => {
                        return Err(if non_ipv4_only {
                            ResolutionError::NoIpv4 {
                                host: hostname.to_string(),
                            }
                        } else {
                            ResolutionError::Timeout {
                                host: hostname.to_string(),
                                timeout_ms: self.timeout_ms(),
                            }
                        });
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(ResolutionError::unresolvable(hostname, e.to_string())),
                }
            }
        };

        // The daemon enforces its own timeout; this bounds a daemon that stops answering.
        timeout(self.timeout * 2, lookup)
            .await
            .map_err(|_| ResolutionError::Timeout {
                host: hostname.to_string(),
                timeout_ms: self.timeout_ms(),
            })?
    }

    async fn resolve_system(&self, hostname: &str) -> Result<Ipv4Addr, ResolutionError> {
        let host = hostname.trim_end_matches('.');
        let addresses = timeout(self.timeout, tokio::net::lookup_host((host, 0)))
            .await
            .map_err(|_| ResolutionError::Timeout {
                host: hostname.to_string(),
                timeout_ms: self.timeout_ms(),
            })?
            .map_err(|e| ResolutionError::unresolvable(hostname, e.to_string()))?;

        first_ipv4(addresses.map(|addr| addr.ip())).ok_or_else(|| ResolutionError::NoIpv4 {
            host: hostname.to_string(),
        })
    }
}

#[async_trait]
impl AddressResolver for MdnsResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, hostname: &str) -> Result<Ipv4Addr, ResolutionError> {
        if let Ok(address) = hostname.parse::<Ipv4Addr>() {
            return Ok(address);
        }

        let address = match &self.daemon {
            Some(daemon) if is_local_name(hostname) => self.resolve_mdns(daemon, hostname).await?,
            _ => self.resolve_system(hostname).await?,
        };

        debug!(address = %address, "Hostname resolved");
        Ok(address)
    }
}

/// Returns true for names in the `.local` multicast DNS domain
pub fn is_local_name(hostname: &str) -> bool {
    hostname
        .trim_end_matches('.')
        .to_ascii_lowercase()
        .ends_with(".local")
}

/// Picks the lowest IPv4 address, ignoring IPv6
fn first_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    addresses
        .into_iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .min()
}
