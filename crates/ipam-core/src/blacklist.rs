// # Static Blacklist
//
// In-memory implementation of the Blacklist trait.
//
// The set is shared: clones observe the same entries, so a policy source
// can keep a handle and update it while the coordinator reads it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::traits::Blacklist;

/// Externally mutable set of excluded addresses
///
/// Each entry carries the name of whoever excluded it (a router, a
/// health-check endpoint, an operator), which is only used for display.
///
/// # Example
///
/// ```rust
/// use ipam_core::blacklist::StaticBlacklist;
/// use ipam_core::traits::Blacklist;
///
/// let blacklist = StaticBlacklist::new();
/// blacklist.exclude("10.0.0.1".parse().unwrap(), "router");
///
/// assert!(blacklist.contains(&"10.0.0.1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticBlacklist {
    inner: Arc<RwLock<HashMap<IpAddr, String>>>,
}

impl StaticBlacklist {
    /// Create an empty blacklist
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a blacklist from a list of addresses
    pub fn from_addresses(ips: impl IntoIterator<Item = IpAddr>, owner: &str) -> Self {
        let blacklist = Self::new();
        for ip in ips {
            blacklist.exclude(ip, owner);
        }
        blacklist
    }

    /// Exclude an address from allocation
    pub fn exclude(&self, ip: IpAddr, owner: impl Into<String>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(ip.to_canonical(), owner.into());
    }

    /// Allow an address again
    ///
    /// Returns `true` if the address was excluded
    pub fn remove(&self, ip: &IpAddr) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(&ip.to_canonical()).is_some()
    }

    /// Who excluded the address, if anyone
    pub fn owner(&self, ip: &IpAddr) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(&ip.to_canonical()).cloned()
    }

    /// Number of excluded addresses
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no address is excluded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Blacklist for StaticBlacklist {
    fn contains(&self, ip: &IpAddr) -> bool {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.contains_key(&ip.to_canonical())
    }
}
