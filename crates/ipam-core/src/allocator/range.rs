// # Range Allocator
//
// In-memory implementation of FamilyAllocator over a single CIDR.
//
// ## Behavior
//
// - Next-address allocation hands out the lowest free host address
// - IPv4 ranges shorter than /31 never hand out the network or broadcast address
// - Nothing is synced anywhere, so the no-sync variants behave identically
//
// ## Crash Behavior
//
// All state is lost on restart. Callers that need durable pools should plug
// in their own backend through the registry.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::traits::{AllocationResult, Family, FamilyAllocator, FamilyAllocatorFactory, Metadata};

/// Allocator over the host addresses of one CIDR
///
/// # Example
///
/// ```rust,no_run
/// use ipam_core::allocator::RangeAllocator;
/// use ipam_core::traits::{FamilyAllocator, Metadata};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let allocator = RangeAllocator::new("10.0.0.0/24".parse()?);
///
///     let result = allocator.allocate_next(&Metadata::new("pod-a")).await?;
///     assert_eq!(result.ip, "10.0.0.1".parse::<std::net::IpAddr>()?);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RangeAllocator {
    cidr: IpNet,
    family: Family,
    /// First allocatable address, as an integer
    first: u128,
    /// Last allocatable address, as an integer
    last: u128,
    allocated: Mutex<BTreeMap<IpAddr, String>>,
}

impl RangeAllocator {
    /// Create an allocator over `cidr`
    pub fn new(cidr: IpNet) -> Self {
        let cidr = cidr.trunc();
        let family = Family::of(&cidr.network());
        let mut first = addr_to_u128(cidr.network());
        let mut last = addr_to_u128(cidr.broadcast());

        if family == Family::IPv4 && cidr.prefix_len() < 31 {
            first += 1;
            last -= 1;
        }

        Self {
            cidr,
            family,
            first,
            last,
            allocated: Mutex::new(BTreeMap::new()),
        }
    }

    /// The range this allocator serves
    pub fn cidr(&self) -> IpNet {
        self.cidr
    }

    /// The family this allocator serves
    pub fn family(&self) -> Family {
        self.family
    }

    /// Number of allocatable addresses
    pub fn capacity(&self) -> u128 {
        (self.last - self.first).saturating_add(1)
    }

    /// Number of currently allocated addresses
    pub async fn allocated_count(&self) -> usize {
        self.allocated.lock().await.len()
    }

    /// Whether `ip` is currently allocated
    pub async fn is_allocated(&self, ip: IpAddr) -> bool {
        self.allocated.lock().await.contains_key(&ip.to_canonical())
    }

    fn check_in_range(&self, ip: IpAddr) -> Result<()> {
        let in_range = Family::of(&ip) == self.family && {
            let n = addr_to_u128(ip);
            self.first <= n && n <= self.last
        };

        if in_range {
            Ok(())
        } else {
            Err(Error::AddressNotInRange {
                ip,
                range: self.cidr.to_string(),
            })
        }
    }

    fn result_for(&self, ip: IpAddr) -> AllocationResult {
        AllocationResult::new(ip).with_cidr(self.cidr)
    }
}

#[async_trait]
impl FamilyAllocator for RangeAllocator {
    async fn allocate(&self, ip: IpAddr, metadata: &Metadata) -> Result<AllocationResult> {
        let ip = ip.to_canonical();
        self.check_in_range(ip)?;

        let mut allocated = self.allocated.lock().await;
        if allocated.contains_key(&ip) {
            return Err(Error::AlreadyAllocated(ip));
        }
        allocated.insert(ip, metadata.owner.clone());
        trace!(%ip, owner = %metadata.owner, "range allocator: allocated specific address");

        Ok(self.result_for(ip))
    }

    async fn allocate_next(&self, metadata: &Metadata) -> Result<AllocationResult> {
        let mut allocated = self.allocated.lock().await;

        // Keys are ordered, so the first gap in the walk is the lowest free address.
        let mut candidate = self.first;
        for taken in allocated.keys() {
            let n = addr_to_u128(*taken);
            if n < candidate {
                continue;
            }
            if n > candidate {
                break;
            }
            if candidate == self.last {
                return Err(Error::PoolExhausted(self.cidr.to_string()));
            }
            candidate += 1;
        }

        let ip = u128_to_addr(self.family, candidate);
        allocated.insert(ip, metadata.owner.clone());
        trace!(%ip, owner = %metadata.owner, "range allocator: allocated next address");

        Ok(self.result_for(ip))
    }

    async fn release(&self, ip: IpAddr) -> Result<()> {
        let ip = ip.to_canonical();
        self.check_in_range(ip)?;

        let mut allocated = self.allocated.lock().await;
        if allocated.remove(&ip).is_none() {
            return Err(Error::NotAllocated(ip));
        }

        Ok(())
    }

    async fn dump(&self) -> (BTreeMap<IpAddr, String>, String) {
        let allocated = self.allocated.lock().await;
        let status = format!(
            "{}/{} allocated from {}",
            allocated.len(),
            self.capacity(),
            self.cidr
        );

        (allocated.clone(), status)
    }

    fn allocator_name(&self) -> &'static str {
        "range"
    }
}

/// Configuration accepted by [`RangeAllocatorFactory`]
#[derive(Debug, Deserialize)]
struct RangeAllocatorConfig {
    cidr: IpNet,
}

/// Factory for [`RangeAllocator`], registered as `"range"`
#[derive(Debug, Default)]
pub struct RangeAllocatorFactory;

impl FamilyAllocatorFactory for RangeAllocatorFactory {
    fn create(&self, family: Family, config: &serde_json::Value) -> Result<Box<dyn FamilyAllocator>> {
        let config: RangeAllocatorConfig = serde_json::from_value(config.clone())?;
        let allocator = RangeAllocator::new(config.cidr);

        if allocator.family() != family {
            return Err(Error::config(format!(
                "range {} cannot serve the {} family",
                config.cidr, family
            )));
        }

        Ok(Box::new(allocator))
    }
}

fn addr_to_u128(ip: IpAddr) -> u128 {
    match ip.to_canonical() {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn u128_to_addr(family: Family, n: u128) -> IpAddr {
    match family {
        Family::IPv4 => IpAddr::V4(Ipv4Addr::from(n as u32)),
        Family::IPv6 => IpAddr::V6(Ipv6Addr::from(n)),
    }
}
