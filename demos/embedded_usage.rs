//! Minimal embedding example for ipam-core
//!
//! This example demonstrates using ipam-core as a library in a custom application.
//! IPv4 comes from the built-in range allocator, IPv6 from an application-defined
//! backend that hands out a fixed list of addresses.

use async_trait::async_trait;
use ipam_core::traits::{AllocationResult, FamilyAllocator, Metadata};
use ipam_core::{Error, FamilyFilter, Ipam, RangeAllocator, Result, StaticBlacklist};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Custom IPv6 backend: a fixed list of addresses
struct ListAllocator {
    free: Vec<IpAddr>,
    allocated: Mutex<BTreeMap<IpAddr, String>>,
}

impl ListAllocator {
    fn new(addresses: &[&str]) -> Self {
        Self {
            free: addresses.iter().filter_map(|a| a.parse().ok()).collect(),
            allocated: Mutex::new(BTreeMap::new()),
        }
    }

    fn allocated(&self) -> std::sync::MutexGuard<'_, BTreeMap<IpAddr, String>> {
        self.allocated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl FamilyAllocator for ListAllocator {
    async fn allocate(&self, ip: IpAddr, metadata: &Metadata) -> Result<AllocationResult> {
        if !self.free.contains(&ip) {
            return Err(Error::invalid_input(format!("{} is not in the list", ip)));
        }

        let mut allocated = self.allocated();
        if allocated.contains_key(&ip) {
            return Err(Error::AlreadyAllocated(ip));
        }
        allocated.insert(ip, metadata.owner.clone());
        Ok(AllocationResult::new(ip))
    }

    async fn allocate_next(&self, metadata: &Metadata) -> Result<AllocationResult> {
        let mut allocated = self.allocated();
        let ip = self
            .free
            .iter()
            .copied()
            .find(|ip| !allocated.contains_key(ip))
            .ok_or_else(|| Error::PoolExhausted("list".to_string()))?;

        allocated.insert(ip, metadata.owner.clone());
        Ok(AllocationResult::new(ip))
    }

    async fn release(&self, ip: IpAddr) -> Result<()> {
        self.allocated()
            .remove(&ip)
            .map(|_| ())
            .ok_or(Error::NotAllocated(ip))
    }

    async fn dump(&self) -> (BTreeMap<IpAddr, String>, String) {
        let allocated = self.allocated().clone();
        let status = format!("{}/{} from list", allocated.len(), self.free.len());
        (allocated, status)
    }

    fn allocator_name(&self) -> &'static str {
        "list"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Embedded ipam-core Example ===\n");

    // The first IPv6 entry is reserved for the router
    let blacklist = StaticBlacklist::new();
    blacklist.exclude(IpAddr::V6(Ipv6Addr::new(0xfd00, 0x10, 0, 0, 0, 0, 0, 1)), "router");

    let ipam = Ipam::new(
        Some(Box::new(RangeAllocator::new(
            "10.10.0.0/28".parse().map_err(|_| Error::invalid_input("10.10.0.0/28"))?,
        ))),
        Some(Box::new(ListAllocator::new(&[
            "fd00:10::1",
            "fd00:10::2",
            "fd00:10::3",
        ]))),
        Arc::new(blacklist),
    )
    .with_default_expiration(Duration::from_secs(5));

    // Dual-stack allocation for a pod
    let pod = Metadata::new("default/web-0");
    let allocation = ipam.allocate_next(FamilyFilter::Any, &pod).await?;
    for ip in allocation.addresses() {
        info!(%ip, owner = %pod.owner, "Allocated");
    }

    // Leased allocation for an agent that has to confirm it
    let agent = Metadata::new("node-agent");
    let leased = ipam
        .allocate_next_with_default_expiration(FamilyFilter::IPv4, &agent)
        .await?;
    if let Some(result) = leased.ipv4
        && let Some(token) = result.expiration_token
    {
        println!("Leased {} (token {})", result.ip, token);
        ipam.stop_expiration_timer(result.ip, token).await?;
        println!("Lease confirmed, {} is kept", result.ip);
    }

    let dump = ipam.dump().await;
    println!("\nStatus: {}", dump.status);
    for (ip, owner) in dump.ipv4.iter().chain(dump.ipv6.iter()).flatten() {
        println!("  {:<16} {}", ip, owner);
    }

    // Tear down the pod by owner
    ipam.release_ip_str(&pod.owner).await?;
    println!("\nAfter release: {}", ipam.dump().await.status);

    Ok(())
}
