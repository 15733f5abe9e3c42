//! Test doubles and common utilities for coordinator contract tests
//!
//! This module provides a scriptable family allocator: the test decides
//! which addresses `allocate_next` hands out and which releases fail, and
//! can inspect the backend's view of allocated addresses afterwards.

#![allow(dead_code)]

use async_trait::async_trait;
use ipam_core::error::{Error, Result};
use ipam_core::traits::{AllocationResult, FamilyAllocator, Metadata};
use ipam_core::{Ipam, StaticBlacklist};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A FamilyAllocator whose behavior is scripted by the test
pub struct ScriptedAllocator {
    /// Addresses `allocate_next` returns, in order
    next: Arc<Mutex<VecDeque<IpAddr>>>,
    /// Backend view of allocated addresses
    allocated: Arc<Mutex<BTreeMap<IpAddr, String>>>,
    /// Addresses whose release fails
    failing_releases: Arc<Mutex<HashSet<IpAddr>>>,
    /// Call counter for allocate_next() (both variants)
    allocate_next_calls: Arc<AtomicUsize>,
    /// Call counter for release()
    release_calls: Arc<AtomicUsize>,
    /// Call counter for the without-sync-upstream variants
    unsynced_calls: Arc<AtomicUsize>,
}

impl ScriptedAllocator {
    /// Create an allocator that hands out `next` in order, then reports exhaustion
    pub fn new(next: &[&str]) -> Self {
        Self {
            next: Arc::new(Mutex::new(next.iter().map(|s| ip(s)).collect())),
            allocated: Arc::new(Mutex::new(BTreeMap::new())),
            failing_releases: Arc::new(Mutex::new(HashSet::new())),
            allocate_next_calls: Arc::new(AtomicUsize::new(0)),
            release_calls: Arc::new(AtomicUsize::new(0)),
            unsynced_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an allocator that shares all state with an existing one
    pub fn sharing_state_with(other: &Self) -> Self {
        Self {
            next: Arc::clone(&other.next),
            allocated: Arc::clone(&other.allocated),
            failing_releases: Arc::clone(&other.failing_releases),
            allocate_next_calls: Arc::clone(&other.allocate_next_calls),
            release_calls: Arc::clone(&other.release_calls),
            unsynced_calls: Arc::clone(&other.unsynced_calls),
        }
    }

    /// Make every release of `addr` fail
    pub fn fail_release_of(&self, addr: &str) {
        self.failing_releases.lock().unwrap().insert(ip(addr));
    }

    /// Mark an address allocated behind the coordinator's back
    pub fn preallocate(&self, addr: &str, owner: &str) {
        self.allocated
            .lock()
            .unwrap()
            .insert(ip(addr), owner.to_string());
    }

    /// Whether the backend considers `addr` allocated
    pub fn is_allocated(&self, addr: &str) -> bool {
        self.allocated.lock().unwrap().contains_key(&ip(addr))
    }

    /// Number of addresses the backend considers allocated
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().unwrap().len()
    }

    /// Get the number of times allocate_next() was called
    pub fn allocate_next_calls(&self) -> usize {
        self.allocate_next_calls.load(Ordering::SeqCst)
    }

    /// Get the number of times release() was called
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Get the number of calls that skipped upstream sync
    pub fn unsynced_calls(&self) -> usize {
        self.unsynced_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FamilyAllocator for ScriptedAllocator {
    async fn allocate(&self, addr: IpAddr, metadata: &Metadata) -> Result<AllocationResult> {
        let mut allocated = self.allocated.lock().unwrap();
        if allocated.contains_key(&addr) {
            return Err(Error::AlreadyAllocated(addr));
        }
        allocated.insert(addr, metadata.owner.clone());
        Ok(AllocationResult::new(addr))
    }

    async fn allocate_without_sync_upstream(
        &self,
        addr: IpAddr,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        self.unsynced_calls.fetch_add(1, Ordering::SeqCst);
        self.allocate(addr, metadata).await
    }

    async fn allocate_next(&self, metadata: &Metadata) -> Result<AllocationResult> {
        self.allocate_next_calls.fetch_add(1, Ordering::SeqCst);

        let addr = self
            .next
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::PoolExhausted("scripted".to_string()))?;
        self.allocated
            .lock()
            .unwrap()
            .insert(addr, metadata.owner.clone());

        Ok(AllocationResult::new(addr))
    }

    async fn allocate_next_without_sync_upstream(
        &self,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        self.unsynced_calls.fetch_add(1, Ordering::SeqCst);
        self.allocate_next(metadata).await
    }

    async fn release(&self, addr: IpAddr) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_releases.lock().unwrap().contains(&addr) {
            return Err(Error::allocator("scripted", format!("release of {} refused", addr)));
        }
        if self.allocated.lock().unwrap().remove(&addr).is_none() {
            return Err(Error::NotAllocated(addr));
        }
        Ok(())
    }

    async fn dump(&self) -> (BTreeMap<IpAddr, String>, String) {
        let allocated = self.allocated.lock().unwrap().clone();
        let status = format!("{} allocated", allocated.len());
        (allocated, status)
    }

    fn allocator_name(&self) -> &'static str {
        "scripted"
    }
}

/// Parse an address literal
pub fn ip(addr: &str) -> IpAddr {
    addr.parse().expect("valid address literal")
}

/// Metadata for an owner
pub fn md(owner: &str) -> Metadata {
    Metadata::new(owner)
}

/// Build a coordinator over scripted backends, keeping handles to them
pub fn scripted_ipam(
    ipv4: Option<&ScriptedAllocator>,
    ipv6: Option<&ScriptedAllocator>,
    blacklist: StaticBlacklist,
) -> Ipam {
    let boxed = |allocator: &ScriptedAllocator| -> Box<dyn FamilyAllocator> {
        Box::new(ScriptedAllocator::sharing_state_with(allocator))
    };

    Ipam::new(ipv4.map(boxed), ipv6.map(boxed), Arc::new(blacklist))
}

/// Owner the coordinator reports for `addr`, via dump
pub async fn dumped_owner(ipam: &Ipam, addr: &str) -> Option<String> {
    let dump = ipam.dump().await;
    let addr = ip(addr);
    dump.ipv4
        .iter()
        .chain(dump.ipv6.iter())
        .find_map(|allocated| allocated.get(&addr).cloned())
}
