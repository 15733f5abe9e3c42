// # Family Allocator Trait
//
// Defines the per-address-family backend the coordinator dispatches into.
//
// ## Purpose
//
// A family allocator decides which concrete address is free and records
// that it is taken. It is the authority on "is this address allocated".
// The coordinator only layers ownership annotation, blacklist enforcement,
// leases and cross-family orchestration on top.
//
// ## Implementations
//
// - Range: `allocator::range::RangeAllocator` (in-memory CIDR pool)
// - Custom: anything registered in `AllocatorRegistry` (cluster pools,
//   cloud-provider ENI pools, ...)
//
// ## Usage
//
// ```rust,ignore
// use ipam_core::traits::{FamilyAllocator, Metadata};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let allocator = /* FamilyAllocator implementation */;
//
//     let result = allocator.allocate_next(&Metadata::new("pod-a")).await?;
//     allocator.release(result.ip).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::coordinator::ExpirationToken;

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// IPv4
    IPv4,
    /// IPv6
    IPv6,
}

impl Family {
    /// Derive the family of an address
    ///
    /// An address that is representable in four bytes (including an
    /// IPv4-mapped IPv6 address) is IPv4.
    pub fn of(ip: &IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(_) => Family::IPv4,
            IpAddr::V6(_) => Family::IPv6,
        }
    }

    /// Lowercase tag used for metric labels and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::IPv4 => "ipv4",
            Family::IPv6 => "ipv6",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::IPv4 => f.write_str("IPv4"),
            Family::IPv6 => f.write_str("IPv6"),
        }
    }
}

impl FromStr for Family {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(Family::IPv4),
            "ipv6" => Ok(Family::IPv6),
            other => Err(crate::Error::UnknownFamily(other.to_string())),
        }
    }
}

/// Which families a dual-stack allocation should cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyFilter {
    /// Every configured family
    #[default]
    Any,
    /// IPv4 only
    IPv4,
    /// IPv6 only
    IPv6,
}

impl FamilyFilter {
    /// Whether the filter selects `family`
    pub fn includes(&self, family: Family) -> bool {
        match self {
            FamilyFilter::Any => true,
            FamilyFilter::IPv4 => family == Family::IPv4,
            FamilyFilter::IPv6 => family == Family::IPv6,
        }
    }
}

impl From<Family> for FamilyFilter {
    fn from(family: Family) -> Self {
        match family {
            Family::IPv4 => FamilyFilter::IPv4,
            Family::IPv6 => FamilyFilter::IPv6,
        }
    }
}

impl FromStr for FamilyFilter {
    type Err = crate::Error;

    /// `""` selects both families, `"ipv4"`/`"ipv6"` a single one
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(FamilyFilter::Any);
        }
        s.parse::<Family>().map(FamilyFilter::from)
    }
}

/// Descriptor of the entity requesting an address
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Free-form owner identifier, used for ledger attribution and
    /// release-by-owner lookups
    pub owner: String,
}

impl Metadata {
    /// Create metadata for an owner
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    /// Same requester, owner name marked as a blacklisted placeholder
    pub(crate) fn blacklisted_owner(&self) -> String {
        format!("{} (blacklisted)", self.owner)
    }
}

/// Result of a successful allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// The allocated address
    pub ip: IpAddr,
    /// Network the address belongs to, if the backend knows it
    pub cidr: Option<IpNet>,
    /// Token of the expiration timer, set only for expiring allocations
    pub expiration_token: Option<ExpirationToken>,
}

impl AllocationResult {
    /// Create a result carrying only the address
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            cidr: None,
            expiration_token: None,
        }
    }

    /// Attach the network the address was taken from
    pub fn with_cidr(mut self, cidr: IpNet) -> Self {
        self.cidr = Some(cidr);
        self
    }
}

/// Trait for per-family allocator backends
///
/// One implementation serves exactly one address family. The coordinator
/// calls it only while holding its own exclusive lock, but implementations
/// may still be shared and must be usable across tasks.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Upstream synchronization
///
/// Some backends mirror their state to an upstream (a cluster resource, a
/// cloud API). The `*_without_sync_upstream` variants skip that step; the
/// default implementations simply forward to the synchronizing variants,
/// which is correct for backends without an upstream.
#[async_trait]
pub trait FamilyAllocator: Send + Sync {
    /// Allocate a specific address
    ///
    /// # Returns
    ///
    /// - `Ok(AllocationResult)`: The address is now allocated
    /// - `Err(Error)`: Address out of range, already taken, or backend failure
    async fn allocate(&self, ip: IpAddr, metadata: &Metadata) -> crate::Result<AllocationResult>;

    /// Allocate a specific address without syncing upstream
    async fn allocate_without_sync_upstream(
        &self,
        ip: IpAddr,
        metadata: &Metadata,
    ) -> crate::Result<AllocationResult> {
        self.allocate(ip, metadata).await
    }

    /// Allocate any free address
    ///
    /// # Returns
    ///
    /// - `Ok(AllocationResult)`: A newly allocated address
    /// - `Err(Error)`: Pool exhausted or backend failure
    async fn allocate_next(&self, metadata: &Metadata) -> crate::Result<AllocationResult>;

    /// Allocate any free address without syncing upstream
    async fn allocate_next_without_sync_upstream(
        &self,
        metadata: &Metadata,
    ) -> crate::Result<AllocationResult> {
        self.allocate_next(metadata).await
    }

    /// Return an address to the pool
    async fn release(&self, ip: IpAddr) -> crate::Result<()>;

    /// Every allocated address with the backend's owner annotation, plus a
    /// human-readable status line
    async fn dump(&self) -> (BTreeMap<IpAddr, String>, String);

    /// Name of the allocator implementation (for logging)
    fn allocator_name(&self) -> &'static str;
}

/// Helper trait for constructing family allocators from configuration
pub trait FamilyAllocatorFactory: Send + Sync {
    /// Create a FamilyAllocator instance for `family`
    ///
    /// # Parameters
    ///
    /// - `family`: The family slot the allocator will serve
    /// - `config`: Configuration specific to this allocator type
    fn create(
        &self,
        family: Family,
        config: &serde_json::Value,
    ) -> crate::Result<Box<dyn FamilyAllocator>>;
}
