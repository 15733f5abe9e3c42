//! IPAM coordinator
//!
//! The [`Ipam`] coordinator is responsible for:
//! - Dispatching allocations and releases to the right family allocator
//! - Keeping the ownership ledger in lock-step with confirmed backend changes
//! - Enforcing the blacklist on every allocation path
//! - Orchestrating dual-stack allocation with compensating rollback
//! - Running lease-style expiration timers (see [`expiration`])
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  callers ──────▶│ Ipam                         │◀───── expiration watchers
//!                 │  RwLock<Ledger>              │
//!                 │   owners: ip → owner         │
//!                 │   expiration_timers: ip → tok│
//!                 └──────────────────────────────┘
//!                    │            │            │
//!                    ▼            ▼            ▼
//!             ┌───────────┐ ┌───────────┐ ┌───────────┐
//!             │ IPv4      │ │ IPv6      │ │ Blacklist │
//!             │ allocator │ │ allocator │ │ (read)    │
//!             └───────────┘ └───────────┘ └───────────┘
//! ```
//!
//! ## Locking
//!
//! One lock covers the ledger, the timer table and every call into a
//! family allocator. Mutating operations hold it exclusively for their
//! whole duration, backend call included, so a slow backend stalls the
//! whole coordinator. [`Ipam::dump`] only takes the shared side.
//!
//! Dual-stack allocation takes the lock once per family: between the IPv6
//! and IPv4 steps the IPv6 address is live and visible to other callers.

pub mod expiration;

pub use expiration::ExpirationToken;

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::blacklist::StaticBlacklist;
use crate::config::{ExpirationConfig, IpamConfig};
use crate::error::{Error, Result};
use crate::registry::AllocatorRegistry;
use crate::traits::{AllocationResult, Blacklist, Family, FamilyAllocator, FamilyFilter, Metadata};

const METRIC_IPAM_EVENTS: &str = "ipam_events_total";
const METRIC_ALLOCATE: &str = "allocate";
const METRIC_RELEASE: &str = "release";

/// Addresses handed out by a dual-stack allocation
///
/// A family is `None` when it was not requested or has no allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DualStackAllocation {
    /// The IPv4 result
    pub ipv4: Option<AllocationResult>,
    /// The IPv6 result
    pub ipv6: Option<AllocationResult>,
}

impl DualStackAllocation {
    /// Every allocated address, IPv4 first
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4.iter().chain(self.ipv6.iter()).map(|result| result.ip)
    }

    fn results_mut(&mut self) -> impl Iterator<Item = &mut AllocationResult> {
        self.ipv4.iter_mut().chain(self.ipv6.iter_mut())
    }
}

/// Snapshot of every allocated address, annotated with ledger owners
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IpamDump {
    /// IPv4 allocations, `None` if IPv4 is disabled
    pub ipv4: Option<BTreeMap<IpAddr, String>>,
    /// IPv6 allocations, `None` if IPv6 is disabled
    pub ipv6: Option<BTreeMap<IpAddr, String>>,
    /// Combined status line
    pub status: String,
}

/// Ownership and lease bookkeeping, guarded by the coordinator lock
#[derive(Debug, Default)]
struct Ledger {
    /// Address → owner, for every address allocated through the coordinator
    owners: HashMap<IpAddr, String>,
    /// Address → token of the one live expiration timer
    expiration_timers: HashMap<IpAddr, ExpirationToken>,
}

struct Inner {
    ledger: RwLock<Ledger>,
    ipv4: Option<Box<dyn FamilyAllocator>>,
    ipv6: Option<Box<dyn FamilyAllocator>>,
    blacklist: Arc<dyn Blacklist>,
}

/// IP address management coordinator
///
/// Cloning is cheap and every clone drives the same ledger, so a handle can
/// be given to each caller.
///
/// ## Example
///
/// ```rust,no_run
/// use ipam_core::allocator::RangeAllocator;
/// use ipam_core::blacklist::StaticBlacklist;
/// use ipam_core::coordinator::Ipam;
/// use ipam_core::traits::{FamilyFilter, Metadata};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ipam = Ipam::new(
///         Some(Box::new(RangeAllocator::new("10.0.0.0/24".parse()?))),
///         Some(Box::new(RangeAllocator::new("fd00::/120".parse()?))),
///         Arc::new(StaticBlacklist::new()),
///     );
///
///     let allocation = ipam.allocate_next(FamilyFilter::Any, &Metadata::new("pod-a")).await?;
///     for ip in allocation.addresses() {
///         ipam.release_ip(ip).await?;
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Ipam {
    inner: Arc<Inner>,
    /// Lease length for [`Ipam::allocate_next_with_default_expiration`]
    default_expiration: Duration,
}

impl Ipam {
    /// Create a coordinator
    ///
    /// # Parameters
    ///
    /// - `ipv4`: IPv4 allocator, `None` disables IPv4
    /// - `ipv6`: IPv6 allocator, `None` disables IPv6
    /// - `blacklist`: Addresses that must never be handed out
    pub fn new(
        ipv4: Option<Box<dyn FamilyAllocator>>,
        ipv6: Option<Box<dyn FamilyAllocator>>,
        blacklist: Arc<dyn Blacklist>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: RwLock::new(Ledger::default()),
                ipv4,
                ipv6,
                blacklist,
            }),
            default_expiration: ExpirationConfig::default().default_timeout(),
        }
    }

    /// Use `timeout` as the default lease length
    pub fn with_default_expiration(mut self, timeout: Duration) -> Self {
        self.default_expiration = timeout;
        self
    }

    /// The default lease length
    pub fn default_expiration(&self) -> Duration {
        self.default_expiration
    }

    /// Create a coordinator from configuration
    ///
    /// Allocators are built through `registry`; the configured blacklist
    /// becomes a [`StaticBlacklist`].
    pub fn from_config(config: &IpamConfig, registry: &AllocatorRegistry) -> Result<Self> {
        config.validate()?;

        let ipv4 = config
            .ipv4
            .as_ref()
            .map(|allocator| registry.create_allocator(Family::IPv4, allocator))
            .transpose()?;
        let ipv6 = config
            .ipv6
            .as_ref()
            .map(|allocator| registry.create_allocator(Family::IPv6, allocator))
            .transpose()?;
        let blacklist = StaticBlacklist::from_addresses(config.blacklist.iter().copied(), "config");

        Ok(Self::new(ipv4, ipv6, Arc::new(blacklist))
            .with_default_expiration(config.expiration.default_timeout()))
    }

    /// Whether an allocator is configured for `family`
    pub fn is_family_enabled(&self, family: Family) -> bool {
        self.inner.allocator(family).is_some()
    }

    /// Allocate a specific address
    ///
    /// # Returns
    ///
    /// - `Ok(AllocationResult)`: The address is allocated and owned by `metadata.owner`
    /// - `Err(Error::Blacklisted)`: The address is blacklisted
    /// - `Err(Error::FamilyDisabled)`: No allocator for the address family
    /// - `Err(_)`: The backend's error, unchanged
    pub async fn allocate_ip(&self, ip: IpAddr, metadata: &Metadata) -> Result<AllocationResult> {
        let mut ledger = self.inner.ledger.write().await;
        self.inner.allocate_ip_locked(&mut ledger, ip, true, metadata).await
    }

    /// Allocate a specific address without syncing the backend upstream
    pub async fn allocate_ip_without_sync_upstream(
        &self,
        ip: IpAddr,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        let mut ledger = self.inner.ledger.write().await;
        self.inner.allocate_ip_locked(&mut ledger, ip, false, metadata).await
    }

    /// Same as [`Ipam::allocate_ip`], taking the address as a string
    pub async fn allocate_ip_str(&self, ip: &str, metadata: &Metadata) -> Result<AllocationResult> {
        let ip = ip
            .parse::<IpAddr>()
            .map_err(|_| Error::invalid_input(format!("Invalid IP address: {}", ip)))?;
        self.allocate_ip(ip, metadata).await
    }

    /// Allocate the next free address of one family
    ///
    /// Blacklisted candidates are parked in the ledger under
    /// `"<owner> (blacklisted)"` and the backend is asked again. Backend
    /// errors are returned as soon as they occur.
    pub async fn allocate_next_family(
        &self,
        family: Family,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        let mut ledger = self.inner.ledger.write().await;
        self.inner
            .allocate_next_family_locked(&mut ledger, family, true, metadata)
            .await
    }

    /// Allocate the next free address of one family without syncing upstream
    pub async fn allocate_next_family_without_sync_upstream(
        &self,
        family: Family,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        let mut ledger = self.inner.ledger.write().await;
        self.inner
            .allocate_next_family_locked(&mut ledger, family, false, metadata)
            .await
    }

    /// Allocate the next free address of every family selected by `filter`
    ///
    /// IPv6 is allocated first, then IPv4. A family that is not selected by
    /// `filter` or has no allocator is skipped and left `None` in the result,
    /// so asking only for a disabled family returns an empty allocation.
    ///
    /// If IPv4 fails after IPv6 succeeded, the IPv6 address is released
    /// again before the IPv4 error is returned.
    pub async fn allocate_next(
        &self,
        filter: FamilyFilter,
        metadata: &Metadata,
    ) -> Result<DualStackAllocation> {
        let wanted = |family: Family| filter.includes(family) && self.is_family_enabled(family);

        let mut allocation = DualStackAllocation::default();

        if wanted(Family::IPv6) {
            allocation.ipv6 = Some(self.allocate_next_family(Family::IPv6, metadata).await?);
        }

        if wanted(Family::IPv4) {
            match self.allocate_next_family(Family::IPv4, metadata).await {
                Ok(result) => allocation.ipv4 = Some(result),
                Err(err) => {
                    if let Some(ipv6) = &allocation.ipv6 {
                        self.rollback(ipv6.ip).await;
                    }
                    return Err(err);
                }
            }
        }

        Ok(allocation)
    }

    /// Same as [`Ipam::allocate_next`], then arm an expiration timer for
    /// every allocated address
    ///
    /// A zero `timeout` arms nothing. If any timer cannot be armed, every
    /// address of this call is released before the error is returned.
    pub async fn allocate_next_with_expiration(
        &self,
        filter: FamilyFilter,
        timeout: Duration,
        metadata: &Metadata,
    ) -> Result<DualStackAllocation> {
        let mut allocation = self.allocate_next(filter, metadata).await?;
        if timeout.is_zero() {
            return Ok(allocation);
        }

        let mut failure = None;
        for result in allocation.results_mut() {
            match self.start_expiration_timer(result.ip, timeout).await {
                Ok(token) => result.expiration_token = Some(token),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            for ip in allocation.addresses() {
                self.rollback(ip).await;
            }
            return Err(err);
        }

        Ok(allocation)
    }

    /// Same as [`Ipam::allocate_next_with_expiration`], using the default
    /// lease length
    pub async fn allocate_next_with_default_expiration(
        &self,
        filter: FamilyFilter,
        metadata: &Metadata,
    ) -> Result<DualStackAllocation> {
        self.allocate_next_with_expiration(filter, self.default_expiration, metadata)
            .await
    }

    /// Release an address
    ///
    /// On success the ledger entry and any expiration timer for the address
    /// are removed. On failure nothing changes.
    pub async fn release_ip(&self, ip: IpAddr) -> Result<()> {
        let mut ledger = self.inner.ledger.write().await;
        self.inner.release_locked(&mut ledger, ip).await
    }

    /// Release by address or by owner name
    ///
    /// A parsable address releases exactly that address. Anything else is
    /// taken as an owner name and every address the ledger attributes to it
    /// is released. Every release is attempted; the returned error is the
    /// one from the last failing release.
    pub async fn release_ip_str(&self, release_arg: &str) -> Result<()> {
        let ips = match release_arg.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => {
                let ips = self.lookup_ips_by_owner(release_arg).await;
                if ips.is_empty() {
                    return Err(Error::not_found(release_arg));
                }
                ips
            }
        };

        let mut outcome = Ok(());
        for ip in ips {
            if let Err(err) = self.release_ip(ip).await {
                warn!(%ip, owner = release_arg, error = %err, "Unable to release IP");
                outcome = Err(err);
            }
        }
        outcome
    }

    /// Every allocated address per family, annotated with its owner
    ///
    /// Addresses the backend reports but the ledger does not know are
    /// listed with an empty owner.
    pub async fn dump(&self) -> IpamDump {
        let ledger = self.inner.ledger.read().await;
        let mut dump = IpamDump::default();
        let mut statuses = Vec::new();

        for family in [Family::IPv4, Family::IPv6] {
            let Some(allocator) = self.inner.allocator(family) else {
                continue;
            };

            let (mut allocated, status) = allocator.dump().await;
            for (ip, owner) in allocated.iter_mut() {
                *owner = ledger.owners.get(ip).cloned().unwrap_or_default();
            }
            statuses.push(format!("{}: {}", family, status));

            match family {
                Family::IPv4 => dump.ipv4 = Some(allocated),
                Family::IPv6 => dump.ipv6 = Some(allocated),
            }
        }

        dump.status = if statuses.is_empty() {
            "Not running".to_string()
        } else {
            statuses.join(", ")
        };
        dump
    }

    async fn lookup_ips_by_owner(&self, owner: &str) -> Vec<IpAddr> {
        let ledger = self.inner.ledger.read().await;
        ledger
            .owners
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(ip, _)| *ip)
            .collect()
    }

    /// Compensating release; a failure here may leak the address
    async fn rollback(&self, ip: IpAddr) {
        if let Err(err) = self.release_ip(ip).await {
            error!(%ip, error = %err, "Unable to release IP during rollback, address may have leaked");
        }
    }
}

impl Inner {
    fn allocator(&self, family: Family) -> Option<&dyn FamilyAllocator> {
        match family {
            Family::IPv4 => self.ipv4.as_deref(),
            Family::IPv6 => self.ipv6.as_deref(),
        }
    }

    async fn allocate_ip_locked(
        &self,
        ledger: &mut Ledger,
        ip: IpAddr,
        sync_upstream: bool,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        let ip = ip.to_canonical();

        if self.blacklist.contains(&ip) {
            return Err(Error::blacklisted(ip, metadata.owner.clone()));
        }

        let family = Family::of(&ip);
        let allocator = self
            .allocator(family)
            .ok_or(Error::FamilyDisabled(family))?;

        let result = if sync_upstream {
            allocator.allocate(ip, metadata).await?
        } else {
            allocator.allocate_without_sync_upstream(ip, metadata).await?
        };

        debug!(
            %ip,
            owner = %metadata.owner,
            allocator = allocator.allocator_name(),
            "Allocated specific IP"
        );

        ledger.owners.insert(ip, metadata.owner.clone());
        record_event(METRIC_ALLOCATE, family);
        Ok(result)
    }

    /// Ask the backend until it returns an address that is not blacklisted
    ///
    /// A blacklisted candidate stays allocated at the backend and is put in
    /// the ledger under the blacklist-marked owner name, so the backend
    /// cannot offer it again. It is never released by this loop. Backend
    /// errors end the loop immediately.
    async fn allocate_next_family_locked(
        &self,
        ledger: &mut Ledger,
        family: Family,
        sync_upstream: bool,
        metadata: &Metadata,
    ) -> Result<AllocationResult> {
        let allocator = self
            .allocator(family)
            .ok_or(Error::FamilyUnavailable(family))?;

        loop {
            let mut result = if sync_upstream {
                allocator.allocate_next(metadata).await?
            } else {
                allocator.allocate_next_without_sync_upstream(metadata).await?
            };
            result.ip = result.ip.to_canonical();

            if !self.blacklist.contains(&result.ip) {
                debug!(
                    ip = %result.ip,
                    owner = %metadata.owner,
                    allocator = allocator.allocator_name(),
                    "Allocated random IP"
                );
                ledger.owners.insert(result.ip, metadata.owner.clone());
                record_event(METRIC_ALLOCATE, family);
                return Ok(result);
            }

            debug!(
                ip = %result.ip,
                owner = %metadata.owner,
                allocator = allocator.allocator_name(),
                "Skipping blacklisted IP"
            );
            ledger
                .owners
                .insert(result.ip, metadata.blacklisted_owner());
        }
    }

    async fn release_locked(&self, ledger: &mut Ledger, ip: IpAddr) -> Result<()> {
        let ip = ip.to_canonical();
        let family = Family::of(&ip);
        let allocator = self
            .allocator(family)
            .ok_or(Error::FamilyDisabled(family))?;

        allocator.release(ip).await?;

        let owner = ledger.owners.remove(&ip).unwrap_or_default();
        ledger.expiration_timers.remove(&ip);
        debug!(%ip, %owner, allocator = allocator.allocator_name(), "Released IP");

        record_event(METRIC_RELEASE, family);
        Ok(())
    }
}

fn record_event(action: &'static str, family: Family) {
    counter!(METRIC_IPAM_EVENTS, "action" => action, "family" => family.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::RangeAllocator;

    fn dual_stack(blacklist: StaticBlacklist) -> Ipam {
        Ipam::new(
            Some(Box::new(RangeAllocator::new("10.0.0.0/29".parse().unwrap()))),
            Some(Box::new(RangeAllocator::new("fd00::/125".parse().unwrap()))),
            Arc::new(blacklist),
        )
    }

    async fn owner_of(ipam: &Ipam, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.parse().unwrap();
        ipam.inner.ledger.read().await.owners.get(&ip).cloned()
    }

    #[tokio::test]
    async fn test_allocate_specific_records_owner() {
        let ipam = dual_stack(StaticBlacklist::new());
        let md = Metadata::new("pod-a");

        ipam.allocate_ip_str("10.0.0.3", &md).await.unwrap();
        assert_eq!(owner_of(&ipam, "10.0.0.3").await, Some("pod-a".to_string()));
    }

    #[tokio::test]
    async fn test_allocate_specific_rejects_blacklisted() {
        let blacklist = StaticBlacklist::new();
        blacklist.exclude("10.0.0.3".parse().unwrap(), "router");
        let ipam = dual_stack(blacklist);

        let result = ipam.allocate_ip_str("10.0.0.3", &Metadata::new("pod-a")).await;
        assert!(matches!(result, Err(Error::Blacklisted { .. })));
        assert_eq!(owner_of(&ipam, "10.0.0.3").await, None);
    }

    #[tokio::test]
    async fn test_allocate_specific_invalid_string() {
        let ipam = dual_stack(StaticBlacklist::new());
        let result = ipam.allocate_ip_str("not-an-ip", &Metadata::new("pod-a")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_mapped_ipv4_uses_ipv4_allocator() {
        let ipam = dual_stack(StaticBlacklist::new());
        let md = Metadata::new("pod-a");

        let result = ipam.allocate_ip_str("::ffff:10.0.0.4", &md).await.unwrap();
        assert_eq!(result.ip, "10.0.0.4".parse::<IpAddr>().unwrap());
        assert_eq!(owner_of(&ipam, "10.0.0.4").await, Some("pod-a".to_string()));
    }

    #[tokio::test]
    async fn test_blacklisted_candidate_is_parked() {
        let blacklist = StaticBlacklist::new();
        blacklist.exclude("10.0.0.1".parse().unwrap(), "router");
        let ipam = dual_stack(blacklist);

        let result = ipam
            .allocate_next_family(Family::IPv4, &Metadata::new("pod-a"))
            .await
            .unwrap();

        assert_eq!(result.ip, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(
            owner_of(&ipam, "10.0.0.1").await,
            Some("pod-a (blacklisted)".to_string())
        );
        assert_eq!(owner_of(&ipam, "10.0.0.2").await, Some("pod-a".to_string()));
    }

    #[tokio::test]
    async fn test_release_clears_owner_and_timer() {
        let ipam = dual_stack(StaticBlacklist::new());
        let ip: IpAddr = "10.0.0.5".parse().unwrap();

        ipam.allocate_ip(ip, &Metadata::new("pod-a")).await.unwrap();
        ipam.start_expiration_timer(ip, Duration::from_secs(60))
            .await
            .unwrap();

        ipam.release_ip(ip).await.unwrap();

        let ledger = ipam.inner.ledger.read().await;
        assert!(!ledger.owners.contains_key(&ip));
        assert!(!ledger.expiration_timers.contains_key(&ip));
    }

    #[tokio::test]
    async fn test_failed_release_leaves_ledger_untouched() {
        let ipam = dual_stack(StaticBlacklist::new());
        let ip: IpAddr = "10.0.0.6".parse().unwrap();

        let result = ipam.release_ip(ip).await;
        assert!(matches!(result, Err(Error::NotAllocated(_))));
        assert!(ipam.inner.ledger.read().await.owners.is_empty());
    }

    #[tokio::test]
    async fn test_allocate_next_skips_disabled_family() {
        let ipam = Ipam::new(
            Some(Box::new(RangeAllocator::new("10.0.0.0/29".parse().unwrap()))),
            None,
            Arc::new(StaticBlacklist::new()),
        );
        let md = Metadata::new("pod-a");

        let allocation = ipam.allocate_next(FamilyFilter::IPv6, &md).await.unwrap();
        assert_eq!(allocation, DualStackAllocation::default());

        let allocation = ipam.allocate_next(FamilyFilter::Any, &md).await.unwrap();
        assert!(allocation.ipv4.is_some());
        assert!(allocation.ipv6.is_none());
    }

    #[tokio::test]
    async fn test_allocate_next_without_families() {
        let ipam = Ipam::new(None, None, Arc::new(StaticBlacklist::new()));
        let allocation = ipam
            .allocate_next(FamilyFilter::Any, &Metadata::new("pod-a"))
            .await
            .unwrap();
        assert_eq!(allocation.addresses().count(), 0);
        assert_eq!(ipam.dump().await.status, "Not running");
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = IpamConfig::new()
            .with_ipv4(crate::config::AllocatorConfig::range("10.1.0.0/24".parse().unwrap()))
            .with_blacklist(["10.1.0.1".parse().unwrap()]);
        config.expiration = ExpirationConfig {
            default_timeout_ms: 1500,
        };
        let ipam = Ipam::from_config(&config, &AllocatorRegistry::new()).unwrap();

        assert_eq!(ipam.default_expiration(), Duration::from_millis(1500));
        assert_eq!(
            ipam.clone().default_expiration(),
            Duration::from_millis(1500),
            "clones share the lease length"
        );

        assert!(ipam.is_family_enabled(Family::IPv4));
        assert!(!ipam.is_family_enabled(Family::IPv6));

        let result = ipam
            .allocate_next_family(Family::IPv4, &Metadata::new("pod-a"))
            .await
            .unwrap();
        assert_eq!(result.ip, "10.1.0.2".parse::<IpAddr>().unwrap());
    }

    fn event_count(
        snapshot: &[(
            metrics_util::CompositeKey,
            Option<metrics::Unit>,
            Option<metrics::SharedString>,
            metrics_util::debugging::DebugValue,
        )],
        action: &str,
        family: &str,
    ) -> u64 {
        snapshot
            .iter()
            .filter(|(key, ..)| key.key().name() == METRIC_IPAM_EVENTS)
            .filter(|(key, ..)| {
                let labels: Vec<_> = key
                    .key()
                    .labels()
                    .map(|label| (label.key(), label.value()))
                    .collect();
                labels.contains(&("action", action)) && labels.contains(&("family", family))
            })
            .map(|(.., value)| match value {
                metrics_util::debugging::DebugValue::Counter(count) => *count,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_events_counted_only_on_success() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let blacklist = StaticBlacklist::new();
                blacklist.exclude("10.0.0.2".parse().unwrap(), "router");
                let ipam = dual_stack(blacklist);
                let md = Metadata::new("pod-a");

                // 10.0.0.1 succeeds, then 10.0.0.2 is parked before 10.0.0.3
                ipam.allocate_ip_str("10.0.0.1", &md).await.unwrap();
                let next = ipam.allocate_next_family(Family::IPv4, &md).await.unwrap();
                assert_eq!(next.ip, "10.0.0.3".parse::<IpAddr>().unwrap());

                // Backend refusals
                assert!(ipam.allocate_ip_str("10.0.0.1", &md).await.is_err());
                assert!(ipam.release_ip("10.0.0.6".parse().unwrap()).await.is_err());

                ipam.allocate_ip_str("fd00::1", &md).await.unwrap();
                ipam.release_ip("fd00::1".parse().unwrap()).await.unwrap();
            })
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(event_count(&snapshot, METRIC_ALLOCATE, "ipv4"), 2);
        assert_eq!(event_count(&snapshot, METRIC_RELEASE, "ipv4"), 0);
        assert_eq!(event_count(&snapshot, METRIC_ALLOCATE, "ipv6"), 1);
        assert_eq!(event_count(&snapshot, METRIC_RELEASE, "ipv6"), 1);
    }
}
