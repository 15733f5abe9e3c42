// # ipam-core
//
// Coordination layer for dual-stack IP address management.
//
// ## Architecture Overview
//
// This library hands out and reclaims IPv4/IPv6 addresses for workloads:
// - **FamilyAllocator**: Trait for per-family backends that pick free addresses
// - **Blacklist**: Trait for addresses that must never be handed out
// - **Ipam**: Coordinator that owns the ownership ledger, dispatches to the
//   backends, rolls back partial dual-stack allocations and runs leases
// - **AllocatorRegistry**: Plugin-based registry for allocator backends
//
// ## Design Principles
//
// 1. **Backends are authoritative**: The coordinator never computes free
//    addresses; it only annotates ownership on top of the backends
// 2. **No partial commits**: The ledger changes only after a backend confirms
// 3. **All or nothing**: Multi-step allocations unwind on failure
// 4. **Race-safe leases**: Expiration timers are tied to a token so a stale
//    timer never reclaims a newer allocation
// 5. **Library-First**: Everything the daemon does is available as a library

pub mod allocator;
pub mod blacklist;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod traits;

// Re-export core types for convenience
pub use traits::{AllocationResult, Blacklist, Family, FamilyAllocator, FamilyFilter, Metadata};
pub use coordinator::{DualStackAllocation, ExpirationToken, Ipam, IpamDump};
pub use registry::AllocatorRegistry;
pub use config::{AllocatorConfig, ExpirationConfig, IpamConfig};
pub use error::{Error, Result};
pub use allocator::RangeAllocator;
pub use blacklist::StaticBlacklist;
