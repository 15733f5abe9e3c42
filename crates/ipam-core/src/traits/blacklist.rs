// # Blacklist Trait
//
// A pure membership predicate over addresses that must never be allocated.
// It is populated by an external policy source; the coordinator only reads
// it, on every allocation path and never on release.

use std::collections::HashSet;
use std::net::IpAddr;

/// Trait for blacklist implementations
///
/// Implementations must be cheap to query: the coordinator calls
/// [`Blacklist::contains`] while holding its exclusive lock.
pub trait Blacklist: Send + Sync {
    /// Whether `ip` must not be handed out
    fn contains(&self, ip: &IpAddr) -> bool;
}

/// Entries match in either notation: `10.0.0.5` and `::ffff:10.0.0.5` are
/// the same address.
impl Blacklist for HashSet<IpAddr> {
    fn contains(&self, ip: &IpAddr) -> bool {
        match ip.to_canonical() {
            IpAddr::V4(v4) => {
                HashSet::contains(self, &IpAddr::V4(v4))
                    || HashSet::contains(self, &IpAddr::V6(v4.to_ipv6_mapped()))
            }
            v6 => HashSet::contains(self, &v6),
        }
    }
}
