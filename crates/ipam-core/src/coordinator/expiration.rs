//! Expiration timers
//!
//! An address allocated on behalf of an external entity can be given a
//! lease: unless the entity stops the timer in time, the address is
//! released again when the timer fires.
//!
//! ## Staleness
//!
//! Every timer gets a fresh [`ExpirationToken`]. A watcher only releases
//! the address if the timer table still holds its own token, so a watcher
//! left over from an earlier allocation can never release a newer,
//! unrelated allocation of the same address.
//!
//! Stopping a timer removes the table entry; the watcher task itself still
//! wakes up at its deadline and finds nothing to do.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{Inner, Ipam};
use crate::error::{Error, Result};

/// Identity of one expiration timer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpirationToken(Uuid);

impl ExpirationToken {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ExpirationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ExpirationToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::invalid_input(format!("invalid expiration token {}: {}", s, e)))
    }
}

impl Ipam {
    /// Arm an expiration timer for an allocated address
    ///
    /// Unless [`Ipam::stop_expiration_timer`] is called with the returned
    /// token within `timeout`, the address is released when the timer fires.
    ///
    /// # Returns
    ///
    /// - `Ok(ExpirationToken)`: Token to present when stopping the timer
    /// - `Err(Error::TimerAlreadyRegistered)`: The address already has a timer
    pub async fn start_expiration_timer(
        &self,
        ip: IpAddr,
        timeout: Duration,
    ) -> Result<ExpirationToken> {
        self.inner.start_expiration_timer(ip, timeout).await
    }

    /// Disarm the expiration timer of an address
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The timer is removed
    /// - `Err(Error::TimerNotRegistered)`: The address has no timer
    /// - `Err(Error::TokenMismatch)`: `token` is not the current timer's token
    pub async fn stop_expiration_timer(&self, ip: IpAddr, token: ExpirationToken) -> Result<()> {
        let ip = ip.to_canonical();
        let mut ledger = self.inner.ledger.write().await;

        match ledger.expiration_timers.get(&ip) {
            None => return Err(Error::TimerNotRegistered(ip)),
            Some(current) if *current != token => return Err(Error::TokenMismatch(ip)),
            Some(_) => {}
        }

        ledger.expiration_timers.remove(&ip);
        debug!(%ip, %token, "Stopped expiration timer");
        Ok(())
    }
}

impl Inner {
    async fn start_expiration_timer(
        self: &Arc<Self>,
        ip: IpAddr,
        timeout: Duration,
    ) -> Result<ExpirationToken> {
        let ip = ip.to_canonical();
        let mut ledger = self.ledger.write().await;

        if ledger.expiration_timers.contains_key(&ip) {
            return Err(Error::TimerAlreadyRegistered(ip));
        }

        let token = ExpirationToken::generate();
        ledger.expiration_timers.insert(ip, token);

        // The watcher must not keep a dropped coordinator alive.
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            match inner.upgrade() {
                Some(inner) => inner.expire(ip, token).await,
                None => trace!(%ip, %token, "Coordinator gone, dropping expiration"),
            }
        });

        debug!(%ip, %token, ?timeout, "Started expiration timer");
        Ok(token)
    }

    /// Watcher body, run once the timeout has elapsed
    async fn expire(&self, ip: IpAddr, token: ExpirationToken) {
        let mut ledger = self.ledger.write().await;

        match ledger.expiration_timers.get(&ip) {
            None => {
                trace!(%ip, %token, "Expiration timer was removed");
            }
            Some(current) if *current != token => {
                trace!(%ip, %token, current = %current, "Obsolete expiration timer");
            }
            Some(_) => match self.release_locked(&mut ledger, ip).await {
                Ok(()) => warn!(%ip, %token, "Released IP after expiration"),
                Err(err) => warn!(%ip, %token, error = %err, "Unable to release IP after expiration"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::RangeAllocator;
    use crate::blacklist::StaticBlacklist;
    use crate::traits::Metadata;

    fn ipv4_only() -> Ipam {
        Ipam::new(
            Some(Box::new(RangeAllocator::new("10.0.0.0/29".parse().unwrap()))),
            None,
            Arc::new(StaticBlacklist::new()),
        )
    }

    #[test]
    fn test_token_round_trips_through_string() {
        let token = ExpirationToken::generate();
        let parsed: ExpirationToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
        assert!("not-a-token".parse::<ExpirationToken>().is_err());
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(ExpirationToken::generate(), ExpirationToken::generate());
    }

    #[tokio::test]
    async fn test_second_timer_is_rejected() {
        let ipam = ipv4_only();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        ipam.start_expiration_timer(ip, Duration::from_secs(60))
            .await
            .unwrap();
        let second = ipam.start_expiration_timer(ip, Duration::from_secs(60)).await;
        assert!(matches!(second, Err(Error::TimerAlreadyRegistered(addr)) if addr == ip));
    }

    #[tokio::test]
    async fn test_stop_requires_matching_token() {
        let ipam = ipv4_only();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let missing = ipam.stop_expiration_timer(ip, ExpirationToken::generate()).await;
        assert!(matches!(missing, Err(Error::TimerNotRegistered(_))));

        let token = ipam
            .start_expiration_timer(ip, Duration::from_secs(60))
            .await
            .unwrap();

        let wrong = ipam.stop_expiration_timer(ip, ExpirationToken::generate()).await;
        assert!(matches!(wrong, Err(Error::TokenMismatch(_))));

        ipam.stop_expiration_timer(ip, token).await.unwrap();
        assert!(ipam.inner.ledger.read().await.expiration_timers.is_empty());
    }

    #[tokio::test]
    async fn test_stale_watcher_spares_reallocated_address() {
        let ipam = ipv4_only();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        ipam.allocate_ip(ip, &Metadata::new("pod-a")).await.unwrap();
        let _stale = ipam
            .start_expiration_timer(ip, Duration::from_millis(50))
            .await
            .unwrap();

        ipam.release_ip(ip).await.unwrap();
        ipam.allocate_ip(ip, &Metadata::new("pod-b")).await.unwrap();
        let fresh = ipam
            .start_expiration_timer(ip, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let ledger = ipam.inner.ledger.read().await;
        assert_eq!(ledger.owners.get(&ip), Some(&"pod-b".to_string()));
        assert_eq!(ledger.expiration_timers.get(&ip), Some(&fresh));
    }

    #[tokio::test]
    async fn test_dropped_coordinator_does_not_fire() {
        let ipam = ipv4_only();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        ipam.allocate_ip(ip, &Metadata::new("pod-a")).await.unwrap();
        ipam.start_expiration_timer(ip, Duration::from_millis(10))
            .await
            .unwrap();
        let weak = Arc::downgrade(&ipam.inner);
        drop(ipam);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(weak.upgrade().is_none());
    }
}
