//! Configuration types for the IPAM system
//!
//! This module defines all configuration structures used throughout the crate.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::traits::Family;

/// Main IPAM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamConfig {
    /// IPv4 allocator, `None` disables IPv4
    #[serde(default)]
    pub ipv4: Option<AllocatorConfig>,

    /// IPv6 allocator, `None` disables IPv6
    #[serde(default)]
    pub ipv6: Option<AllocatorConfig>,

    /// Addresses that must never be handed out
    #[serde(default)]
    pub blacklist: Vec<IpAddr>,

    /// Lease settings
    #[serde(default)]
    pub expiration: ExpirationConfig,
}

impl IpamConfig {
    /// Create a new configuration with no family enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable IPv4 with the given allocator
    pub fn with_ipv4(mut self, allocator: AllocatorConfig) -> Self {
        self.ipv4 = Some(allocator);
        self
    }

    /// Enable IPv6 with the given allocator
    pub fn with_ipv6(mut self, allocator: AllocatorConfig) -> Self {
        self.ipv6 = Some(allocator);
        self
    }

    /// Add addresses to the blacklist
    pub fn with_blacklist(mut self, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.blacklist.extend(ips);
        self
    }

    /// The allocator configured for `family`
    pub fn allocator(&self, family: Family) -> Option<&AllocatorConfig> {
        match family {
            Family::IPv4 => self.ipv4.as_ref(),
            Family::IPv6 => self.ipv6.as_ref(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        for family in [Family::IPv4, Family::IPv6] {
            if let Some(allocator) = self.allocator(family) {
                allocator.validate(family)?;
            }
        }

        self.expiration.validate()?;

        Ok(())
    }
}

/// Family allocator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AllocatorConfig {
    /// In-memory allocator over a CIDR
    Range {
        /// The range to allocate from (e.g., "10.0.0.0/24")
        cidr: IpNet,
    },

    /// Custom allocator
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl AllocatorConfig {
    /// Shorthand for a range allocator
    pub fn range(cidr: IpNet) -> Self {
        AllocatorConfig::Range { cidr }
    }

    /// Validate the allocator configuration for the slot it is placed in
    pub fn validate(&self, family: Family) -> Result<(), crate::Error> {
        match self {
            AllocatorConfig::Range { cidr } => {
                if Family::of(&cidr.network()) != family {
                    return Err(crate::Error::config(format!(
                        "{} range {} is not an {} network",
                        family.as_str(),
                        cidr,
                        family
                    )));
                }
                Ok(())
            }
            AllocatorConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom allocator factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom allocator config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the allocator type name
    pub fn type_name(&self) -> &str {
        match self {
            AllocatorConfig::Range { .. } => "range",
            AllocatorConfig::Custom { factory, .. } => factory,
        }
    }

    /// The configuration handed to the allocator factory
    pub fn factory_config(&self) -> serde_json::Value {
        match self {
            AllocatorConfig::Range { cidr } => serde_json::json!({ "cidr": cidr }),
            AllocatorConfig::Custom { config, .. } => config.clone(),
        }
    }
}

/// Lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Lease length used when a caller asks for an expiring allocation
    /// without choosing one (in milliseconds)
    ///
    /// Default: 10 minutes
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl ExpirationConfig {
    /// Default lease length as a duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Validate the lease configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.default_timeout_ms == 0 {
            return Err(crate::Error::config(
                "Expiration default timeout must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10 * 60 * 1000
}
