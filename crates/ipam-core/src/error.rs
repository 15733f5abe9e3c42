//! Error types for the IPAM system
//!
//! This module defines all error types used throughout the crate.
//! Errors produced by a family allocator travel through the coordinator
//! unchanged, so callers can match on the backend's own variants.

use std::net::IpAddr;

use thiserror::Error;

use crate::traits::Family;

/// Result type alias for IPAM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the IPAM system
#[derive(Error, Debug)]
pub enum Error {
    /// No allocator is configured for the address family
    #[error("{0} allocation disabled")]
    FamilyDisabled(Family),

    /// The family was requested for next-address allocation but has no allocator
    #[error("{0} allocator not available")]
    FamilyUnavailable(Family),

    /// Family tag could not be parsed
    #[error("unknown address family \"{0}\" requested")]
    UnknownFamily(String),

    /// Address is on the blacklist and must never be handed out
    #[error("IP {ip} is blacklisted, owned by {owner}")]
    Blacklisted {
        /// The rejected address
        ip: IpAddr,
        /// Owner that requested it
        owner: String,
    },

    /// An expiration timer already exists for the address
    #[error("expiration timer already registered for {0}")]
    TimerAlreadyRegistered(IpAddr),

    /// No expiration timer exists for the address
    #[error("no expiration timer registered for {0}")]
    TimerNotRegistered(IpAddr),

    /// The presented token does not belong to the current timer
    #[error("token mismatch, not stopping expiration timer for {0}")]
    TokenMismatch(IpAddr),

    /// Neither an address nor an owner with allocations
    #[error("invalid IP address or owner name: {0}")]
    NotFound(String),

    /// Address outside the allocator's range
    #[error("address {ip} not in range {range}")]
    AddressNotInRange {
        /// The requested address
        ip: IpAddr,
        /// The allocator's range
        range: String,
    },

    /// Address is already allocated at the backend
    #[error("address {0} already allocated")]
    AlreadyAllocated(IpAddr),

    /// Address is not allocated at the backend
    #[error("address {0} is not allocated")]
    NotAllocated(IpAddr),

    /// Backend has no free address left
    #[error("no more addresses available in {0}")]
    PoolExhausted(String),

    /// Allocator-specific error
    #[error("allocator error ({allocator}): {message}")]
    Allocator {
        /// Allocator name
        allocator: String,
        /// Error message
        message: String,
    },

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a blacklist rejection
    pub fn blacklisted(ip: IpAddr, owner: impl Into<String>) -> Self {
        Self::Blacklisted {
            ip,
            owner: owner.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an allocator-specific error
    pub fn allocator(allocator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Allocator {
            allocator: allocator.into(),
            message: message.into(),
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
