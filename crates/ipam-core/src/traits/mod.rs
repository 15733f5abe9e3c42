//! Core traits for the IPAM system
//!
//! This module defines the interfaces the coordinator consumes.
//!
//! - [`FamilyAllocator`]: Per-family address backend
//! - [`Blacklist`]: Addresses that must never be handed out

pub mod blacklist;
pub mod family_allocator;

pub use blacklist::Blacklist;
pub use family_allocator::{
    AllocationResult, Family, FamilyAllocator, FamilyAllocatorFactory, FamilyFilter, Metadata,
};
