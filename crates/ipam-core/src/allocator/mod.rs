// # Family Allocator Implementations
//
// This module provides implementations of the FamilyAllocator trait that
// ship with the crate.

pub mod range;

pub use range::{RangeAllocator, RangeAllocatorFactory};
