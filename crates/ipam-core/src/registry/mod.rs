//! Plugin-based allocator registry
//!
//! The registry allows family allocator backends to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ipam_core::registry::AllocatorRegistry;
//! use ipam_core::config::AllocatorConfig;
//! use ipam_core::traits::Family;
//!
//! // Built-in "range" allocator is already registered
//! let registry = AllocatorRegistry::new();
//!
//! // Register a cloud-backed allocator
//! registry.register_allocator("eni", Box::new(EniFactory::new(client)));
//!
//! // Create an allocator from config
//! let config = AllocatorConfig::range("10.0.0.0/24".parse()?);
//! let allocator = registry.create_allocator(Family::IPv4, &config)?;
//! ```

use crate::allocator::RangeAllocatorFactory;
use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use crate::traits::{Family, FamilyAllocator, FamilyAllocatorFactory};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Allocator registry for plugin-based backend creation
///
/// The registry maintains a map of allocator type names to factory objects,
/// allowing dynamic instantiation of family allocators based on configuration.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
pub struct AllocatorRegistry {
    /// Registered family allocator factories
    allocators: RwLock<HashMap<String, Box<dyn FamilyAllocatorFactory>>>,
}

impl AllocatorRegistry {
    /// Create a registry with the built-in allocators registered
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_allocator("range", Box::new(RangeAllocatorFactory));
        registry
    }

    /// Create a registry with nothing registered
    pub fn empty() -> Self {
        Self {
            allocators: RwLock::new(HashMap::new()),
        }
    }

    /// Register a family allocator factory
    ///
    /// Registering a name twice replaces the earlier factory.
    ///
    /// # Parameters
    ///
    /// - `name`: Allocator type name (e.g., "range", "eni", "cluster-pool")
    /// - `factory`: Factory object for creating allocator instances
    pub fn register_allocator(
        &self,
        name: impl Into<String>,
        factory: Box<dyn FamilyAllocatorFactory>,
    ) {
        let name = name.into();
        let mut allocators = self
            .allocators
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        allocators.insert(name, factory);
    }

    /// Create a family allocator from configuration
    ///
    /// # Parameters
    ///
    /// - `family`: The family slot the allocator will serve
    /// - `config`: Allocator configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn FamilyAllocator>)`: Created allocator instance
    /// - `Err(Error)`: If the allocator type is not registered or creation fails
    pub fn create_allocator(
        &self,
        family: Family,
        config: &AllocatorConfig,
    ) -> Result<Box<dyn FamilyAllocator>> {
        config.validate(family)?;

        let allocator_type = config.type_name();
        let allocators = self
            .allocators
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = allocators
            .get(allocator_type)
            .ok_or_else(|| Error::config(format!("Unknown allocator type: {}", allocator_type)))?;

        factory.create(family, &config.factory_config())
    }

    /// List all registered allocator types
    pub fn list_allocators(&self) -> Vec<String> {
        let allocators = self
            .allocators
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        allocators.keys().cloned().collect()
    }

    /// Check if an allocator type is registered
    pub fn has_allocator(&self, name: &str) -> bool {
        let allocators = self
            .allocators
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        allocators.contains_key(name)
    }
}

impl Default for AllocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
