//! Registry of provider drivers.
//!
//! The registry is assembled once at startup and is read-only afterwards.
//! It is shared behind an [`Arc`] rather than living in a global so tests can
//! build registries holding only the drivers they need.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use thiserror::Error;

use crate::driver::{Driver, OptionSpec};

/// Builds a fresh, unconfigured driver for `(host, store_root)`.
pub type DriverFactory = Arc<dyn Fn(&str, &Utf8Path) -> Box<dyn Driver> + Send + Sync>;

/// Raised when no driver is registered under a provider name.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

/// Raised when two factories claim the same provider name.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("provider {0} is registered twice")]
pub struct DuplicateProvider(pub String);

/// Collects factories before freezing them into a [`DriverRegistry`].
#[derive(Clone, Default)]
pub struct DriverRegistryBuilder {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under the provider name its drivers report.
    ///
    /// The factory is invoked once with an empty host name to learn that
    /// name, so the registry key always matches [`Driver::provider`].
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateProvider`] when the name is already taken.
    pub fn register<F>(mut self, factory: F) -> Result<Self, DuplicateProvider>
    where
        F: Fn(&str, &Utf8Path) -> Box<dyn Driver> + Send + Sync + 'static,
    {
        let name = factory("", Utf8Path::new("")).provider().to_owned();
        if self.factories.contains_key(&name) {
            return Err(DuplicateProvider(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> DriverRegistry {
        DriverRegistry {
            factories: self.factories,
        }
    }
}

/// Immutable map from provider name to driver factory.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Starts a registry builder.
    #[must_use]
    pub fn builder() -> DriverRegistryBuilder {
        DriverRegistryBuilder::new()
    }

    /// Registered provider names in sorted order.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Returns `true` when the provider is registered.
    #[must_use]
    pub fn contains(&self, provider: &str) -> bool {
        self.factories.contains_key(provider)
    }

    /// Constructs a default-configured driver that has not been created yet.
    /// No backend I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownProvider`] for unregistered names.
    pub fn construct(
        &self,
        provider: &str,
        host: &str,
        store_root: &Utf8Path,
    ) -> Result<Box<dyn Driver>, UnknownProvider> {
        let factory = self
            .factories
            .get(provider)
            .ok_or_else(|| UnknownProvider(provider.to_owned()))?;
        Ok(factory(host, store_root))
    }

    /// Options a provider's drivers accept, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownProvider`] for unregistered names.
    pub fn describe(&self, provider: &str) -> Result<Vec<OptionSpec>, UnknownProvider> {
        Ok(self
            .construct(provider, "", Utf8Path::new(""))?
            .declare_options())
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
