//! Built-in provider drivers.

pub mod none;
pub mod scaleway;

use crate::config::ScalewayConfig;
use crate::registry::{DriverRegistry, DuplicateProvider};

pub use none::{NONE_PROVIDER, NoneDriver};
pub use scaleway::{SCALEWAY_PROVIDER, ScalewayDriver, ScalewayDriverError};

/// Builds a registry holding every built-in driver.
///
/// # Errors
///
/// Returns [`DuplicateProvider`] if two built-in drivers share a name.
pub fn builtin_registry(scaleway: ScalewayConfig) -> Result<DriverRegistry, DuplicateProvider> {
    Ok(DriverRegistry::builder()
        .register(NoneDriver::factory())?
        .register(ScalewayDriver::factory(scaleway))?
        .build())
}
