//! Core library for machinist, a host lifecycle manager.
//!
//! Provider drivers are looked up by name in a [`DriverRegistry`], bound to
//! declared option defaults merged with caller overrides, and driven
//! through create, start, stop, restart, kill, and remove by the
//! [`LifecycleOrchestrator`]. Every action leaves a snapshot of the driver's
//! state in an append-only [`StateStore`], from which later calls restore
//! the host. The same operations are served over HTTP by [`server`].

pub mod binder;
pub mod config;
pub mod driver;
pub mod drivers;
pub mod inventory;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod state_store;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;

pub use binder::{Configuration, InvalidConfig, OptionValue, Overrides};
pub use config::{ConfigError, ScalewayConfig, ServerConfig};
pub use driver::{Action, Driver, DriverError, DriverFuture, OptionSpec, Status, UnknownAction};
pub use drivers::{
    NONE_PROVIDER, NoneDriver, SCALEWAY_PROVIDER, ScalewayDriver, ScalewayDriverError,
    builtin_registry,
};
pub use inventory::Inventory;
pub use orchestrator::{HostStatus, LifecycleOrchestrator, OrchestratorError};
pub use registry::{
    DriverFactory, DriverRegistry, DriverRegistryBuilder, DuplicateProvider, UnknownProvider,
};
pub use server::{AppState, ServeError};
pub use state_store::{Snapshot, SnapshotLog, SnapshotRecord, StateStore, StateStoreError};
