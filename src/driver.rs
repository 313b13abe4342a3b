//! Provider driver abstraction.
//!
//! Every cloud or virtualisation backend is exposed to the rest of the crate
//! as a [`Driver`]: a per-host object that declares its configuration
//! options, performs lifecycle actions against its backend, and can encode
//! its in-memory state so it can be rebuilt from the state store later.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binder::{Configuration, OptionValue};

/// Observed status of a host as reported by its driver.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Status {
    /// The driver cannot tell what the host is doing.
    #[default]
    Unknown,
    /// The host is booting.
    Starting,
    /// The host is up.
    Running,
    /// The host is suspended.
    Paused,
    /// The host is shutting down.
    Stopping,
    /// The host is powered off but still exists.
    Stopped,
    /// The backend reports the host as failed.
    Error,
    /// The backend did not answer in time.
    Timeout,
    /// The host does not exist on the backend.
    Missing,
}

impl Status {
    /// Returns the display label used in API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
            Self::Timeout => "Timeout",
            Self::Missing => "Missing",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle verbs accepted by the orchestrator.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Provision a new host.
    Create,
    /// Power the host on.
    Start,
    /// Shut the host down gracefully.
    Stop,
    /// Reboot the host.
    Restart,
    /// Power the host off without a graceful shutdown.
    Kill,
    /// Delete the host from its backend.
    Remove,
}

impl Action {
    /// Every action, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Create,
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::Kill,
        Self::Remove,
    ];

    /// Returns the label used in snapshot names and URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Kill => "kill",
            Self::Remove => "remove",
        }
    }

    /// Dispatches this action to the matching driver operation.
    pub fn dispatch<'a>(self, driver: &'a mut dyn Driver) -> DriverFuture<'a, ()> {
        match self {
            Self::Create => driver.create(),
            Self::Start => driver.start(),
            Self::Stop => driver.stop(),
            Self::Restart => driver.restart(),
            Self::Kill => driver.kill(),
            Self::Remove => driver.remove(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a string does not name a lifecycle action.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown lifecycle action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| UnknownAction(value.to_owned()))
    }
}

/// A configuration option declared by a driver.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OptionSpec {
    /// Option name as accepted in override maps.
    pub name: String,
    /// Value used when the caller does not override the option.
    pub default: OptionValue,
    /// One-line description for operators.
    pub description: String,
}

impl OptionSpec {
    /// Declares an option.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        default: impl Into<OptionValue>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            description: description.into(),
        }
    }
}

/// Errors raised by drivers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when the driver rejects a configuration.
    #[error("{0}")]
    InvalidConfig(String),
    /// Raised when the provider cannot perform an action at all.
    #[error("{provider} hosts cannot {action}")]
    Unsupported {
        /// Provider that rejected the action.
        provider: String,
        /// Rejected action.
        action: Action,
    },
    /// Raised when the driver state cannot be encoded.
    #[error("failed to encode driver state: {0}")]
    Encode(String),
    /// Raised when recorded state cannot be decoded into the driver.
    #[error("failed to decode driver state: {0}")]
    Decode(String),
    /// Wrapper for backend failures.
    #[error("{message}")]
    Provider {
        /// Message reported by the backend.
        message: String,
    },
}

/// Future returned by asynchronous driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Capability set implemented by every provider driver.
///
/// A driver instance represents exactly one host. Instances are rebuilt on
/// every request: the authoritative copy of their state is the latest
/// snapshot written by [`crate::state_store::StateStore`].
pub trait Driver: Send + Sync {
    /// Name of the provider implementing this driver.
    fn provider(&self) -> &str;

    /// Options accepted by [`Driver::apply_config`], in display order.
    fn declare_options(&self) -> Vec<OptionSpec>;

    /// Applies a merged configuration to a freshly constructed instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidConfig`] when a value is unusable.
    fn apply_config(&mut self, config: &Configuration) -> Result<(), DriverError>;

    /// Provisions the host.
    fn create(&mut self) -> DriverFuture<'_, ()>;

    /// Reports the current status of the host.
    fn query(&self) -> DriverFuture<'_, Status>;

    /// Powers the host on.
    fn start(&mut self) -> DriverFuture<'_, ()>;

    /// Shuts the host down.
    fn stop(&mut self) -> DriverFuture<'_, ()>;

    /// Reboots the host.
    fn restart(&mut self) -> DriverFuture<'_, ()>;

    /// Forces the host off.
    fn kill(&mut self) -> DriverFuture<'_, ()>;

    /// Deletes the host.
    fn remove(&mut self) -> DriverFuture<'_, ()>;

    /// Encodes the in-memory state for the snapshot log.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Encode`] when encoding fails.
    fn serialize_state(&self) -> Result<Vec<u8>, DriverError>;

    /// Replaces the in-memory state with a previously encoded one.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Decode`] when the bytes do not describe a valid
    /// state for this driver.
    fn restore_state(&mut self, state: &[u8]) -> Result<(), DriverError>;
}
