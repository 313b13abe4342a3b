//! Error types for the Scaleway driver.

use scaleway_rs::ScalewayError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::DriverError;

/// Errors raised while talking to the Scaleway Instances API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayDriverError {
    /// Raised when API credentials are missing from process configuration.
    #[error("{0}")]
    Credentials(String),
    /// Raised when an action needs a server but none was created.
    #[error("host {host} has no Scaleway server; create it first")]
    NotCreated {
        /// Host name.
        host: String,
    },
    /// Raised when `create` is called for a host that already has a server.
    #[error("host {host} already has Scaleway server {server_id}")]
    AlreadyCreated {
        /// Host name.
        host: String,
        /// Existing server identifier.
        server_id: String,
    },
    /// Raised when a recorded server no longer exists on the provider.
    #[error("server {server_id} no longer exists in zone {zone}")]
    ServerGone {
        /// Provider server identifier.
        server_id: String,
        /// Zone the server lived in.
        zone: String,
    },
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not available in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when a server cannot be powered on from its current state.
    #[error("server {server_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Provider server identifier.
        server_id: String,
        /// Current state reported by the provider.
        state: String,
    },
    /// Raised when a server does not reach the expected state in time.
    #[error("timeout waiting for {action} on server {server_id}")]
    Timeout {
        /// What was being waited on.
        action: String,
        /// Provider server identifier.
        server_id: String,
    },
    /// Raised when teardown leaves a server visible in the API.
    #[error("server {server_id} still present after removal")]
    ResidualResource {
        /// Provider server identifier.
        server_id: String,
    },
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Api {
        /// Message returned by the provider SDK.
        message: String,
    },
}

impl From<ScalewayError> for ScalewayDriverError {
    fn from(value: ScalewayError) -> Self {
        Self::Api {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayDriverError {
    fn from(value: ConfigError) -> Self {
        Self::Credentials(value.to_string())
    }
}

impl From<ScalewayDriverError> for DriverError {
    fn from(value: ScalewayDriverError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}
