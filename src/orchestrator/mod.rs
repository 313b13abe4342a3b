//! Sequences lifecycle actions against provider drivers.
//!
//! Each call rebuilds the host's driver from the snapshot log (or binds a
//! fresh one when the host has no history), runs one action, records the
//! resulting driver state, and reports the status the driver observes
//! afterwards. Nothing is cached between calls; the snapshot log is the only
//! source of truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8PathBuf;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::binder::{self, Overrides};
use crate::driver::{Action, Driver, DriverError, OptionSpec, Status, UnknownAction};
use crate::registry::{DriverRegistry, UnknownProvider};
use crate::state_store::{SnapshotLog, StateStore, StateStoreError, validate_name};

/// Errors surfaced by lifecycle operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// Raised when no driver is registered for the provider.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    /// Raised when the action is not a lifecycle verb.
    #[error("unknown lifecycle action: {0}")]
    InvalidAction(String),
    /// Raised when the driver rejects the merged configuration.
    #[error("invalid configuration for {provider}: {message}")]
    InvalidConfig {
        /// Provider whose driver rejected the configuration.
        provider: String,
        /// The driver's message, unmodified.
        message: String,
    },
    /// Raised when a provider or host name cannot be stored safely.
    #[error("{0}")]
    InvalidName(String),
    /// Raised when a host has no recorded state.
    #[error("no recorded state for host {host} of provider {provider}")]
    HostNotFound {
        /// Provider queried.
        provider: String,
        /// Host queried.
        host: String,
    },
    /// Raised when the driver or its backend fails an operation.
    #[error("{operation} failed for host {host}: {source}")]
    Provider {
        /// Operation that failed (an action label or `query`).
        operation: String,
        /// Host the operation targeted.
        host: String,
        /// Error reported by the driver.
        #[source]
        source: DriverError,
    },
    /// Raised when recorded state cannot be read, decoded, encoded, or
    /// written. The host's durable state is whatever the last successful
    /// snapshot says, regardless of what the backend did.
    #[error("failed to persist state for host {host}: {message}")]
    PersistenceFailure {
        /// Host whose state could not be persisted.
        host: String,
        /// Human-readable description of the failure.
        message: String,
    },
}

impl From<UnknownProvider> for OrchestratorError {
    fn from(value: UnknownProvider) -> Self {
        Self::UnknownProvider(value.0)
    }
}

impl From<UnknownAction> for OrchestratorError {
    fn from(value: UnknownAction) -> Self {
        Self::InvalidAction(value.0)
    }
}

impl OrchestratorError {
    fn persistence(host: &str, err: &impl std::fmt::Display) -> Self {
        Self::PersistenceFailure {
            host: host.to_owned(),
            message: err.to_string(),
        }
    }

    fn store(host: &str, err: StateStoreError) -> Self {
        match err {
            StateStoreError::InvalidName { .. } => Self::InvalidName(err.to_string()),
            StateStoreError::Io { .. } => Self::persistence(host, &err),
        }
    }
}

/// Result of a lifecycle operation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HostStatus {
    /// Host the operation targeted.
    #[serde(rename = "name")]
    pub host: String,
    /// Status reported by the driver after the operation.
    #[serde(rename = "state")]
    pub status: Status,
}

type HostKey = (String, String);

/// Serialises work per `(provider, host)` while letting different hosts
/// proceed in parallel.
#[derive(Debug, Default)]
struct HostLocks {
    slots: Mutex<HashMap<HostKey, Arc<AsyncMutex<()>>>>,
}

impl HostLocks {
    async fn acquire(&self, provider: &str, host: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slots
                    .entry((provider.to_owned(), host.to_owned()))
                    .or_default(),
            )
        };
        slot.lock_owned().await
    }
}

/// Runs lifecycle actions and records their outcome.
#[derive(Debug)]
pub struct LifecycleOrchestrator<L = StateStore> {
    registry: Arc<DriverRegistry>,
    log: L,
    store_root: Utf8PathBuf,
    locks: HostLocks,
}

impl LifecycleOrchestrator<StateStore> {
    /// Creates an orchestrator persisting to `store`.
    #[must_use]
    pub fn with_store(registry: Arc<DriverRegistry>, store: StateStore) -> Self {
        let store_root = store.root().to_path_buf();
        Self::new(registry, store, store_root)
    }
}

impl<L: SnapshotLog> LifecycleOrchestrator<L> {
    /// Creates an orchestrator over an arbitrary snapshot log.
    ///
    /// `store_root` is the directory whose per-provider subdirectories are
    /// handed to driver factories.
    #[must_use]
    pub fn new(
        registry: Arc<DriverRegistry>,
        log: L,
        store_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            registry,
            log,
            store_root: store_root.into(),
            locks: HostLocks::default(),
        }
    }

    /// The registry drivers are constructed from.
    #[must_use]
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// The snapshot log in use.
    #[must_use]
    pub const fn log(&self) -> &L {
        &self.log
    }

    /// Registered provider names.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.registry.providers()
    }

    /// Options accepted by a provider, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownProvider`] for unregistered names.
    pub fn describe(&self, provider: &str) -> Result<Vec<OptionSpec>, OrchestratorError> {
        Ok(self.registry.describe(provider)?)
    }

    /// Parses `action` and runs it against the host.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidAction`] before touching any
    /// driver when `action` is not a lifecycle verb; otherwise see
    /// [`LifecycleOrchestrator::execute_action`].
    pub async fn execute(
        &self,
        provider: &str,
        host: &str,
        action: &str,
        overrides: &Overrides,
    ) -> Result<HostStatus, OrchestratorError> {
        let parsed: Action = action.parse()?;
        self.execute_action(provider, host, parsed, overrides).await
    }

    /// Runs one lifecycle action against the host and records the outcome.
    ///
    /// The driver is restored from the latest snapshot when one exists.
    /// Otherwise a fresh driver is bound to the provider's defaults merged
    /// with `overrides`; overrides are ignored for restored hosts. A snapshot
    /// is appended whether or not the action succeeds.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::UnknownProvider`] when the provider is not
    ///   registered; nothing is recorded.
    /// - [`OrchestratorError::InvalidConfig`] when a fresh driver rejects its
    ///   configuration; nothing is recorded.
    /// - [`OrchestratorError::PersistenceFailure`] when the snapshot cannot
    ///   be loaded, restored, encoded, or appended. This takes precedence
    ///   over the action's own outcome.
    /// - [`OrchestratorError::Provider`] when the action or the follow-up
    ///   status query fails.
    pub async fn execute_action(
        &self,
        provider: &str,
        host: &str,
        action: Action,
        overrides: &Overrides,
    ) -> Result<HostStatus, OrchestratorError> {
        self.check_target(provider, host)?;

        let span = info_span!("execute", provider, host, action = %action);
        async move {
            let _guard = self.locks.acquire(provider, host).await;

            let mut driver = match self.restore(provider, host)? {
                Some(driver) => driver,
                None => self.bind_fresh(provider, host, overrides)?,
            };

            let outcome = action.dispatch(driver.as_mut()).await;
            if let Err(err) = &outcome {
                warn!(error = %err, "driver action failed");
            }

            self.record(provider, host, action, driver.as_ref())?;

            outcome.map_err(|source| OrchestratorError::Provider {
                operation: action.to_string(),
                host: host.to_owned(),
                source,
            })?;

            let status = query(driver.as_ref(), host).await?;
            info!(%status, "action recorded");
            Ok(HostStatus {
                host: host.to_owned(),
                status,
            })
        }
        .instrument(span)
        .await
    }

    /// Reports the status of a recorded host without changing it.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::HostNotFound`] when the host has no
    /// snapshot, [`OrchestratorError::PersistenceFailure`] when the snapshot
    /// cannot be restored, and [`OrchestratorError::Provider`] when the
    /// status query fails.
    pub async fn inspect(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<HostStatus, OrchestratorError> {
        self.check_target(provider, host)?;

        let _guard = self.locks.acquire(provider, host).await;
        let driver = self.restore(provider, host)?.ok_or_else(|| {
            OrchestratorError::HostNotFound {
                provider: provider.to_owned(),
                host: host.to_owned(),
            }
        })?;
        let status = query(driver.as_ref(), host).await?;
        Ok(HostStatus {
            host: host.to_owned(),
            status,
        })
    }

    fn check_target(&self, provider: &str, host: &str) -> Result<(), OrchestratorError> {
        validate_name("provider", provider)
            .and_then(|()| validate_name("host", host))
            .map_err(|err| OrchestratorError::store(host, err))?;
        if !self.registry.contains(provider) {
            return Err(OrchestratorError::UnknownProvider(provider.to_owned()));
        }
        Ok(())
    }

    fn construct(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<Box<dyn Driver>, OrchestratorError> {
        Ok(self
            .registry
            .construct(provider, host, &self.store_root.join(provider))?)
    }

    fn restore(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<Option<Box<dyn Driver>>, OrchestratorError> {
        let latest = self.log.load_latest(provider, host).map_err(|err| {
            error!(error = %err, "failed to load latest snapshot");
            OrchestratorError::store(host, err)
        })?;
        let Some(snapshot) = latest else {
            return Ok(None);
        };

        let mut driver = self.construct(provider, host)?;
        driver.restore_state(&snapshot.state).map_err(|err| {
            error!(error = %err, timestamp = snapshot.timestamp, "recorded state is unreadable");
            OrchestratorError::persistence(host, &err)
        })?;
        debug!(
            previous_action = %snapshot.action,
            timestamp = snapshot.timestamp,
            "driver restored from snapshot"
        );
        Ok(Some(driver))
    }

    fn bind_fresh(
        &self,
        provider: &str,
        host: &str,
        overrides: &Overrides,
    ) -> Result<Box<dyn Driver>, OrchestratorError> {
        let mut driver = self.construct(provider, host)?;
        let config = binder::bind(driver.as_mut(), overrides).map_err(|err| {
            OrchestratorError::InvalidConfig {
                provider: provider.to_owned(),
                message: err.0,
            }
        })?;
        debug!(options = config.len(), "fresh driver bound");
        Ok(driver)
    }

    fn record(
        &self,
        provider: &str,
        host: &str,
        action: Action,
        driver: &dyn Driver,
    ) -> Result<(), OrchestratorError> {
        let state = driver.serialize_state().map_err(|err| {
            error!(error = %err, "failed to encode driver state");
            OrchestratorError::persistence(host, &err)
        })?;
        self.log
            .append(provider, host, action, &state)
            .map_err(|err| {
                error!(error = %err, "failed to append snapshot");
                OrchestratorError::store(host, err)
            })?;
        Ok(())
    }
}

async fn query(driver: &dyn Driver, host: &str) -> Result<Status, OrchestratorError> {
    driver
        .query()
        .await
        .map_err(|source| OrchestratorError::Provider {
            operation: String::from("query"),
            host: host.to_owned(),
            source,
        })
}
