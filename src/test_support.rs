//! Test support utilities shared across unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::binder::Configuration;
use crate::driver::{Action, Driver, DriverError, DriverFuture, OptionSpec, Status};
use crate::state_store::{Snapshot, SnapshotLog, SnapshotRecord, StateStoreError};

/// Provider name reported by [`ScriptedDriver`].
pub const SCRIPTED_PROVIDER: &str = "scripted";

type ActionHook = Arc<dyn Fn(&str, Action) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared script controlling every [`ScriptedDriver`] built from it.
///
/// Clones share state, so a test keeps one handle while the registry hands
/// out drivers built from another.
#[derive(Clone, Default)]
pub struct DriverScript {
    inner: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    failing_actions: Mutex<Vec<Action>>,
    rejected_config: Mutex<Option<String>>,
    fail_encode: AtomicBool,
    fail_query: AtomicBool,
    action_delay: Mutex<Duration>,
    applied: Mutex<Vec<Configuration>>,
    calls: Mutex<Vec<(String, Action)>>,
    hook: Mutex<Option<ActionHook>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl DriverScript {
    /// Creates a script where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given action fail with a provider error.
    pub fn fail_action(&self, action: Action) {
        lock(&self.inner.failing_actions).push(action);
    }

    /// Makes `apply_config` reject every configuration with `message`.
    pub fn reject_config(&self, message: &str) {
        *lock(&self.inner.rejected_config) = Some(message.to_owned());
    }

    /// Makes `serialize_state` fail.
    pub fn fail_encode(&self) {
        self.inner.fail_encode.store(true, Ordering::SeqCst);
    }

    /// Makes `query` fail.
    pub fn fail_query(&self) {
        self.inner.fail_query.store(true, Ordering::SeqCst);
    }

    /// Makes every action sleep before completing.
    pub fn delay_actions(&self, delay: Duration) {
        *lock(&self.inner.action_delay) = delay;
    }

    /// Registers a callback invoked with `(host, action)` after each action
    /// body runs, whether or not it failed.
    pub fn on_action(&self, hook: impl Fn(&str, Action) + Send + Sync + 'static) {
        *lock(&self.inner.hook) = Some(Arc::new(hook));
    }

    /// Configurations applied so far, oldest first.
    #[must_use]
    pub fn applied_configs(&self) -> Vec<Configuration> {
        lock(&self.inner.applied).clone()
    }

    /// Actions dispatched so far as `(host, action)` pairs.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Action)> {
        lock(&self.inner.calls).clone()
    }

    /// Highest number of actions observed running at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Persisted state of a [`ScriptedDriver`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ScriptedState {
    /// Host name the driver manages.
    pub host: String,
    /// Configured region.
    pub region: String,
    /// Configured size.
    pub size: i64,
    /// Configured tags.
    pub tags: Vec<String>,
    /// Status the driver reports.
    pub status: Status,
}

/// In-memory driver whose behaviour is controlled by a [`DriverScript`].
pub struct ScriptedDriver {
    state: ScriptedState,
    script: DriverScript,
}

impl ScriptedDriver {
    /// Creates a driver for `host`.
    #[must_use]
    pub fn new(host: &str, script: DriverScript) -> Self {
        Self {
            state: ScriptedState {
                host: host.to_owned(),
                region: String::from("test-1"),
                size: 1,
                tags: Vec::new(),
                status: Status::Missing,
            },
            script,
        }
    }

    /// Returns a registry factory producing drivers bound to `script`.
    pub fn factory(
        script: DriverScript,
    ) -> impl Fn(&str, &Utf8Path) -> Box<dyn Driver> + Send + Sync + 'static {
        move |host: &str, _store_root: &Utf8Path| -> Box<dyn Driver> {
            Box::new(Self::new(host, script.clone()))
        }
    }

    /// Current in-memory state.
    #[must_use]
    pub const fn state(&self) -> &ScriptedState {
        &self.state
    }

    fn perform(&mut self, action: Action, next: Status) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let inner = Arc::clone(&self.script.inner);
            let running = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            inner.max_in_flight.fetch_max(running, Ordering::SeqCst);
            lock(&inner.calls).push((self.state.host.clone(), action));

            let delay = *lock(&inner.action_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let failed = lock(&inner.failing_actions).contains(&action);
            if !failed {
                self.state.status = next;
            }
            let hook = lock(&inner.hook).clone();
            if let Some(callback) = hook {
                callback(&self.state.host, action);
            }
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);

            if failed {
                Err(DriverError::Provider {
                    message: format!("scripted failure: {action}"),
                })
            } else {
                Ok(())
            }
        })
    }
}

impl Driver for ScriptedDriver {
    fn provider(&self) -> &str {
        SCRIPTED_PROVIDER
    }

    fn declare_options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::new("region", "test-1", "Region to place the host in"),
            OptionSpec::new("size", 1_i64, "Number of scripted CPUs"),
            OptionSpec::new("tags", Vec::<String>::new(), "Labels for the host"),
        ]
    }

    fn apply_config(&mut self, config: &Configuration) -> Result<(), DriverError> {
        lock(&self.script.inner.applied).push(config.clone());
        if let Some(message) = lock(&self.script.inner.rejected_config).clone() {
            return Err(DriverError::InvalidConfig(message));
        }

        let size = config.integer("size")?.unwrap_or(1);
        if size < 1 {
            return Err(DriverError::InvalidConfig(format!(
                "size must be at least 1, got {size}"
            )));
        }
        self.state.size = size;
        if let Some(region) = config.string("region")? {
            region.clone_into(&mut self.state.region);
        }
        self.state.tags = config.list("tags")?.unwrap_or_default();
        Ok(())
    }

    fn create(&mut self) -> DriverFuture<'_, ()> {
        self.perform(Action::Create, Status::Running)
    }

    fn query(&self) -> DriverFuture<'_, Status> {
        Box::pin(async move {
            if self.script.inner.fail_query.load(Ordering::SeqCst) {
                return Err(DriverError::Provider {
                    message: String::from("scripted query failure"),
                });
            }
            Ok(self.state.status)
        })
    }

    fn start(&mut self) -> DriverFuture<'_, ()> {
        self.perform(Action::Start, Status::Running)
    }

    fn stop(&mut self) -> DriverFuture<'_, ()> {
        self.perform(Action::Stop, Status::Stopped)
    }

    fn restart(&mut self) -> DriverFuture<'_, ()> {
        self.perform(Action::Restart, Status::Running)
    }

    fn kill(&mut self) -> DriverFuture<'_, ()> {
        self.perform(Action::Kill, Status::Stopped)
    }

    fn remove(&mut self) -> DriverFuture<'_, ()> {
        self.perform(Action::Remove, Status::Missing)
    }

    fn serialize_state(&self) -> Result<Vec<u8>, DriverError> {
        if self.script.inner.fail_encode.load(Ordering::SeqCst) {
            return Err(DriverError::Encode(String::from("scripted encode failure")));
        }
        serde_json::to_vec(&self.state).map_err(|err| DriverError::Encode(err.to_string()))
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), DriverError> {
        self.state =
            serde_json::from_slice(state).map_err(|err| DriverError::Decode(err.to_string()))?;
        Ok(())
    }
}

/// Snapshot log wrapper that fails on demand.
#[derive(Clone, Debug)]
pub struct FlakySnapshotLog<S> {
    inner: S,
    fail_appends: Arc<AtomicBool>,
    fail_loads: Arc<AtomicBool>,
}

impl<S: SnapshotLog> FlakySnapshotLog<S> {
    /// Wraps `inner`; every call is forwarded until a failure is armed.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_appends: Arc::new(AtomicBool::new(false)),
            fail_loads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes subsequent appends fail.
    pub fn fail_appends(&self) {
        self.fail_appends.store(true, Ordering::SeqCst);
    }

    /// Makes subsequent loads fail.
    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }

    /// The wrapped log.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

fn injected(operation: &str) -> StateStoreError {
    StateStoreError::Io {
        path: camino::Utf8PathBuf::from("<injected>"),
        message: format!("injected {operation} failure"),
    }
}

impl<S: SnapshotLog> SnapshotLog for FlakySnapshotLog<S> {
    fn append(
        &self,
        provider: &str,
        host: &str,
        action: Action,
        state: &[u8],
    ) -> Result<SnapshotRecord, StateStoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(injected("append"));
        }
        self.inner.append(provider, host, action, state)
    }

    fn load_latest(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<Option<Snapshot>, StateStoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(injected("load"));
        }
        self.inner.load_latest(provider, host)
    }
}
