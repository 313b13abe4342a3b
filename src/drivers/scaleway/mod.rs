//! Scaleway Instances driver.
//!
//! Each host maps to one Scaleway server named after the host. The server
//! identifier and the options the host was bound with are persisted in the
//! driver state; API credentials come from [`ScalewayConfig`] and are never
//! serialised.

mod error;
mod lifecycle;

use std::time::Duration;

use camino::Utf8Path;
use scaleway_rs::{ScalewayApi, ScalewayCreateInstanceBuilder, ScalewayError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binder::Configuration;
use crate::config::ScalewayConfig;
use crate::driver::{Driver, DriverError, DriverFuture, OptionSpec, Status};
use lifecycle::{ServerSnapshot, Target, Timing};

pub use error::ScalewayDriverError;

/// Provider name of the [`ScalewayDriver`].
pub const SCALEWAY_PROVIDER: &str = "scaleway";

/// Tag added to every server when the host declares no tags of its own.
pub const DEFAULT_TAG: &str = "machinist";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Persisted state of a [`ScalewayDriver`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ScalewayState {
    /// Host name, also used as the server name.
    pub host: String,
    /// Availability zone.
    pub zone: String,
    /// Commercial type of the server.
    pub instance_type: String,
    /// Image label resolved at creation time.
    pub image: String,
    /// CPU architecture used to pick the image.
    pub architecture: String,
    /// Project the server is billed to.
    pub project_id: String,
    /// Organisation used to scope image lookups.
    pub organization_id: Option<String>,
    /// Tags applied to the server.
    pub tags: Vec<String>,
    /// Server identifier once created.
    pub server_id: Option<String>,
    /// Public address reported by the provider.
    pub public_ip: Option<String>,
}

/// Driver provisioning hosts as Scaleway servers.
#[derive(Clone)]
pub struct ScalewayDriver {
    api: Result<ScalewayApi, ScalewayDriverError>,
    defaults: ScalewayConfig,
    state: ScalewayState,
    timing: Timing,
}

impl ScalewayDriver {
    /// Creates an uncreated driver for `host`.
    #[must_use]
    pub fn new(host: &str, config: ScalewayConfig) -> Self {
        let api = connect(&config);
        Self::with_api(host, config, api)
    }

    fn with_api(
        host: &str,
        config: ScalewayConfig,
        api: Result<ScalewayApi, ScalewayDriverError>,
    ) -> Self {
        Self {
            api,
            state: ScalewayState {
                host: host.to_owned(),
                organization_id: config.default_organization_id.clone(),
                ..ScalewayState::default()
            },
            defaults: config,
            timing: Timing {
                poll_interval: POLL_INTERVAL,
                wait_timeout: WAIT_TIMEOUT,
            },
        }
    }

    /// Returns a registry factory sharing one API client across drivers.
    pub fn factory(
        config: ScalewayConfig,
    ) -> impl Fn(&str, &Utf8Path) -> Box<dyn Driver> + Send + Sync + 'static {
        let api = connect(&config);
        move |host: &str, _store_root: &Utf8Path| -> Box<dyn Driver> {
            Box::new(Self::with_api(host, config.clone(), api.clone()))
        }
    }

    /// Current in-memory state.
    #[must_use]
    pub const fn state(&self) -> &ScalewayState {
        &self.state
    }

    fn api(&self) -> Result<&ScalewayApi, ScalewayDriverError> {
        self.api.as_ref().map_err(ScalewayDriverError::clone)
    }

    fn server_id(&self) -> Result<String, ScalewayDriverError> {
        self.state
            .server_id
            .clone()
            .ok_or_else(|| ScalewayDriverError::NotCreated {
                host: self.state.host.clone(),
            })
    }

    async fn fetch(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerSnapshot>, ScalewayDriverError> {
        lifecycle::fetch_server(self.api()?, &self.state.zone, server_id).await
    }

    async fn require_server(&self) -> Result<ServerSnapshot, ScalewayDriverError> {
        let server_id = self.server_id()?;
        self.fetch(&server_id)
            .await?
            .ok_or_else(|| ScalewayDriverError::ServerGone {
                server_id,
                zone: self.state.zone.clone(),
            })
    }

    async fn wait_for(
        &self,
        server_id: &str,
        target: Target,
    ) -> Result<Option<ServerSnapshot>, ScalewayDriverError> {
        lifecycle::wait_for(
            || self.fetch(server_id),
            target,
            self.timing,
            server_id,
            &self.state.zone,
        )
        .await
    }

    async fn perform(&self, server_id: &str, action: &str) -> Result<(), ScalewayDriverError> {
        debug!(server_id, action, "requesting server action");
        self.api()?
            .perform_instance_action_async(&self.state.zone, server_id, action)
            .await?;
        Ok(())
    }

    async fn provision(&mut self) -> Result<(), ScalewayDriverError> {
        if let Some(server_id) = self.state.server_id.clone() {
            return Err(ScalewayDriverError::AlreadyCreated {
                host: self.state.host.clone(),
                server_id,
            });
        }
        let api = self.api()?.clone();
        let image_id = lifecycle::resolve_image_id(&api, &self.state).await?;

        let server = match ScalewayCreateInstanceBuilder::new(
            api.clone(),
            &self.state.zone,
            &self.state.host,
            &self.state.instance_type,
        )
        .image(&image_id)
        .project(&self.state.project_id)
        .routed_ip_enabled(true)
        .tags(self.state.tags.clone())
        .run_async()
        .await
        {
            Ok(server) => ServerSnapshot::from(server),
            Err(ScalewayError::Api(api_err))
                if lifecycle::is_instance_type_error(&api_err, &self.state.instance_type) =>
            {
                return Err(ScalewayDriverError::InstanceTypeUnavailable {
                    instance_type: self.state.instance_type.clone(),
                    zone: self.state.zone.clone(),
                });
            }
            Err(other) => return Err(other.into()),
        };

        info!(server_id = %server.id, image_id = %image_id, "server created");
        self.state.server_id = Some(server.id.clone());
        self.state.public_ip.clone_from(&server.public_ip);
        lifecycle::power_on_if_needed(&api, &self.state.zone, &server).await
    }

    async fn power_on(&mut self) -> Result<(), ScalewayDriverError> {
        let server = self.require_server().await?;
        lifecycle::power_on_if_needed(self.api()?, &self.state.zone, &server).await?;
        if let Some(running) = self.wait_for(&server.id, Target::Running).await? {
            self.state.public_ip = running.public_ip;
        }
        Ok(())
    }

    async fn power_off(&self, wait: bool) -> Result<(), ScalewayDriverError> {
        let server = self.require_server().await?;
        if map_status(&server) == Status::Stopped {
            return Ok(());
        }
        self.perform(&server.id, "poweroff").await?;
        if wait {
            self.wait_for(&server.id, Target::Stopped).await?;
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<(), ScalewayDriverError> {
        let server = self.require_server().await?;
        self.perform(&server.id, "reboot").await
    }

    async fn teardown(&mut self) -> Result<(), ScalewayDriverError> {
        let Some(server_id) = self.state.server_id.clone() else {
            return Ok(());
        };
        match self.fetch(&server_id).await? {
            None => {}
            Some(server) if server.allows("terminate") => {
                self.perform(&server_id, "terminate").await?;
                self.wait_for(&server_id, Target::Gone).await?;
            }
            Some(_) => {
                self.api()?
                    .delete_instance_async(&self.state.zone, &server_id)
                    .await?;
                self.wait_for(&server_id, Target::Gone).await?;
            }
        }
        info!(server_id = %server_id, "server removed");
        self.state.server_id = None;
        self.state.public_ip = None;
        Ok(())
    }

    async fn observe(&self) -> Result<Status, ScalewayDriverError> {
        let Some(server_id) = self.state.server_id.as_deref() else {
            return Ok(Status::Missing);
        };
        Ok(self
            .fetch(server_id)
            .await?
            .map_or(Status::Missing, |server| map_status(&server)))
    }
}

fn connect(config: &ScalewayConfig) -> Result<ScalewayApi, ScalewayDriverError> {
    Ok(ScalewayApi::new(config.require_secret_key()?))
}

fn map_status(server: &ServerSnapshot) -> Status {
    lifecycle::map_state(&server.state)
}

fn required_option(
    config: &Configuration,
    name: &str,
    env_var: &str,
) -> Result<String, DriverError> {
    let value = config.string(name)?.unwrap_or_default().trim();
    if value.is_empty() {
        return Err(DriverError::InvalidConfig(format!(
            "option {name} must not be empty: pass it as an override or set {env_var}"
        )));
    }
    Ok(value.to_owned())
}

impl Driver for ScalewayDriver {
    fn provider(&self) -> &str {
        SCALEWAY_PROVIDER
    }

    fn declare_options(&self) -> Vec<OptionSpec> {
        let defaults = &self.defaults;
        vec![
            OptionSpec::new(
                "zone",
                defaults.default_zone.as_str(),
                "Availability zone, for example fr-par-1",
            ),
            OptionSpec::new(
                "instance_type",
                defaults.default_instance_type.as_str(),
                "Commercial type of the server",
            ),
            OptionSpec::new(
                "image",
                defaults.default_image.as_str(),
                "Image label resolved to the newest matching image",
            ),
            OptionSpec::new(
                "architecture",
                defaults.default_architecture.as_str(),
                "CPU architecture used to pick the image",
            ),
            OptionSpec::new(
                "project_id",
                defaults.default_project_id.as_str(),
                "Project the server is billed to",
            ),
            OptionSpec::new(
                "organization_id",
                defaults
                    .default_organization_id
                    .clone()
                    .unwrap_or_default(),
                "Organisation used to scope image lookups",
            ),
            OptionSpec::new(
                "tags",
                vec![String::from(DEFAULT_TAG)],
                "Tags applied to the server",
            ),
        ]
    }

    fn apply_config(&mut self, config: &Configuration) -> Result<(), DriverError> {
        if let Err(err) = &self.api {
            return Err(DriverError::InvalidConfig(err.to_string()));
        }
        self.state.zone = required_option(config, "zone", "SCW_DEFAULT_ZONE")?;
        self.state.instance_type =
            required_option(config, "instance_type", "SCW_DEFAULT_INSTANCE_TYPE")?;
        self.state.image = required_option(config, "image", "SCW_DEFAULT_IMAGE")?;
        self.state.architecture =
            required_option(config, "architecture", "SCW_DEFAULT_ARCHITECTURE")?;
        self.state.project_id = required_option(config, "project_id", "SCW_DEFAULT_PROJECT_ID")?;
        self.state.organization_id = config
            .string("organization_id")?
            .map(str::trim)
            .filter(|org| !org.is_empty())
            .map(str::to_owned);
        self.state.tags = config.list("tags")?.unwrap_or_default();
        Ok(())
    }

    fn create(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move { self.provision().await.map_err(DriverError::from) })
    }

    fn query(&self) -> DriverFuture<'_, Status> {
        Box::pin(async move { self.observe().await.map_err(DriverError::from) })
    }

    fn start(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move { self.power_on().await.map_err(DriverError::from) })
    }

    fn stop(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move { self.power_off(true).await.map_err(DriverError::from) })
    }

    fn restart(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move { self.reboot().await.map_err(DriverError::from) })
    }

    fn kill(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move { self.power_off(false).await.map_err(DriverError::from) })
    }

    fn remove(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(async move { self.teardown().await.map_err(DriverError::from) })
    }

    fn serialize_state(&self) -> Result<Vec<u8>, DriverError> {
        serde_json::to_vec(&self.state).map_err(|err| DriverError::Encode(err.to_string()))
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), DriverError> {
        self.state =
            serde_json::from_slice(state).map_err(|err| DriverError::Decode(err.to_string()))?;
        Ok(())
    }
}
