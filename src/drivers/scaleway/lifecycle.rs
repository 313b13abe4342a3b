//! Server lookup, image resolution, and wait loops for the Scaleway driver.

use std::future::Future;
use std::time::{Duration, Instant};

use scaleway_rs::{
    ScalewayApi, ScalewayApiError, ScalewayImage, ScalewayInstance,
    ScalewayListInstanceImagesBuilder,
};
use tokio::time::sleep;

use crate::driver::Status;

use super::{ScalewayDriverError, ScalewayState};

/// Fields of a server the driver cares about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct ServerSnapshot {
    pub(super) id: String,
    pub(super) state: String,
    pub(super) allowed_actions: Vec<String>,
    pub(super) public_ip: Option<String>,
}

impl ServerSnapshot {
    pub(super) fn allows(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|allowed| allowed == action)
    }
}

impl From<ScalewayInstance> for ServerSnapshot {
    fn from(server: ScalewayInstance) -> Self {
        Self {
            id: server.id,
            state: server.state,
            allowed_actions: server.allowed_actions,
            public_ip: server.public_ip.map(|ip| ip.address),
        }
    }
}

/// Maps a Scaleway server state onto the driver status vocabulary.
pub(super) fn map_state(state: &str) -> Status {
    match state {
        "running" => Status::Running,
        "starting" => Status::Starting,
        "stopping" => Status::Stopping,
        "stopped" | "stopped in place" => Status::Stopped,
        "locked" => Status::Error,
        _ => Status::Unknown,
    }
}

/// State a wait loop polls for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Target {
    Running,
    Stopped,
    Gone,
}

impl Target {
    const fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Gone => "removal",
        }
    }

    fn reached(self, server: Option<&ServerSnapshot>) -> bool {
        match (self, server) {
            (Self::Gone, None) => true,
            (Self::Running, Some(found)) => map_state(&found.state) == Status::Running,
            (Self::Stopped, Some(found)) => map_state(&found.state) == Status::Stopped,
            _ => false,
        }
    }
}

/// Poll cadence and overall deadline for wait loops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct Timing {
    pub(super) poll_interval: Duration,
    pub(super) wait_timeout: Duration,
}

pub(super) async fn fetch_server(
    api: &ScalewayApi,
    zone: &str,
    server_id: &str,
) -> Result<Option<ServerSnapshot>, ScalewayDriverError> {
    let mut servers = api
        .list_instances(zone)
        .servers(server_id)
        .per_page(1)
        .run_async()
        .await?;
    Ok(servers.pop().map(ServerSnapshot::from))
}

/// Polls `fetch` until the server reaches `target`, returning the last
/// snapshot seen.
pub(super) async fn wait_for<F, Fut>(
    mut fetch: F,
    target: Target,
    timing: Timing,
    server_id: &str,
    zone: &str,
) -> Result<Option<ServerSnapshot>, ScalewayDriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<ServerSnapshot>, ScalewayDriverError>>,
{
    let deadline = Instant::now() + timing.wait_timeout;
    while Instant::now() <= deadline {
        let server = fetch().await?;
        if target.reached(server.as_ref()) {
            return Ok(server);
        }
        if server.is_none() {
            return Err(ScalewayDriverError::ServerGone {
                server_id: server_id.to_owned(),
                zone: zone.to_owned(),
            });
        }
        sleep(timing.poll_interval).await;
    }

    if target == Target::Gone {
        return Err(ScalewayDriverError::ResidualResource {
            server_id: server_id.to_owned(),
        });
    }
    Err(ScalewayDriverError::Timeout {
        action: target.label().to_owned(),
        server_id: server_id.to_owned(),
    })
}

pub(super) async fn power_on_if_needed(
    api: &ScalewayApi,
    zone: &str,
    server: &ServerSnapshot,
) -> Result<(), ScalewayDriverError> {
    if map_state(&server.state) == Status::Running {
        return Ok(());
    }

    if server.allows("poweron") {
        api.perform_instance_action_async(zone, &server.id, "poweron")
            .await?;
        return Ok(());
    }

    Err(ScalewayDriverError::PowerOnNotAllowed {
        server_id: server.id.clone(),
        state: server.state.clone(),
    })
}

pub(super) fn is_instance_type_error(api_err: &ScalewayApiError, instance_type: &str) -> bool {
    matches!(api_err.resource.as_deref(), Some("commercial_type"))
        || api_err
            .resource_id
            .as_deref()
            .is_some_and(|id| id == instance_type)
        || (api_err.etype == "invalid_arguments"
            && api_err
                .message
                .to_ascii_lowercase()
                .contains("commercial_type"))
}

pub(super) async fn resolve_image_id(
    api: &ScalewayApi,
    state: &ScalewayState,
) -> Result<String, ScalewayDriverError> {
    resolve_image_id_with(
        state,
        || async move {
            if state.project_id.is_empty() {
                Ok(Vec::new())
            } else {
                let mut scoped = ScalewayListInstanceImagesBuilder::new(api.clone(), &state.zone)
                    .public(true)
                    .project(&state.project_id)
                    .name(&state.image)
                    .arch(&state.architecture);
                if let Some(org) = &state.organization_id {
                    scoped = scoped.organization(org);
                }
                scoped.run_async().await.map_err(ScalewayDriverError::from)
            }
        },
        || async move {
            ScalewayListInstanceImagesBuilder::new(api.clone(), &state.zone)
                .public(true)
                .name(&state.image)
                .arch(&state.architecture)
                .run_async()
                .await
                .map_err(ScalewayDriverError::from)
        },
    )
    .await
}

/// Prefers project-scoped images and falls back to public ones.
pub(super) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
    state: &ScalewayState,
    project_fetch: FetchA,
    public_fetch: FetchB,
) -> Result<String, ScalewayDriverError>
where
    FetchA: FnOnce() -> FutA,
    FetchB: FnOnce() -> FutB,
    FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayDriverError>>,
    FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayDriverError>>,
{
    let project_images = project_fetch().await?;
    let candidates = if project_images.is_empty() {
        public_fetch().await?
    } else {
        project_images
    };
    select_image_id(candidates, state)
}

/// Picks the newest available image matching the requested architecture.
pub(super) fn select_image_id(
    images: Vec<ScalewayImage>,
    state: &ScalewayState,
) -> Result<String, ScalewayDriverError> {
    images
        .into_iter()
        .filter(|image| image.arch == state.architecture && image.state == "available")
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
        .ok_or_else(|| ScalewayDriverError::ImageNotFound {
            label: state.image.clone(),
            arch: state.architecture.clone(),
            zone: state.zone.clone(),
        })
}
