//! HTTP API over the lifecycle orchestrator and inventory.
//!
//! | Method | Path | Operation |
//! | --- | --- | --- |
//! | GET | `/info` | service name and version |
//! | GET | `/v1/driver` | registered providers |
//! | GET | `/v1/driver/:driver/options` | declared options |
//! | GET | `/v1/machine` | hosts grouped by provider |
//! | GET | `/v1/machine/:driver` | hosts of one provider |
//! | POST | `/v1/machine/:driver/host/:name` | create |
//! | GET | `/v1/machine/:driver/host/:name` | inspect |
//! | DELETE | `/v1/machine/:driver/host/:name` | remove |
//! | PUT | `/v1/machine/:driver/host/:name/:action` | any lifecycle action |
//! | GET | `/v1/machine/:driver/host/:name/log` | snapshot history |
//!
//! Failures are reported as `{"error": "..."}`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::binder::Overrides;
use crate::driver::{Action, OptionSpec};
use crate::inventory::Inventory;
use crate::orchestrator::{HostStatus, LifecycleOrchestrator, OrchestratorError};
use crate::state_store::{SnapshotRecord, StateStoreError};

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    orchestrator: Arc<LifecycleOrchestrator>,
    inventory: Inventory,
}

impl AppState {
    /// Bundles an orchestrator with an inventory over the same store.
    #[must_use]
    pub fn new(orchestrator: Arc<LifecycleOrchestrator>) -> Self {
        let inventory = Inventory::new(orchestrator.log().clone());
        Self {
            orchestrator,
            inventory,
        }
    }
}

/// Error returned by handlers, rendered as a JSON body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::UnknownProvider(_) | OrchestratorError::HostNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            OrchestratorError::InvalidAction(_)
            | OrchestratorError::InvalidConfig { .. }
            | OrchestratorError::InvalidName(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Provider { .. } => StatusCode::BAD_GATEWAY,
            OrchestratorError::PersistenceFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StateStoreError> for ApiError {
    fn from(err: StateStoreError) -> Self {
        let status = match &err {
            StateStoreError::InvalidName { .. } => StatusCode::BAD_REQUEST,
            StateStoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Service identity reported by `/info`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    /// Package name.
    pub name: &'static str,
    /// Package version.
    pub version: &'static str,
}

/// Builds the API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(service_info))
        .route("/v1/driver", get(list_drivers))
        .route("/v1/driver/:driver/options", get(driver_options))
        .route("/v1/machine", get(all_hosts))
        .route("/v1/machine/:driver", get(driver_hosts))
        .route(
            "/v1/machine/:driver/host/:name",
            get(inspect_host).post(create_host).delete(remove_host),
        )
        .route("/v1/machine/:driver/host/:name/log", get(host_history))
        .route("/v1/machine/:driver/host/:name/:action", put(run_action))
        .with_state(Arc::new(state))
}

/// Errors raised while running the HTTP server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Raised when the listener cannot bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Raised when the server stops with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Serves the API on `addr` until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns [`ServeError`] when binding or serving fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), ServeError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServeError::Serve)?;
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn parse_overrides(body: &Bytes) -> Result<Overrides, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Overrides::new());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("invalid overrides: {err}")))
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.orchestrator.providers())
}

async fn driver_options(
    State(state): State<Arc<AppState>>,
    Path(driver): Path<String>,
) -> ApiResult<Vec<OptionSpec>> {
    Ok(Json(state.orchestrator.describe(&driver)?))
}

async fn all_hosts(
    State(state): State<Arc<AppState>>,
) -> ApiResult<BTreeMap<String, Vec<String>>> {
    Ok(Json(state.inventory.all_hosts()?))
}

async fn driver_hosts(
    State(state): State<Arc<AppState>>,
    Path(driver): Path<String>,
) -> ApiResult<Vec<String>> {
    Ok(Json(state.inventory.hosts(&driver)?))
}

async fn inspect_host(
    State(state): State<Arc<AppState>>,
    Path((driver, name)): Path<(String, String)>,
) -> ApiResult<HostStatus> {
    Ok(Json(state.orchestrator.inspect(&driver, &name).await?))
}

async fn create_host(
    State(state): State<Arc<AppState>>,
    Path((driver, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<HostStatus> {
    let overrides = parse_overrides(&body)?;
    let status = state
        .orchestrator
        .execute_action(&driver, &name, Action::Create, &overrides)
        .await?;
    Ok(Json(status))
}

async fn remove_host(
    State(state): State<Arc<AppState>>,
    Path((driver, name)): Path<(String, String)>,
) -> ApiResult<HostStatus> {
    let status = state
        .orchestrator
        .execute_action(&driver, &name, Action::Remove, &Overrides::new())
        .await?;
    Ok(Json(status))
}

async fn run_action(
    State(state): State<Arc<AppState>>,
    Path((driver, name, action)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<HostStatus> {
    let overrides = parse_overrides(&body)?;
    let status = state
        .orchestrator
        .execute(&driver, &name, &action, &overrides)
        .await?;
    Ok(Json(status))
}

async fn host_history(
    State(state): State<Arc<AppState>>,
    Path((driver, name)): Path<(String, String)>,
) -> ApiResult<Vec<SnapshotRecord>> {
    Ok(Json(state.inventory.history(&driver, &name)?))
}
