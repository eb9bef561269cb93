//! RPC request handlers
//!
//! Method contracts only: every payload is a small serde record, errors come
//! back as `{ "error": ... }` with a status code picked per error kind. The
//! client side reuses these records verbatim.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::ManagerError;
use crate::models::deploy::Deploy;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error reply body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// An RPC error with its HTTP mapping
pub struct ApiError(pub StatusCode, pub String);

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        let status = match &err {
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::Ambiguous { .. }
            | ManagerError::AlreadyConfigured { .. }
            | ManagerError::StillRunning(_)
            | ManagerError::NotRunning(_)
            | ManagerError::PortExhausted { .. } => StatusCode::CONFLICT,
            ManagerError::InvalidTarget(_) | ManagerError::ConfigInvalid(_) => {
                StatusCode::BAD_REQUEST
            }
            ManagerError::HealthFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler; also what the client polls to know a tunnel is up
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "stevedore".to_string(),
        version: version_info().version,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ListDeploysParams {
    /// Optional regex; only deploys whose id matches are returned
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListDeploysResponse {
    pub deploys: Vec<Deploy>,
}

pub async fn list_deploys_handler(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListDeploysParams>,
) -> Result<Json<ListDeploysResponse>, ApiError> {
    let filter = match params.filter.as_deref() {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
            ApiError(StatusCode::BAD_REQUEST, format!("invalid filter: {}", e))
        })?),
        None => None,
    };
    let deploys = state.engine.list_deploys(filter.as_ref()).await?;
    Ok(Json(ListDeploysResponse { deploys }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub deploy_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub port: u16,
}

pub async fn run_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let port = state.engine.run(&req.deploy_id).await?;
    Ok(Json(RunResponse { port }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopDeployRequest {
    pub deploy_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopDeployResponse {}

pub async fn stop_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<StopDeployRequest>,
) -> Result<Json<StopDeployResponse>, ApiError> {
    state.engine.stop(&req.deploy_id).await?;
    Ok(Json(StopDeployResponse {}))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupDeployRequest {
    pub deploy_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupDeployResponse {}

pub async fn cleanup_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CleanupDeployRequest>,
) -> Result<Json<CleanupDeployResponse>, ApiError> {
    state.engine.cleanup(&req.deploy_id).await?;
    Ok(Json(CleanupDeployResponse {}))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetActiveByPortRequest {
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetActiveByIdRequest {
    pub deploy_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetActiveResponse {}

pub async fn set_active_by_port_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<SetActiveByPortRequest>,
) -> Result<Json<SetActiveResponse>, ApiError> {
    state.engine.set_active_by_port(req.port).await?;
    Ok(Json(SetActiveResponse {}))
}

pub async fn set_active_by_id_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<SetActiveByIdRequest>,
) -> Result<Json<SetActiveResponse>, ApiError> {
    state.engine.set_active_by_id(&req.deploy_id).await?;
    Ok(Json(SetActiveResponse {}))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewDeployDirResponse {
    pub deploy_id: String,
    pub path: String,
}

pub async fn new_deploy_dir_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<NewDeployDirResponse> {
    let reply = state.engine.new_deploy_dir();
    Json(NewDeployDirResponse {
        deploy_id: reply.deploy_id,
        path: reply.path.display().to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetDeploysPathResponse {
    pub path: String,
}

pub async fn get_deploys_path_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<GetDeploysPathResponse> {
    Json(GetDeploysPathResponse {
        path: state.engine.deploys_path().display().to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillUnknownResponse {
    pub killed: Vec<u32>,
}

pub async fn kill_unknown_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<KillUnknownResponse>, ApiError> {
    let killed = state.engine.kill_unknown().await?;
    Ok(Json(KillUnknownResponse { killed }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub killed: usize,
}

/// Kill everything in the managed range, then stop the manager itself by
/// firing the shutdown channel the serve loop listens on.
pub async fn shutdown_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<ShutdownResponse> {
    let killed = state.engine.shutdown_processes().await;
    info!(killed, "shutdown requested over RPC");
    if let Err(e) = state.shutdown_tx.send(()) {
        error!("failed to signal shutdown: {}", e);
    }
    Json(ShutdownResponse { killed })
}
