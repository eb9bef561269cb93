//! RPC server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::ManagerError;
use crate::server::handlers::{
    cleanup_deploy_handler, get_deploys_path_handler, health_handler, kill_unknown_handler,
    list_deploys_handler, new_deploy_dir_handler, run_handler, set_active_by_id_handler,
    set_active_by_port_handler, shutdown_handler, stop_deploy_handler,
};
use crate::server::state::ServerState;

/// RPC server options. The listener is loopback-only; remote clients reach
/// it through an ssh tunnel.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8100,
        }
    }
}

/// Start the RPC server. Returns the join handle and the bound address
/// (useful when the options asked for port 0).
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(JoinHandle<Result<(), ManagerError>>, SocketAddr), ManagerError> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/deploys", get(list_deploys_handler))
        .route("/deploys/run", post(run_handler))
        .route("/deploys/stop", post(stop_deploy_handler))
        .route("/deploys/cleanup", post(cleanup_deploy_handler))
        .route("/deploys/new-dir", post(new_deploy_dir_handler))
        .route("/deploys/path", get(get_deploys_path_handler))
        .route("/active/by-port", post(set_active_by_port_handler))
        .route("/active/by-id", post(set_active_by_id_handler))
        .route("/kill-unknown", post(kill_unknown_handler))
        .route("/shutdown", post(shutdown_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ManagerError::Server(format!("bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ManagerError::Server(e.to_string()))?;
    info!("RPC server listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ManagerError::Server(e.to_string()))
    });

    Ok((handle, local_addr))
}
