//! RPC surface tests: a real server over a scratch engine

use std::net::SocketAddr;
use std::sync::Arc;

use stevedore::engine::Engine;
use stevedore::server::handlers::{
    GetDeploysPathResponse, HealthResponse, NewDeployDirResponse, RunRequest,
};
use stevedore::server::serve::{serve, ServerOptions};
use stevedore::server::state::ServerState;

use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast;

const PORT_BASE: u16 = 48200;

async fn start_server() -> (TempDir, SocketAddr, broadcast::Sender<()>) {
    let dir = tempdir().unwrap();
    let engine = Arc::new(Engine::new(dir.path(), PORT_BASE).await.unwrap());

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = Arc::new(ServerState::new(engine, shutdown_tx.clone()));

    let mut rx = shutdown_tx.subscribe();
    let options = ServerOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let (_handle, addr) = serve(&options, state, async move {
        let _ = rx.recv().await;
    })
    .await
    .unwrap();

    (dir, addr, shutdown_tx)
}

#[tokio::test]
async fn health_endpoint_answers() {
    let (_dir, addr, shutdown_tx) = start_server().await;

    let reply: HealthResponse = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply.status, "healthy");
    assert_eq!(reply.service, "stevedore");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn new_deploy_dir_lands_under_the_deploys_path() {
    let (_dir, addr, shutdown_tx) = start_server().await;
    let client = reqwest::Client::new();

    let path_reply: GetDeploysPathResponse = client
        .get(format!("http://{}/deploys/path", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let dir_reply: NewDeployDirResponse = client
        .post(format!("http://{}/deploys/new-dir", addr))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(!dir_reply.deploy_id.is_empty());
    assert!(dir_reply.path.starts_with(&path_reply.path));
    assert!(dir_reply.path.ends_with(&dir_reply.deploy_id));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn run_maps_user_errors_to_http_statuses() {
    let (_dir, addr, shutdown_tx) = start_server().await;
    let client = reqwest::Client::new();

    // Too-short short name.
    let response = client
        .post(format!("http://{}/deploys/run", addr))
        .json(&RunRequest {
            deploy_id: "ab".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // Unknown deploy.
    let response = client
        .post(format!("http://{}/deploys/run", addr))
        .json(&RunRequest {
            deploy_id: "ghost-deploy-2026".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn activation_below_range_is_a_bad_request() {
    let (_dir, addr, shutdown_tx) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/active/by-port", addr))
        .json(&serde_json::json!({ "port": PORT_BASE }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn stop_of_unknown_deploy_conflicts() {
    let (_dir, addr, shutdown_tx) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/deploys/stop", addr))
        .json(&serde_json::json!({ "deploy_id": "ghost-deploy-2026" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    let _ = shutdown_tx.send(());
}
