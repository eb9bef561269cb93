//! Per-host manager client
//!
//! One `HostClient` per target host: RPC calls go to the manager's loopback
//! endpoint (directly in local test mode, through an owned ssh tunnel
//! otherwise), pushes go through the host's file-copy channel.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::client::channel::{remote_deploy_dir, Channel, Tunnel};
use crate::errors::ManagerError;
use crate::models::application::{Application, Target};
use crate::models::deploy::Deploy;
use crate::server::handlers::{
    CleanupDeployRequest, CleanupDeployResponse, ErrorBody, GetDeploysPathResponse,
    KillUnknownResponse, ListDeploysResponse, NewDeployDirResponse, RunRequest, RunResponse,
    SetActiveByIdRequest, SetActiveByPortRequest, SetActiveResponse, ShutdownResponse,
    StopDeployRequest, StopDeployResponse,
};
use crate::storage::layout::STAGING_DIR_NAME;

pub struct HostClient {
    name: String,
    target: Target,
    channel: Channel,
    http: reqwest::Client,
    base_url: String,
    /// Directory the deploy file lives in; build and push commands run here
    dir: PathBuf,
    _tunnel: Option<Tunnel>,
}

impl HostClient {
    /// A client for a manager on this machine (local test mode): no tunnel,
    /// and channel operations run locally.
    pub fn local(name: &str, target: Target, dir: &Path) -> Result<Self, ManagerError> {
        Ok(Self {
            name: name.to_string(),
            base_url: format!("http://localhost:{}", target.base),
            target,
            channel: Channel::Local,
            http: reqwest::Client::new(),
            dir: dir.to_path_buf(),
            _tunnel: None,
        })
    }

    /// A client for a remote manager, reached through a fresh ssh tunnel
    pub async fn connect(name: &str, target: Target, dir: &Path) -> Result<Self, ManagerError> {
        let tunnel = Tunnel::open(&target.ssh, target.ssh_port, target.base).await?;
        Ok(Self {
            name: name.to_string(),
            base_url: format!("http://localhost:{}", tunnel.local_port()),
            channel: Channel::Ssh {
                login: target.ssh.clone(),
                port: target.ssh_port,
            },
            target,
            http: reqwest::Client::new(),
            dir: dir.to_path_buf(),
            _tunnel: Some(tunnel),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ManagerError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn post<T: serde::de::DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ManagerError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self.http.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ManagerError> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        let status = response.status();
        let error = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => format!("server returned {}", status),
        };
        Err(ManagerError::Server(error))
    }

    pub async fn list_deploys(&self, filter: Option<&str>) -> Result<Vec<Deploy>, ManagerError> {
        let path = match filter {
            Some(f) => format!("/deploys?filter={}", f),
            None => "/deploys".to_string(),
        };
        let reply: ListDeploysResponse = self.get(&path).await?;
        Ok(reply.deploys)
    }

    pub async fn run(&self, deploy_id: &str) -> Result<u16, ManagerError> {
        let reply: RunResponse = self
            .post(
                "/deploys/run",
                &RunRequest {
                    deploy_id: deploy_id.to_string(),
                },
            )
            .await?;
        Ok(reply.port)
    }

    pub async fn stop(&self, deploy_id: &str) -> Result<(), ManagerError> {
        let _: StopDeployResponse = self
            .post(
                "/deploys/stop",
                &StopDeployRequest {
                    deploy_id: deploy_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn cleanup(&self, deploy_id: &str) -> Result<(), ManagerError> {
        let _: CleanupDeployResponse = self
            .post(
                "/deploys/cleanup",
                &CleanupDeployRequest {
                    deploy_id: deploy_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn set_active_by_port(&self, port: u16) -> Result<(), ManagerError> {
        let _: SetActiveResponse = self
            .post("/active/by-port", &SetActiveByPortRequest { port })
            .await?;
        Ok(())
    }

    pub async fn set_active_by_id(&self, deploy_id: &str) -> Result<(), ManagerError> {
        let _: SetActiveResponse = self
            .post(
                "/active/by-id",
                &SetActiveByIdRequest {
                    deploy_id: deploy_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn new_deploy_dir(&self) -> Result<NewDeployDirResponse, ManagerError> {
        self.post("/deploys/new-dir", &serde_json::json!({})).await
    }

    pub async fn deploys_path(&self) -> Result<String, ManagerError> {
        let reply: GetDeploysPathResponse = self.get("/deploys/path").await?;
        Ok(reply.path)
    }

    pub async fn kill_unknown(&self) -> Result<Vec<u32>, ManagerError> {
        let reply: KillUnknownResponse =
            self.post("/kill-unknown", &serde_json::json!({})).await?;
        Ok(reply.killed)
    }

    pub async fn shutdown(&self) -> Result<usize, ManagerError> {
        let reply: ShutdownResponse = self.post("/shutdown", &serde_json::json!({})).await?;
        Ok(reply.killed)
    }

    /// Upload the built artifact as deploy `deploy_id`.
    ///
    /// The copy lands in the staging directory first; the final deploy
    /// directory then appears in one server-side rsync, so a half-finished
    /// upload is never mistaken for a deploy.
    pub async fn push(&self, app: &Application, deploy_id: &str) -> Result<(), ManagerError> {
        let deploys_path = self.deploys_path().await?;
        let staging_dir = remote_deploy_dir(&deploys_path, STAGING_DIR_NAME);
        let deploy_dir = remote_deploy_dir(&deploys_path, deploy_id);

        self.channel
            .copy(&app.build_output_dir, &staging_dir, &self.dir)
            .await?;
        self.channel
            .exec(
                &format!("rsync -a --delete {}/ {}", staging_dir, deploy_dir),
                &self.dir,
            )
            .await?;

        if !app.post_deploy_cmd.is_empty() {
            self.channel
                .exec(
                    &format!("cd {}; {}", deploy_dir, app.post_deploy_cmd),
                    &self.dir,
                )
                .await?;
        }
        Ok(())
    }
}
