//! Process supervision
//!
//! Launches a deploy's run command, waits for its health endpoint to come up,
//! and signals process groups for clean stops. Children get their own
//! process group (via `setsid`) so they survive manager restarts and so one
//! signal reaches the whole bundle.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::ManagerError;
use crate::models::application::Application;
use crate::storage::layout::StorageLayout;

/// Total wall-clock budget for a deploy to become healthy after spawn
pub const MAX_STARTUP_TIME: Duration = Duration::from_secs(20);

/// Per-request timeout for a single health probe
pub const MAX_HEALTH_CHECK_TIME: Duration = Duration::from_secs(2);

/// Pause between startup health probes
pub const STARTUP_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Give a command its own session and process group so it is not torn down
/// with the manager.
pub fn detach(cmd: &mut Command) {
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// SIGTERM a process's whole group; falls back to the single pid when the
/// group lookup fails.
pub fn terminate_group(pid: u32) {
    #[cfg(unix)]
    unsafe {
        let pgid = libc::getpgid(pid as libc::pid_t);
        if pgid > 0 {
            libc::kill(-pgid, libc::SIGTERM);
        } else {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// SIGKILL a single pid
pub fn kill_pid(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Launches deploys and probes their health endpoints
#[derive(Debug, Clone)]
pub struct Supervisor {
    layout: StorageLayout,
    health_client: reqwest::Client,
}

impl Supervisor {
    pub fn new(layout: StorageLayout) -> Result<Self, ManagerError> {
        // Redirects from a health endpoint mean the app is misconfigured;
        // surface the 3xx instead of following it.
        let health_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(MAX_HEALTH_CHECK_TIME)
            .build()?;
        Ok(Self {
            layout,
            health_client,
        })
    }

    /// Spawn a deploy's run command on `port` and wait until its health
    /// endpoint answers 200, or fail.
    pub async fn start_deploy(&self, deploy_id: &str, port: u16) -> Result<(), ManagerError> {
        let app =
            Application::from_file(&self.layout.deploy_config_file(deploy_id), false).await?;
        self.spawn(deploy_id, &app, port)?;
        self.wait_for_health(port, app.health_endpoint()).await
    }

    fn spawn(&self, deploy_id: &str, app: &Application, port: u16) -> Result<(), ManagerError> {
        let run_cmd = app.run_cmd_for_port(port);
        let deploy_dir = self.layout.deploy_dir(deploy_id).path().to_path_buf();

        info!(deploy_id, port, cmd = %run_cmd, "spawning deploy");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&run_cmd)
            .current_dir(&deploy_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        detach(&mut cmd);

        // The child is intentionally not waited on; it lives in its own
        // process group and is managed through the probe from here on.
        cmd.spawn()?;
        Ok(())
    }

    /// Poll the health endpoint until it answers 200.
    ///
    /// Connection errors keep polling (the app may still be binding its
    /// listener); any response other than 200 fails immediately.
    pub async fn wait_for_health(&self, port: u16, endpoint: &str) -> Result<(), ManagerError> {
        let deadline = Instant::now() + MAX_STARTUP_TIME;
        loop {
            match self.probe_health(port, endpoint).await {
                Ok(200) => {
                    debug!(port, "health ok");
                    return Ok(());
                }
                Ok(status) => {
                    return Err(ManagerError::HealthFailed(format!(
                        "got status {} from port {}",
                        status, port
                    )));
                }
                Err(_) if Instant::now() >= deadline => {
                    return Err(ManagerError::HealthFailed(format!(
                        "failed to connect to port {} within {:?}",
                        port, MAX_STARTUP_TIME
                    )));
                }
                Err(_) => {}
            }
            tokio::time::sleep(STARTUP_HEALTH_CHECK_INTERVAL).await;
        }
    }

    /// One health probe; the HTTP status on any response, an error when the
    /// request itself failed.
    pub async fn probe_health(&self, port: u16, endpoint: &str) -> Result<u16, reqwest::Error> {
        let url = format!("http://localhost:{}{}", port, endpoint);
        let response = self.health_client.get(&url).send().await?;
        Ok(response.status().as_u16())
    }
}
