//! File-copy and command channels to a target host
//!
//! A target is reached either locally (test mode, everything runs on this
//! machine) or over ssh. Both variants expose the same two operations:
//! copy a directory tree and run a shell command.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use crate::errors::ManagerError;

/// How to reach a target host
#[derive(Debug, Clone)]
pub enum Channel {
    /// Commands run locally through a shell; copies are local rsyncs
    Local,
    /// Commands run over ssh; copies are rsyncs over ssh
    Ssh { login: String, port: u16 },
}

impl Channel {
    /// Copy the contents of the local `src` directory into `dst` on the
    /// target host. Deletes anything in `dst` not present in `src`.
    pub async fn copy(&self, src: &str, dst: &str, cwd: &Path) -> Result<(), ManagerError> {
        let src_with_slash = format!("{}/", src.trim_end_matches('/'));
        match self {
            Channel::Local => {
                run_visible("rsync", &["-az", "--delete", &src_with_slash, dst], cwd).await
            }
            Channel::Ssh { login, port } => {
                let ssh_cmd = format!("ssh -p {} -o StrictHostKeyChecking=no", port);
                let remote_dst = format!("{}:{}", login, dst);
                run_visible(
                    "rsync",
                    &["-az", "--delete", "-e", &ssh_cmd, &src_with_slash, &remote_dst],
                    cwd,
                )
                .await
            }
        }
    }

    /// Run a shell command on the target host
    pub async fn exec(&self, command: &str, cwd: &Path) -> Result<(), ManagerError> {
        match self {
            Channel::Local => run_visible("bash", &["-c", command], cwd).await,
            Channel::Ssh { login, port } => {
                run_visible(
                    "ssh",
                    &[
                        "-o",
                        "StrictHostKeyChecking=no",
                        "-p",
                        &port.to_string(),
                        login,
                        command,
                    ],
                    cwd,
                )
                .await
            }
        }
    }
}

/// Run a command with inherited stdio so the operator sees its output
pub async fn run_visible(program: &str, args: &[&str], cwd: &Path) -> Result<(), ManagerError> {
    info!("exec {} {}", program, args.join(" "));

    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .status()
        .await
        .map_err(|e| ManagerError::ExternalCommand {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(ManagerError::ExternalCommand {
            command: format!("{} {}", program, args.join(" ")),
            reason: format!("exit status {}", status),
        });
    }
    Ok(())
}

/// A client-owned ssh tunnel to a remote manager's loopback RPC port.
/// The child is killed when the tunnel is dropped.
#[derive(Debug)]
pub struct Tunnel {
    child: tokio::process::Child,
    local_port: u16,
}

impl Tunnel {
    /// Forward a free local port to `localhost:<remote_port>` on the target
    /// and wait until the forward accepts connections.
    pub async fn open(
        login: &str,
        ssh_port: u16,
        remote_port: u16,
    ) -> Result<Self, ManagerError> {
        let local_port = free_local_port().await?;

        info!(
            "Opening tunnel to {}:{} -> manager@{}",
            login, ssh_port, remote_port
        );
        let child = Command::new("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-p")
            .arg(ssh_port.to_string())
            .arg("-N")
            .arg(format!("-L{}:localhost:{}", local_port, remote_port))
            .arg(login)
            .spawn()
            .map_err(|e| ManagerError::ExternalCommand {
                command: "ssh".to_string(),
                reason: e.to_string(),
            })?;

        let mut tunnel = Self { child, local_port };
        tunnel.wait_ready().await?;
        Ok(tunnel)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn wait_ready(&mut self) -> Result<(), ManagerError> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(15);
        loop {
            if !crate::engine::ports::port_free(self.local_port).await {
                return Ok(());
            }
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(ManagerError::ExternalCommand {
                    command: "ssh".to_string(),
                    reason: format!("tunnel exited with {}", status),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ManagerError::ExternalCommand {
                    command: "ssh".to_string(),
                    reason: "tunnel did not come up in time".to_string(),
                });
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Ask the OS for a free loopback port
pub async fn free_local_port() -> Result<u16, ManagerError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Remote path of a deploy directory under a manager's deploys path
pub fn remote_deploy_dir(deploys_path: &str, deploy_id: &str) -> String {
    PathBuf::from(deploys_path)
        .join(deploy_id)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_remote_paths() {
        assert_eq!(
            remote_deploy_dir("/srv/app/deploys", "amber-oslo-2026-08-02-10-00-00"),
            "/srv/app/deploys/amber-oslo-2026-08-02-10-00-00"
        );
    }

    #[tokio::test]
    async fn free_local_port_is_connectable_range() {
        let port = free_local_port().await.unwrap();
        assert!(port > 0);
    }
}
