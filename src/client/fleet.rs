//! Multi-target fan-out
//!
//! Presents N per-host clients as one logical deploy surface. Builds happen
//! locally once; everything else broadcasts host by host, aborting on the
//! first error. Port-addressed activation only makes sense against a single
//! host and is rejected otherwise.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::client::channel::run_visible;
use crate::client::host::HostClient;
use crate::errors::ManagerError;
use crate::filesys::file::File;
use crate::models::application::Application;
use crate::models::deploy::Deploy;

pub struct FleetClient {
    app: Application,
    dir: PathBuf,
    hosts: Vec<HostClient>,
}

impl FleetClient {
    /// Connect to every host behind `target_name`. With `target_name`
    /// omitted, a descriptor with exactly one target (and no groups) is
    /// unambiguous and that target is used.
    pub async fn connect(
        deploy_file: &Path,
        target_name: Option<&str>,
        local_test: bool,
    ) -> Result<Self, ManagerError> {
        let app = Application::from_file(&File::new(deploy_file), true).await?;
        let dir = deploy_file
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let resolved_name = match target_name {
            Some(name) => name.to_string(),
            None => default_target(&app)?,
        };
        let targets = app.resolve_target(&resolved_name)?;

        let mut hosts = Vec::new();
        for (name, target) in targets {
            let host = if local_test {
                HostClient::local(&name, target, &dir)?
            } else {
                HostClient::connect(&name, target, &dir).await?
            };
            hosts.push(host);
        }

        Ok(Self { app, dir, hosts })
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn hosts(&self) -> &[HostClient] {
        &self.hosts
    }

    /// Build the artifact locally. One build serves every host; the pushed
    /// bytes are identical.
    pub async fn build(&self) -> Result<(), ManagerError> {
        info!("Building...");
        run_visible("sh", &["-c", &self.app.build_cmd], &self.dir).await
    }

    pub async fn push(&self, deploy_id: &str) -> Result<(), ManagerError> {
        for host in &self.hosts {
            info!("Pushing '{}' to {}...", deploy_id, host.name());
            host.push(&self.app, deploy_id).await?;
        }
        Ok(())
    }

    /// Run the deploy on every host, returning (host, port) pairs
    pub async fn run(&self, deploy_id: &str) -> Result<Vec<(String, u16)>, ManagerError> {
        let mut ports = Vec::new();
        for host in &self.hosts {
            let port = host.run(deploy_id).await?;
            ports.push((host.name().to_string(), port));
        }
        Ok(ports)
    }

    pub async fn stop(&self, deploy_id: &str) -> Result<(), ManagerError> {
        for host in &self.hosts {
            host.stop(deploy_id).await?;
        }
        Ok(())
    }

    pub async fn cleanup(&self, deploy_id: &str) -> Result<(), ManagerError> {
        for host in &self.hosts {
            host.cleanup(deploy_id).await?;
        }
        Ok(())
    }

    pub async fn set_active_by_id(&self, deploy_id: &str) -> Result<(), ManagerError> {
        for host in &self.hosts {
            host.set_active_by_id(deploy_id).await?;
        }
        Ok(())
    }

    /// A port number is only meaningful on one specific host
    pub async fn set_active_by_port(&self, port: u16) -> Result<(), ManagerError> {
        if self.hosts.len() > 1 {
            return Err(ManagerError::InvalidTarget(
                "cannot set active by port across multiple hosts".to_string(),
            ));
        }
        let host = self
            .hosts
            .first()
            .ok_or_else(|| ManagerError::InvalidTarget("no hosts".to_string()))?;
        host.set_active_by_port(port).await
    }

    /// Concatenated per-host listings
    pub async fn list_deploys(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<(String, Deploy)>, ManagerError> {
        let mut all = Vec::new();
        for host in &self.hosts {
            for deploy in host.list_deploys(filter).await? {
                all.push((host.name().to_string(), deploy));
            }
        }
        Ok(all)
    }

    pub async fn kill_unknown(&self) -> Result<(), ManagerError> {
        for host in &self.hosts {
            let killed = host.kill_unknown().await?;
            if !killed.is_empty() {
                info!("{}: killed pids {:?}", host.name(), killed);
            }
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        for host in &self.hosts {
            host.shutdown().await?;
        }
        Ok(())
    }
}

/// The implied target when none is named: exactly one plain target and no
/// groups.
fn default_target(app: &Application) -> Result<String, ManagerError> {
    if app.group_targets.is_empty() && app.targets.len() == 1 {
        return Ok(app.targets.keys().next().cloned().unwrap_or_default());
    }
    let mut names: Vec<&str> = app.targets.keys().map(|s| s.as_str()).collect();
    names.extend(app.group_targets.keys().map(|s| s.as_str()));
    Err(ManagerError::InvalidTarget(format!(
        "no target given; available: {}",
        names.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::application::Target;
    use std::collections::BTreeMap;

    fn app_with_targets(names: &[&str]) -> Application {
        let mut targets = BTreeMap::new();
        for name in names {
            targets.insert(
                name.to_string(),
                Target {
                    ssh: format!("deploy@{}", name),
                    ssh_port: 22,
                    base: 8100,
                },
            );
        }
        Application {
            name: "hello".to_string(),
            build_cmd: "make".to_string(),
            build_output_dir: "dist".to_string(),
            run_cmd: "node app.js %PORT%".to_string(),
            health_endpoint: "/".to_string(),
            targets,
            ..Application::default()
        }
    }

    #[test]
    fn single_target_is_the_default() {
        let app = app_with_targets(&["prod"]);
        assert_eq!(default_target(&app).unwrap(), "prod");
    }

    #[test]
    fn multiple_targets_need_an_explicit_name() {
        let app = app_with_targets(&["prod-1", "prod-2"]);
        assert!(default_target(&app).is_err());
    }

    #[tokio::test]
    async fn port_activation_rejected_across_hosts() {
        let app = app_with_targets(&["prod-1", "prod-2"]);
        let dir = PathBuf::from(".");
        let hosts = vec![
            HostClient::local("prod-1", app.targets["prod-1"].clone(), &dir).unwrap(),
            HostClient::local("prod-2", app.targets["prod-2"].clone(), &dir).unwrap(),
        ];
        let fleet = FleetClient {
            app,
            dir,
            hosts,
        };

        let err = fleet.set_active_by_port(8101).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidTarget(_)));
    }
}
