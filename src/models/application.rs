//! Application descriptor (`deploy.json`)
//!
//! The same file is consumed on both sides of the wire: the client needs the
//! build/push fields, the manager only needs the run command and health
//! endpoint. Validation is therefore split by side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ManagerError;
use crate::filesys::file::File;

pub const PORT_PLACEHOLDER: &str = "%PORT%";

fn default_ssh_port() -> u16 {
    22
}

/// A single remote host running a manager instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// ssh login, e.g. `user@host` (no path)
    #[serde(rename = "Ssh", default)]
    pub ssh: String,

    #[serde(rename = "SshPort", default = "default_ssh_port")]
    pub ssh_port: u16,

    /// The manager's base port on that host. App ports are allocated from
    /// `base+1..=base+99`, the frontend is `base+98`, stats `base+99`.
    #[serde(rename = "Base")]
    pub base: u16,
}

/// Application descriptor, read from `deploy.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "BuildCmd")]
    pub build_cmd: String,

    #[serde(rename = "BuildOutputDir")]
    pub build_output_dir: String,

    #[serde(rename = "PostDeployCmd")]
    pub post_deploy_cmd: String,

    /// Run command template; must contain `%PORT%`
    #[serde(rename = "RunCmd")]
    pub run_cmd: String,

    #[serde(rename = "HealthEndpoint")]
    pub health_endpoint: String,

    #[serde(rename = "Targets")]
    pub targets: BTreeMap<String, Target>,

    #[serde(rename = "GroupTargets")]
    pub group_targets: BTreeMap<String, Vec<String>>,
}

impl Application {
    /// Read and validate a descriptor. `client_side` selects which fields are
    /// mandatory.
    pub async fn from_file(file: &File, client_side: bool) -> Result<Self, ManagerError> {
        let app: Application = file.read_json().await?;
        app.validate(client_side)?;
        Ok(app)
    }

    pub fn validate(&self, client_side: bool) -> Result<(), ManagerError> {
        if client_side {
            if self.name.is_empty() {
                return Err(ManagerError::ConfigInvalid("Name is required".into()));
            }
            if self.build_cmd.is_empty() {
                return Err(ManagerError::ConfigInvalid("BuildCmd is required".into()));
            }
            if self.build_output_dir.is_empty() {
                return Err(ManagerError::ConfigInvalid(
                    "BuildOutputDir is required".into(),
                ));
            }
            if self.health_endpoint.is_empty() {
                return Err(ManagerError::ConfigInvalid(
                    "HealthEndpoint is required".into(),
                ));
            }
            self.validate_targets()?;
        } else {
            if self.run_cmd.is_empty() {
                return Err(ManagerError::ConfigInvalid("RunCmd is required".into()));
            }
            if !self.run_cmd.contains(PORT_PLACEHOLDER) {
                return Err(ManagerError::ConfigInvalid(format!(
                    "RunCmd must contain {}",
                    PORT_PLACEHOLDER
                )));
            }
        }
        Ok(())
    }

    fn validate_targets(&self) -> Result<(), ManagerError> {
        for (name, members) in &self.group_targets {
            if self.targets.contains_key(name) {
                return Err(ManagerError::ConfigInvalid(format!(
                    "'{}' is defined both as a target and a group target",
                    name
                )));
            }
            for member in members {
                if !self.targets.contains_key(member) {
                    return Err(ManagerError::ConfigInvalid(format!(
                        "group target '{}' references undefined target '{}'",
                        name, member
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run command with the port substituted in
    pub fn run_cmd_for_port(&self, port: u16) -> String {
        self.run_cmd.replace(PORT_PLACEHOLDER, &port.to_string())
    }

    /// Health endpoint, defaulting to `/`
    pub fn health_endpoint(&self) -> &str {
        if self.health_endpoint.is_empty() {
            "/"
        } else {
            &self.health_endpoint
        }
    }

    /// Resolve a logical target name to the list of hosts behind it.
    /// A plain target resolves to itself; a group resolves to its members.
    pub fn resolve_target(&self, name: &str) -> Result<Vec<(String, Target)>, ManagerError> {
        if let Some(target) = self.targets.get(name) {
            return Ok(vec![(name.to_string(), target.clone())]);
        }
        if let Some(members) = self.group_targets.get(name) {
            let mut hosts = Vec::new();
            for member in members {
                let target = self
                    .targets
                    .get(member)
                    .ok_or_else(|| ManagerError::InvalidTarget(member.clone()))?;
                hosts.push((member.clone(), target.clone()));
            }
            return Ok(hosts);
        }
        Err(ManagerError::InvalidTarget(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Application {
        let mut targets = BTreeMap::new();
        targets.insert(
            "prod-1".to_string(),
            Target {
                ssh: "deploy@prod-1.example.com".to_string(),
                ssh_port: 22,
                base: 8100,
            },
        );
        targets.insert(
            "prod-2".to_string(),
            Target {
                ssh: "deploy@prod-2.example.com".to_string(),
                ssh_port: 2222,
                base: 8100,
            },
        );
        let mut group_targets = BTreeMap::new();
        group_targets.insert(
            "prod".to_string(),
            vec!["prod-1".to_string(), "prod-2".to_string()],
        );
        Application {
            name: "hello".to_string(),
            build_cmd: "make dist".to_string(),
            build_output_dir: "dist".to_string(),
            post_deploy_cmd: String::new(),
            run_cmd: "node app.js %PORT%".to_string(),
            health_endpoint: "/healthz".to_string(),
            targets,
            group_targets,
        }
    }

    #[test]
    fn parses_with_defaults() {
        let app: Application = serde_json::from_str(
            r#"{
                "Name": "hello",
                "BuildCmd": "make",
                "BuildOutputDir": "dist",
                "RunCmd": "node app.js %PORT%",
                "HealthEndpoint": "/",
                "Targets": {"prod": {"Ssh": "me@host", "Base": 8100}}
            }"#,
        )
        .unwrap();
        assert_eq!(app.targets["prod"].ssh_port, 22);
        assert!(app.post_deploy_cmd.is_empty());
    }

    #[test]
    fn server_side_requires_port_placeholder() {
        let mut app = sample();
        app.run_cmd = "node app.js 8080".to_string();
        assert!(app.validate(false).is_err());

        app.run_cmd = "node app.js %PORT%".to_string();
        assert!(app.validate(false).is_ok());
    }

    #[test]
    fn client_side_requires_build_fields() {
        let mut app = sample();
        app.build_cmd = String::new();
        assert!(app.validate(true).is_err());
    }

    #[test]
    fn health_endpoint_defaults_to_root() {
        let mut app = sample();
        app.health_endpoint = String::new();
        assert_eq!(app.health_endpoint(), "/");
    }

    #[test]
    fn run_cmd_substitutes_port() {
        let app = sample();
        assert_eq!(app.run_cmd_for_port(8123), "node app.js 8123");
    }

    #[test]
    fn group_may_not_shadow_target() {
        let mut app = sample();
        app.group_targets
            .insert("prod-1".to_string(), vec!["prod-2".to_string()]);
        assert!(app.validate(true).is_err());
    }

    #[test]
    fn group_members_must_exist() {
        let mut app = sample();
        app.group_targets
            .insert("staging".to_string(), vec!["missing".to_string()]);
        assert!(app.validate(true).is_err());
    }

    #[test]
    fn resolves_single_and_group_targets() {
        let app = sample();
        let single = app.resolve_target("prod-1").unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].0, "prod-1");

        let group = app.resolve_target("prod").unwrap();
        assert_eq!(group.len(), 2);

        assert!(app.resolve_target("nope").is_err());
    }
}
