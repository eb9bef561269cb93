//! The tracked port map (`config.json`)
//!
//! Canonical desired state: every entry says "this deploy id should be
//! running on this port". The wire form keys ports as strings because JSON
//! objects only have string keys; anything non-numeric fails validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ManagerError;
use crate::filesys::file::File;

#[derive(Debug, Serialize, Deserialize, Default)]
struct PortsFile {
    #[serde(rename = "Ports", default)]
    ports: BTreeMap<String, String>,
}

/// Tracked `port -> deploy id` map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortsConfig {
    pub ports: BTreeMap<u16, String>,
}

impl PortsConfig {
    /// Load from disk. A missing file is an empty config, not an error.
    pub async fn load(file: &File) -> Result<Self, ManagerError> {
        if !file.exists().await {
            return Ok(Self::default());
        }

        let raw: PortsFile = file
            .read_json()
            .await
            .map_err(|e| ManagerError::ConfigInvalid(format!("{}: {}", file.path().display(), e)))?;

        let mut ports = BTreeMap::new();
        for (port_str, deploy_id) in raw.ports {
            let port: u16 = port_str.parse().map_err(|_| {
                ManagerError::ConfigInvalid(format!("Ports keys should be numbers, got '{}'", port_str))
            })?;
            ports.insert(port, deploy_id);
        }
        Ok(Self { ports })
    }

    /// Persist atomically (temp file + rename), mode 0644
    pub async fn store(&self, file: &File) -> Result<(), ManagerError> {
        let raw = PortsFile {
            ports: self
                .ports
                .iter()
                .map(|(port, id)| (port.to_string(), id.clone()))
                .collect(),
        };
        file.write_json_atomic(&raw).await
    }

    /// The port a deploy is configured to run on, if any
    pub fn port_of(&self, deploy_id: &str) -> Option<u16> {
        self.ports
            .iter()
            .find(|(_, id)| id.as_str() == deploy_id)
            .map(|(port, _)| *port)
    }

    /// The deploy configured for a port, if any
    pub fn deploy_at(&self, port: u16) -> Option<&str> {
        self.ports.get(&port).map(|s| s.as_str())
    }

    pub fn is_tracked(&self, deploy_id: &str) -> bool {
        self.port_of(deploy_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_is_empty_config() {
        let dir = tempdir().unwrap();
        let file = File::new(dir.path().join("config.json"));
        let config = PortsConfig::load(&file).await.unwrap();
        assert!(config.ports.is_empty());
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let file = File::new(dir.path().join("config.json"));

        let mut config = PortsConfig::default();
        config
            .ports
            .insert(8101, "amber-oslo-2026-08-02-10-00-00".to_string());
        config
            .ports
            .insert(8102, "brave-quito-2026-08-02-10-00-01".to_string());
        config.store(&file).await.unwrap();

        let loaded = PortsConfig::load(&file).await.unwrap();
        assert_eq!(loaded, config);

        // No temp file left behind.
        assert!(!dir.path().join("config.tmp").exists());
    }

    #[tokio::test]
    async fn rejects_non_numeric_port_keys() {
        let dir = tempdir().unwrap();
        let file = File::new(dir.path().join("config.json"));
        file.write_string(r#"{"Ports": {"eight": "some-deploy"}}"#)
            .await
            .unwrap();

        let err = PortsConfig::load(&file).await.unwrap_err();
        assert!(matches!(err, ManagerError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let file = File::new(dir.path().join("config.json"));
        file.write_string("{not json").await.unwrap();

        assert!(PortsConfig::load(&file).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stored_file_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let file = File::new(dir.path().join("config.json"));
        PortsConfig::default().store(&file).await.unwrap();

        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn lookups_by_port_and_id() {
        let mut config = PortsConfig::default();
        config.ports.insert(8101, "a-deploy".to_string());

        assert_eq!(config.port_of("a-deploy"), Some(8101));
        assert_eq!(config.port_of("other"), None);
        assert_eq!(config.deploy_at(8101), Some("a-deploy"));
        assert!(config.is_tracked("a-deploy"));
    }
}
