//! On-disk layout of a manager root
//!
//! ```text
//! <root>/
//!   config.json          tracked port -> deploy id map
//!   haproxy.cfg          written by the load-balancer controller
//!   haproxy.pid
//!   deploys/
//!     _latest/           staging target for pushes
//!     <deploy-id>/
//!       deploy.json      application descriptor
//!       PID_FILE         optional pid identity override
//!       ...              application files
//! ```

use std::path::{Path, PathBuf};

use crate::errors::ManagerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub const DEPLOYS_DIR_NAME: &str = "deploys";
pub const STAGING_DIR_NAME: &str = "_latest";
pub const DEPLOY_CONFIG_FILE_NAME: &str = "deploy.json";
pub const SERVER_CONFIG_FILE_NAME: &str = "config.json";
pub const HAPROXY_CONFIG_FILE_NAME: &str = "haproxy.cfg";
pub const HAPROXY_PID_FILE_NAME: &str = "haproxy.pid";
pub const PID_OVERRIDE_FILE_NAME: &str = "PID_FILE";

/// Storage layout rooted at the manager's data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The tracked port map
    pub fn config_file(&self) -> File {
        File::new(self.root.join(SERVER_CONFIG_FILE_NAME))
    }

    pub fn deploys_dir(&self) -> Dir {
        Dir::new(self.root.join(DEPLOYS_DIR_NAME))
    }

    /// Staging directory the push channel copies into before the
    /// rename-style rsync into the final deploy directory
    pub fn staging_dir(&self) -> Dir {
        self.deploys_dir().subdir(STAGING_DIR_NAME)
    }

    pub fn deploy_dir(&self, deploy_id: &str) -> Dir {
        self.deploys_dir().subdir(deploy_id)
    }

    pub fn deploy_config_file(&self, deploy_id: &str) -> File {
        self.deploy_dir(deploy_id).file(DEPLOY_CONFIG_FILE_NAME)
    }

    /// Optional pid written by the application itself, letting a child
    /// process stand in as the deploy's identity
    pub fn pid_override_file(&self, deploy_id: &str) -> File {
        self.deploy_dir(deploy_id).file(PID_OVERRIDE_FILE_NAME)
    }

    pub fn haproxy_config_file(&self) -> File {
        File::new(self.root.join(HAPROXY_CONFIG_FILE_NAME))
    }

    pub fn haproxy_pid_file(&self) -> File {
        File::new(self.root.join(HAPROXY_PID_FILE_NAME))
    }

    /// Deploy ids present on disk, excluding the staging directory
    pub async fn read_deploy_ids(&self) -> Result<Vec<String>, ManagerError> {
        let mut names = self.deploys_dir().list_dir_names().await?;
        names.retain(|n| n != STAGING_DIR_NAME);
        Ok(names)
    }

    /// Create the directories the manager expects
    pub async fn setup(&self) -> Result<(), ManagerError> {
        self.deploys_dir().create().await?;
        Ok(())
    }
}
