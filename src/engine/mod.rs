//! Deploy lifecycle engine
//!
//! Owns the tracked port map and everything that acts on it: running,
//! stopping and cleaning up deploys, switching the active deploy, and the
//! fleet-state listing. All config mutations go through one mutex and are
//! persisted before any process is spawned or signalled, so a crash between
//! the two leaves state the enforcer can recover from.

pub mod haproxy;
pub mod naming;
pub mod ports;
pub mod supervisor;

use std::collections::HashSet;
use std::path::PathBuf;

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::ManagerError;
use crate::filesys::file::File;
use crate::models::application::Application;
use crate::models::deploy::Deploy;
use crate::probe;
use crate::storage::config::PortsConfig;
use crate::storage::layout::StorageLayout;

use haproxy::HaproxyController;
use supervisor::Supervisor;

/// Shortest substring accepted when resolving a deploy id
pub const MIN_SHORT_NAME_LENGTH: usize = 3;

/// Reply to a `NewDeployDir` request: a fresh id and where the push channel
/// should place it. The directory itself is not created here.
#[derive(Debug, Clone)]
pub struct NewDeployDir {
    pub deploy_id: String,
    pub path: PathBuf,
}

pub struct Engine {
    layout: StorageLayout,
    start_port: u16,
    end_port: u16,
    config: Mutex<PortsConfig>,
    supervisor: Supervisor,
    haproxy: HaproxyController,
    status_client: reqwest::Client,
}

impl Engine {
    pub async fn new(root: impl Into<PathBuf>, port_base: u16) -> Result<Self, ManagerError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;

        let layout = StorageLayout::new(root);
        layout.setup().await?;

        let config = PortsConfig::load(&layout.config_file()).await?;
        let supervisor = Supervisor::new(layout.clone())?;
        let haproxy = HaproxyController::new(&layout, port_base);
        let status_client = reqwest::Client::builder()
            .timeout(supervisor::MAX_HEALTH_CHECK_TIME)
            .build()?;

        Ok(Self {
            layout,
            start_port: port_base + 1,
            end_port: port_base + 99,
            config: Mutex::new(config),
            supervisor,
            haproxy,
            status_client,
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn port_range(&self) -> (u16, u16) {
        (self.start_port, self.end_port)
    }

    pub fn deploys_path(&self) -> PathBuf {
        self.layout.deploys_dir().path().to_path_buf()
    }

    /// A fresh deploy id plus its destination directory
    pub fn new_deploy_dir(&self) -> NewDeployDir {
        let deploy_id = naming::new_deploy_id();
        let path = self.layout.deploy_dir(&deploy_id).path().to_path_buf();
        NewDeployDir { deploy_id, path }
    }

    pub async fn config_snapshot(&self) -> PortsConfig {
        self.config.lock().await.clone()
    }

    /// Resolve a short substring to a full deploy id. The input must be at
    /// least [`MIN_SHORT_NAME_LENGTH`] characters and match exactly one
    /// on-disk deploy.
    pub async fn resolve_deploy_id(&self, short_name: &str) -> Result<String, ManagerError> {
        if short_name.len() < MIN_SHORT_NAME_LENGTH {
            return Err(ManagerError::ConfigInvalid(format!(
                "deploy name substring must be at least {} characters",
                MIN_SHORT_NAME_LENGTH
            )));
        }

        let mut matches: Vec<String> = self
            .layout
            .read_deploy_ids()
            .await?
            .into_iter()
            .filter(|id| id.contains(short_name))
            .collect();

        match matches.len() {
            0 => Err(ManagerError::NotFound(short_name.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(ManagerError::Ambiguous {
                name: short_name.to_string(),
                count,
            }),
        }
    }

    /// Track a deploy on a freshly allocated port and start it.
    ///
    /// The config entry is persisted before the spawn: if the manager dies
    /// mid-start, the enforcer finds the tracked-but-silent port and brings
    /// the deploy up on its next tick. For the same reason a failed health
    /// check leaves the entry in place.
    pub async fn run(&self, short_name: &str) -> Result<u16, ManagerError> {
        let deploy_id = self.resolve_deploy_id(short_name).await?;

        let port = {
            let mut config = self.config.lock().await;
            if let Some(port) = config.port_of(&deploy_id) {
                return Err(ManagerError::AlreadyConfigured { deploy_id, port });
            }

            // Validate the descriptor before anything is committed, so a
            // broken deploy never enters the tracked map.
            Application::from_file(&self.layout.deploy_config_file(&deploy_id), false).await?;

            let port = ports::find_unused(&config, self.start_port, self.end_port).await?;

            let mut next = config.clone();
            next.ports.insert(port, deploy_id.clone());
            next.store(&self.layout.config_file()).await?;
            *config = next;
            port
        };

        info!(deploy_id = %deploy_id, port, "tracked deploy, starting");
        self.supervisor.start_deploy(&deploy_id, port).await?;
        Ok(port)
    }

    /// Untrack a deploy and terminate its process group.
    ///
    /// The config entry is removed and persisted before the signal is sent,
    /// so the enforcer cannot race a restart against the kill.
    pub async fn stop(&self, deploy_id: &str) -> Result<(), ManagerError> {
        let procs = probe::find_listening(self.start_port, self.end_port).await;
        let Some(proc) = probe::by_deploy_id(&procs).get(deploy_id).cloned() else {
            return Err(ManagerError::NotRunning(deploy_id.to_string()));
        };

        {
            let mut config = self.config.lock().await;
            if let Some(port) = config.port_of(deploy_id) {
                let mut next = config.clone();
                next.ports.remove(&port);
                next.store(&self.layout.config_file()).await?;
                *config = next;
            }
        }

        info!(deploy_id, pid = proc.pid, "stopping deploy");
        supervisor::terminate_group(proc.pid);
        Ok(())
    }

    /// Remove a deploy's artifact directory. Refused while the deploy is
    /// still listening.
    pub async fn cleanup(&self, deploy_id: &str) -> Result<(), ManagerError> {
        let procs = probe::find_listening(self.start_port, self.end_port).await;
        if probe::by_deploy_id(&procs).contains_key(deploy_id) {
            return Err(ManagerError::StillRunning(deploy_id.to_string()));
        }

        {
            let mut config = self.config.lock().await;
            if let Some(port) = config.port_of(deploy_id) {
                let mut next = config.clone();
                next.ports.remove(&port);
                next.store(&self.layout.config_file()).await?;
                *config = next;
            }
        }

        let dir = self.layout.deploy_dir(deploy_id);
        if !dir.exists().await {
            return Err(ManagerError::NotFound(deploy_id.to_string()));
        }
        dir.delete().await
    }

    /// Point the load balancer at an application port
    pub async fn set_active_by_port(&self, port: u16) -> Result<(), ManagerError> {
        if port < self.start_port {
            return Err(ManagerError::InvalidTarget(format!(
                "port {} is below the deploy range",
                port
            )));
        }
        self.haproxy.activate(port).await
    }

    /// Point the load balancer at a tracked deploy's configured port
    pub async fn set_active_by_id(&self, deploy_id: &str) -> Result<(), ManagerError> {
        let port = self
            .config_snapshot()
            .await
            .port_of(deploy_id)
            .ok_or_else(|| ManagerError::NotFound(deploy_id.to_string()))?;
        self.set_active_by_port(port).await
    }

    /// Merge the on-disk deploy set, the tracked map and the live process
    /// snapshot into one report. Tracked, listening deploys get their health
    /// endpoint probed in parallel. `filter` restricts the result to ids
    /// matching the regex.
    pub async fn list_deploys(&self, filter: Option<&Regex>) -> Result<Vec<Deploy>, ManagerError> {
        let procs = probe::find_listening(self.start_port, self.end_port).await;
        let config = self.config_snapshot().await;
        let by_deploy = probe::by_deploy_id(&procs);
        let by_pid = probe::by_pid(&procs);
        let mut unaccounted = probe::by_port(&procs);

        let mut deploys = Vec::new();
        let mut to_check = Vec::new();
        for deploy_id in self.layout.read_deploy_ids().await? {
            let mut proc = by_deploy.get(&deploy_id).cloned();
            let mut errors = Vec::new();

            // A pid override lets a child process (e.g. an app-managed
            // proxy) stand in as the deploy's identity.
            match self.pid_override(&deploy_id).await {
                Ok(Some(pid)) => {
                    if let Some(p) = by_pid.get(&pid) {
                        proc = Some(p.clone());
                    }
                }
                Ok(None) => {}
                Err(e) => errors.push(e.to_string()),
            }

            let tracked = config.is_tracked(&deploy_id);
            let deploy = match proc {
                Some(p) => {
                    unaccounted.remove(&p.port);
                    if tracked {
                        to_check.push(deploys.len());
                    }
                    Deploy {
                        id: deploy_id,
                        tracked,
                        port: p.port as i32,
                        pid: p.pid,
                        errors,
                        ..Deploy::default()
                    }
                }
                None => {
                    let port = config
                        .port_of(&deploy_id)
                        .map(|p| p as i32)
                        .unwrap_or(Deploy::NO_PORT);
                    Deploy {
                        id: deploy_id,
                        tracked,
                        port,
                        errors,
                        ..Deploy::default()
                    }
                }
            };
            deploys.push(deploy);
        }

        // Listening processes matching no known deploy are reported too,
        // under a name-port pseudo id.
        let mut extras: Vec<probe::Process> = unaccounted.into_values().collect();
        extras.sort_by_key(|p| p.port);
        for p in extras {
            deploys.push(Deploy {
                id: format!("{}-{}", p.name, p.port),
                port: p.port as i32,
                pid: p.pid,
                ..Deploy::default()
            });
        }

        self.check_all_health(&mut deploys, &to_check).await;

        if let Some(active) = self.haproxy.active_port(&self.status_client).await {
            for deploy in &mut deploys {
                if deploy.port == active as i32 {
                    deploy.set = true;
                }
            }
        }

        if let Some(re) = filter {
            deploys.retain(|d| re.is_match(&d.id));
        }
        Ok(deploys)
    }

    /// Scatter one health probe per deploy, join before returning. Each task
    /// owns its own result slot; nothing shared is mutated concurrently.
    async fn check_all_health(&self, deploys: &mut [Deploy], indexes: &[usize]) {
        let mut handles = Vec::new();
        for &i in indexes {
            let supervisor = self.supervisor.clone();
            let config_file = self.layout.deploy_config_file(&deploys[i].id);
            let port = deploys[i].port as u16;
            let handle =
                tokio::spawn(async move { check_health(supervisor, config_file, port).await });
            handles.push((i, handle));
        }

        for (i, handle) in handles {
            if let Ok((health, mut errors)) = handle.await {
                deploys[i].health = health;
                deploys[i].errors.append(&mut errors);
            }
        }
    }

    /// The pid recorded in the deploy's override file. Absent file means no
    /// override; a file that exists but will not parse is an error.
    pub async fn pid_override(&self, deploy_id: &str) -> Result<Option<u32>, ManagerError> {
        let file = self.layout.pid_override_file(deploy_id);
        if !file.exists().await {
            return Ok(None);
        }
        let text = file.read_string().await?;
        let pid = text.trim().parse().map_err(|_| {
            ManagerError::ConfigInvalid(format!(
                "invalid pid in {}",
                file.path().display()
            ))
        })?;
        Ok(Some(pid))
    }

    /// Kill every listening process in the range that does not belong to an
    /// on-disk deploy. Returns the pids that were signalled.
    pub async fn kill_unknown(&self) -> Result<Vec<u32>, ManagerError> {
        let procs = probe::find_listening(self.start_port, self.end_port).await;
        let known: HashSet<String> = self.layout.read_deploy_ids().await?.into_iter().collect();

        let mut killed = Vec::new();
        for proc in procs {
            if !known.contains(&proc.deploy_id) {
                warn!(pid = proc.pid, port = proc.port, name = %proc.name, "killing unknown process");
                supervisor::kill_pid(proc.pid);
                killed.push(proc.pid);
            }
        }
        Ok(killed)
    }

    /// Best-effort kill of every listening process in the managed range
    pub async fn shutdown_processes(&self) -> usize {
        let procs = probe::find_listening(self.start_port, self.end_port).await;
        let count = procs.len();
        for proc in procs {
            info!(pid = proc.pid, port = proc.port, "killing on shutdown");
            supervisor::kill_pid(proc.pid);
        }
        count
    }

    /// One reconciliation tick: start tracked deploys that are not
    /// listening, report ports owned by the wrong process. Never mutates the
    /// config.
    pub async fn enforce(&self) {
        let config = self.config_snapshot().await;
        let procs = probe::find_listening(self.start_port, self.end_port).await;
        let by_port = probe::by_port(&procs);
        let by_pid = probe::by_pid(&procs);

        for (&port, deploy_id) in &config.ports {
            let Some(proc) = by_port.get(&port) else {
                info!(deploy_id = %deploy_id, port, "tracked deploy not listening, starting");
                if let Err(e) = self.supervisor.start_deploy(deploy_id, port).await {
                    warn!(deploy_id = %deploy_id, port, "failed to start deploy: {}", e);
                }
                continue;
            };

            match self.pid_override(deploy_id).await {
                // The override pid is alive in our range: the deploy is
                // considered correctly running regardless of cwd.
                Ok(Some(pid)) if by_pid.contains_key(&pid) => continue,
                Ok(_) => {}
                Err(e) => warn!(deploy_id = %deploy_id, "could not read pid override: {}", e),
            }

            if proc.deploy_id != *deploy_id {
                let running = if proc.deploy_id.is_empty() {
                    format!("(pid:{})", proc.pid)
                } else {
                    proc.deploy_id.clone()
                };
                // Mismatches are reported, not auto-corrected.
                warn!(port, expected = %deploy_id, running = %running, "unexpected process on tracked port");
            }
        }
    }
}

async fn check_health(supervisor: Supervisor, config_file: File, port: u16) -> (i32, Vec<String>) {
    let app = match Application::from_file(&config_file, false).await {
        Ok(app) => app,
        Err(e) => {
            return (
                Deploy::HEALTH_NO_DESCRIPTOR,
                vec![format!("missing deploy config ({})", e)],
            )
        }
    };
    match supervisor.probe_health(port, app.health_endpoint()).await {
        Ok(status) => (status as i32, Vec::new()),
        Err(e) => (Deploy::HEALTH_UNREACHABLE, vec![e.to_string()]),
    }
}
