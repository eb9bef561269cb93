//! Embedded load-balancer control
//!
//! Traffic is switched between deploys by rewriting an HAProxy config whose
//! single backend points at the active application port, then reloading
//! HAProxy with `-sf <old pid>` so the old process hands its listeners over
//! without dropping connections. The stats page doubles as the readback
//! surface: the backend name embeds the active port, so scraping the CSV
//! export recovers which deploy is live.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::info;

use crate::engine::supervisor;
use crate::errors::ManagerError;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;

/// Backend names are `deployed-app-<port>`; the name is what ties a stats
/// row back to the active application port.
pub const BACKEND_NAME_PREFIX: &str = "deployed-app-";

// Stats CSV column offsets.
const PXNAME_INDEX: usize = 0;
const STATUS_INDEX: usize = 17;

const CONFIG_TEMPLATE: &str = "\
global
    daemon

defaults
    mode http
    timeout connect 5000
    timeout client 50000
    timeout server 50000

listen stats
    bind *:%STATS_PORT%
    mode http
    stats enable
    stats hide-version
    stats uri /

frontend main
    bind *:%FRONT_PORT%
    default_backend %BACKEND%

backend %BACKEND%
    balance leastconn
    server app-server-%APP_PORT% 127.0.0.1:%APP_PORT% check inter 2000
";

/// Render the full HAProxy configuration for one active application port
pub fn render_config(stats_port: u16, front_port: u16, app_port: u16) -> String {
    CONFIG_TEMPLATE
        .replace("%STATS_PORT%", &stats_port.to_string())
        .replace("%FRONT_PORT%", &front_port.to_string())
        .replace("%BACKEND%", &backend_name(app_port))
        .replace("%APP_PORT%", &app_port.to_string())
}

pub fn backend_name(app_port: u16) -> String {
    format!("{}{}", BACKEND_NAME_PREFIX, app_port)
}

/// One stats CSV row -> (port, up). `None` for header rows and rows that are
/// not the managed backend.
pub fn parse_backend_row(row: &str) -> Option<(u16, bool)> {
    let fields: Vec<&str> = row.split(',').collect();
    let pxname = fields.get(PXNAME_INDEX)?;
    let port: u16 = pxname.strip_prefix(BACKEND_NAME_PREFIX)?.parse().ok()?;
    let up = fields.get(STATUS_INDEX).map(|s| *s == "UP").unwrap_or(false);
    Some((port, up))
}

/// The active application port according to a stats CSV dump: the first
/// `deployed-app-<port>` row whose status is UP.
pub fn parse_stats_csv(text: &str) -> Option<u16> {
    text.lines()
        .skip(1)
        .filter_map(parse_backend_row)
        .find(|(_, up)| *up)
        .map(|(port, _)| port)
}

/// Writes the config and drives reloads of the HAProxy child
#[derive(Debug, Clone)]
pub struct HaproxyController {
    config_file: PathBuf,
    pid_file: PathBuf,
    stats_port: u16,
    front_port: u16,
}

impl HaproxyController {
    /// Stats on `base+99`, frontend on `base+98`
    pub fn new(layout: &StorageLayout, port_base: u16) -> Self {
        Self {
            config_file: layout.haproxy_config_file().path().to_path_buf(),
            pid_file: layout.haproxy_pid_file().path().to_path_buf(),
            stats_port: port_base + 99,
            front_port: port_base + 98,
        }
    }

    pub fn stats_port(&self) -> u16 {
        self.stats_port
    }

    pub fn front_port(&self) -> u16 {
        self.front_port
    }

    /// Point the frontend at `app_port` and reload.
    ///
    /// The config write happens before the reload is invoked; HAProxy's own
    /// `-sf` handoff makes the listener switch atomic from the caller's
    /// point of view.
    pub async fn activate(&self, app_port: u16) -> Result<(), ManagerError> {
        let config = render_config(self.stats_port, self.front_port, app_port);
        File::new(&self.config_file).write_string(&config).await?;

        let running_pid = self.read_pid().await?;
        info!(
            app_port,
            old_pid = running_pid.unwrap_or(0),
            "reloading haproxy"
        );

        let mut cmd = Command::new("haproxy");
        cmd.arg("-f")
            .arg(&self.config_file)
            .arg("-p")
            .arg(&self.pid_file);
        if let Some(pid) = running_pid {
            cmd.arg("-sf").arg(pid.to_string());
        }
        supervisor::detach(&mut cmd);

        let status = cmd.status().await.map_err(|e| ManagerError::ExternalCommand {
            command: "haproxy".to_string(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(ManagerError::ExternalCommand {
                command: "haproxy".to_string(),
                reason: format!("exit status {}", status),
            });
        }
        Ok(())
    }

    /// Pid of the currently running HAProxy, if the pid file exists.
    /// A present-but-unparseable pid file is an error; a missing one just
    /// means a fresh start.
    async fn read_pid(&self) -> Result<Option<u32>, ManagerError> {
        let file = File::new(&self.pid_file);
        if !file.exists().await {
            return Ok(None);
        }
        let text = file.read_string().await?;
        let pid = text.trim().parse().map_err(|_| {
            ManagerError::ConfigInvalid(format!("invalid pid data in {}", self.pid_file.display()))
        })?;
        Ok(Some(pid))
    }

    /// The port currently marked UP on the stats page, or `None` when
    /// HAProxy is not running or has no healthy backend.
    pub async fn active_port(&self, client: &reqwest::Client) -> Option<u16> {
        let url = format!("http://localhost:{}/;csv", self.stats_port);
        let body = client.get(&url).send().await.ok()?.text().await.ok()?;
        parse_stats_csv(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ports_and_backend_name() {
        let config = render_config(8199, 8198, 8103);
        assert!(config.contains("bind *:8199"));
        assert!(config.contains("bind *:8198"));
        assert!(config.contains("default_backend deployed-app-8103"));
        assert!(config.contains("backend deployed-app-8103"));
        assert!(config.contains("server app-server-8103 127.0.0.1:8103 check inter 2000"));
    }

    fn csv_row(pxname: &str, status: &str) -> String {
        // 18+ comma-separated fields with status at index 17.
        let mut fields = vec![pxname.to_string()];
        fields.extend(std::iter::repeat(String::new()).take(16));
        fields.push(status.to_string());
        fields.join(",")
    }

    #[test]
    fn parses_active_backend_from_stats() {
        let text = format!(
            "# pxname,svname,...\n{}\n{}\n",
            csv_row("stats", "OPEN"),
            csv_row("deployed-app-8103", "UP"),
        );
        assert_eq!(parse_stats_csv(&text), Some(8103));
    }

    #[test]
    fn down_backend_is_not_active() {
        let text = format!("# header\n{}\n", csv_row("deployed-app-8103", "DOWN"));
        assert_eq!(parse_stats_csv(&text), None);
    }

    #[test]
    fn ignores_unrelated_rows() {
        assert_eq!(parse_backend_row(&csv_row("frontend-main", "OPEN")), None);
        assert_eq!(parse_backend_row(&csv_row("deployed-app-notaport", "UP")), None);
        assert_eq!(
            parse_backend_row(&csv_row("deployed-app-8103", "UP")),
            Some((8103, true))
        );
    }

    #[test]
    fn truncated_row_is_not_up() {
        // A backend row with too few columns parses but can never be UP.
        assert_eq!(parse_backend_row("deployed-app-8103,x"), Some((8103, false)));
    }
}
