//! Terminal frontend: command dispatch and table rendering

use tracing::info;

use crate::client::fleet::FleetClient;
use crate::engine::naming;
use crate::errors::ManagerError;

pub const COMMANDS: &[(&str, &str)] = &[
    ("deploy", "build the app and push it to the target"),
    ("run <id>", "start a pushed deploy on a fresh port"),
    ("stop <id>", "stop a running deploy"),
    ("list", "show fleet-wide deploy state"),
    ("set <id|port>", "switch live traffic to a deploy"),
    ("cleanup <id>", "delete a stopped deploy's files"),
    ("kill-unknown", "kill untracked processes in the port range"),
    ("shutdown", "kill all managed processes and stop the manager"),
    ("help", "show this help"),
];

/// Fixed-width table definition
struct TableDef {
    columns: Vec<(&'static str, usize)>,
}

impl TableDef {
    fn print_header(&self) {
        let mut line = String::new();
        for (name, width) in &self.columns {
            line.push_str(&pad(name, *width));
            line.push(' ');
        }
        println!("{}", line.trim_end());
        println!("{}", "-".repeat(line.trim_end().len()));
    }

    fn print_row(&self, cells: &[String]) {
        let mut line = String::new();
        for ((_, width), cell) in self.columns.iter().zip(cells) {
            line.push_str(&pad(cell, *width));
            line.push(' ');
        }
        println!("{}", line.trim_end());
    }
}

fn pad(text: &str, width: usize) -> String {
    let mut out = text.to_string();
    if out.len() > width {
        out.truncate(width);
    } else {
        while out.len() < width {
            out.push(' ');
        }
    }
    out
}

fn yn(b: bool) -> &'static str {
    if b {
        "y"
    } else {
        "n"
    }
}

/// Command dispatcher over a connected fleet client
pub struct TerminalClient {
    client: FleetClient,
}

impl TerminalClient {
    pub fn new(client: FleetClient) -> Self {
        Self { client }
    }

    pub async fn dispatch(&self, command: &str, args: &[String]) -> Result<(), ManagerError> {
        match command {
            "deploy" => self.deploy_cmd().await,
            "run" => self.run_cmd(args).await,
            "stop" => self.stop_cmd(args).await,
            "list" => self.list_cmd().await,
            "set" => self.set_cmd(args).await,
            "cleanup" => self.cleanup_cmd(args).await,
            "kill-unknown" => self.client.kill_unknown().await,
            "shutdown" => self.client.shutdown().await,
            "help" => {
                print_usage();
                Ok(())
            }
            other => {
                println!("Unknown command '{}'", other);
                print_usage();
                Ok(())
            }
        }
    }

    async fn deploy_cmd(&self) -> Result<(), ManagerError> {
        self.client.build().await?;

        let deploy_id = naming::new_deploy_id();
        self.client.push(&deploy_id).await?;

        println!("Deployed '{}'", deploy_id);
        Ok(())
    }

    async fn run_cmd(&self, args: &[String]) -> Result<(), ManagerError> {
        let deploy_id = required_arg(args, "deploy id")?;
        for (host, port) in self.client.run(deploy_id).await? {
            println!("{}: running on port {}", host, port);
        }
        Ok(())
    }

    async fn stop_cmd(&self, args: &[String]) -> Result<(), ManagerError> {
        let deploy_id = required_arg(args, "deploy id")?;
        self.client.stop(deploy_id).await?;
        println!("stopped");
        Ok(())
    }

    async fn set_cmd(&self, args: &[String]) -> Result<(), ManagerError> {
        let id_or_port = required_arg(args, "deploy id or port")?;
        match id_or_port.parse::<u16>() {
            Ok(port) => self.client.set_active_by_port(port).await?,
            Err(_) => self.client.set_active_by_id(id_or_port).await?,
        }
        println!("Active deploy set");
        Ok(())
    }

    async fn cleanup_cmd(&self, args: &[String]) -> Result<(), ManagerError> {
        let deploy_id = required_arg(args, "deploy id")?;
        self.client.cleanup(deploy_id).await?;
        info!("cleaned up '{}'", deploy_id);
        Ok(())
    }

    async fn list_cmd(&self) -> Result<(), ManagerError> {
        let deploys = self.client.list_deploys(None).await?;

        println!("Deploys:");
        let tbl = TableDef {
            columns: vec![
                ("host", 10),
                ("id", 32),
                ("pid", 7),
                ("tracked", 7),
                ("port", 5),
                ("health", 6),
                ("set", 3),
                ("messages", 40),
            ],
        };
        tbl.print_header();

        for (host, deploy) in deploys {
            tbl.print_row(&[
                host,
                deploy.id.clone(),
                deploy.pid.to_string(),
                yn(deploy.tracked).to_string(),
                deploy.port.to_string(),
                deploy.health.to_string(),
                yn(deploy.set).to_string(),
                deploy.errors.join("; "),
            ]);
        }
        Ok(())
    }
}

fn required_arg<'a>(args: &'a [String], what: &str) -> Result<&'a String, ManagerError> {
    args.first()
        .ok_or_else(|| ManagerError::ConfigInvalid(format!("missing {}", what)))
}

pub fn print_usage() {
    println!("usage: stevedore [flags] <command> [args...]");
    println!();
    println!("Available commands:");
    for (name, description) in COMMANDS {
        println!("  {:<16} {}", name, description);
    }
    println!();
    println!("Client flags:");
    println!("  --deploy-file=<path>  application descriptor (default: deploy.json)");
    println!("  --target=<name>       target or group target from the descriptor");
    println!("  --local               local test mode: no ssh, everything on this machine");
    println!();
    println!("Server mode:");
    println!("  --server              run the manager");
    println!("  --root=<dir>          data root (default: .)");
    println!("  --port=<base>         base port (default: 8100)");
    println!("  --no-enforce          disable the desired-state enforcer");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_truncates() {
        assert_eq!(pad("ab", 4), "ab  ");
        assert_eq!(pad("abcdef", 4), "abcd");
    }

    #[test]
    fn yes_no_rendering() {
        assert_eq!(yn(true), "y");
        assert_eq!(yn(false), "n");
    }
}
