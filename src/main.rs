//! stevedore - Entry point
//!
//! One binary, two roles: `--server` runs the on-host manager; anything else
//! is a client command dispatched against the targets in the application's
//! deploy descriptor.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use stevedore::app::options::AppOptions;
use stevedore::app::run::run;
use stevedore::client::fleet::FleetClient;
use stevedore::errors::ManagerError;
use stevedore::logs::{init_logging, LogOptions};
use stevedore::terminal::{print_usage, TerminalClient};
use stevedore::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments: --key=value flags, bare --flags, and
    // positional command words.
    let args: Vec<String> = env::args().collect();
    let mut flags: HashMap<String, String> = HashMap::new();
    let mut positional: Vec<String> = Vec::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            flags.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with('-') {
            let clean_key = arg.trim_start_matches('-');
            flags.insert(clean_key.to_string(), "true".to_string());
        } else {
            positional.push(arg.clone());
        }
    }

    if flags.contains_key("version") {
        println!(
            "{}",
            serde_json::to_string_pretty(&version_info()).unwrap_or_default()
        );
        return;
    }

    let log_level = flags
        .get("log-level")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    if let Err(e) = init_logging(LogOptions {
        log_level,
        ..Default::default()
    }) {
        println!("Failed to initialize logging: {e}");
    }

    let result = if flags.contains_key("server") {
        run_server(&flags).await
    } else {
        run_client(&flags, &positional).await
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_server(flags: &HashMap<String, String>) -> Result<(), ManagerError> {
    let options = AppOptions {
        root: flags
            .get("root")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        port_base: parse_port(flags.get("port"))?,
        enable_enforcer: !flags.contains_key("no-enforce"),
        ..AppOptions::default()
    };

    info!("Running deploy manager with options: {:?}", options);
    run(options, await_shutdown_signal()).await
}

fn parse_port(value: Option<&String>) -> Result<u16, ManagerError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| ManagerError::ConfigInvalid(format!("invalid port: {}", v))),
        None => Ok(AppOptions::default().port_base),
    }
}

async fn run_client(
    flags: &HashMap<String, String>,
    positional: &[String],
) -> Result<(), ManagerError> {
    let Some(command) = positional.first() else {
        print_usage();
        return Ok(());
    };

    if command == "help" {
        print_usage();
        return Ok(());
    }

    let deploy_file = flags
        .get("deploy-file")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("deploy.json"));
    let target = flags.get("target").map(|s| s.as_str());
    let local_test = flags.contains_key("local");

    let client = FleetClient::connect(&deploy_file, target, local_test).await?;
    let terminal = TerminalClient::new(client);
    terminal.dispatch(command, &positional[1..]).await
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
