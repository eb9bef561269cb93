//! Manager run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::engine::Engine;
use crate::errors::ManagerError;
use crate::server::serve::{serve, ServerOptions};
use crate::server::state::ServerState;
use crate::workers::enforcer;

/// Run the manager: bring up the engine, the enforcer worker and the RPC
/// server, then wait for either the external shutdown signal or a
/// `Shutdown` RPC.
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ManagerError> {
    info!(
        root = %options.root.display(),
        port_base = options.port_base,
        "Initializing deploy manager..."
    );

    let engine = Arc::new(Engine::new(options.root.clone(), options.port_base).await?);

    let (shutdown_tx, _): (broadcast::Sender<()>, _) = broadcast::channel(1);

    let enforcer_handle = if options.enable_enforcer {
        Some(spawn_enforcer(
            options.enforcer.clone(),
            engine.clone(),
            shutdown_tx.subscribe(),
        ))
    } else {
        info!("Enforcer disabled");
        None
    };

    let state = Arc::new(ServerState::new(engine, shutdown_tx.clone()));
    let server_options = ServerOptions {
        port: options.port_base,
        ..ServerOptions::default()
    };
    let mut server_rx = shutdown_tx.subscribe();
    let (server_handle, _) = serve(&server_options, state, async move {
        let _ = server_rx.recv().await;
    })
    .await?;

    // Either the caller's signal (ctrl-c / SIGTERM) or a Shutdown RPC ends
    // the run; the latter arrives through the broadcast channel.
    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
        _ = wait_for_shutdown(shutdown_tx.subscribe()) => {
            info!("Shutdown requested over RPC...");
        }
    }

    let _ = shutdown_tx.send(());
    shutdown(options, server_handle, enforcer_handle).await
}

async fn wait_for_shutdown(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

fn spawn_enforcer(
    options: enforcer::Options,
    engine: Arc<Engine>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Initializing enforcer worker...");
    tokio::spawn(async move {
        enforcer::run(
            &options,
            engine,
            |wait| tokio::time::sleep(wait),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    })
}

async fn shutdown(
    options: AppOptions,
    server_handle: JoinHandle<Result<(), ManagerError>>,
    enforcer_handle: Option<JoinHandle<()>>,
) -> Result<(), ManagerError> {
    info!("Shutting down deploy manager...");

    let join_all = async {
        if let Some(handle) = enforcer_handle {
            handle
                .await
                .map_err(|e| ManagerError::Shutdown(e.to_string()))?;
        }
        server_handle
            .await
            .map_err(|e| ManagerError::Shutdown(e.to_string()))?
    };

    match tokio::time::timeout(options.max_shutdown_delay, join_all).await {
        Ok(result) => {
            info!("Shutdown complete");
            result
        }
        Err(_) => {
            error!(
                "Shutdown timed out after {:?}, forcing exit...",
                options.max_shutdown_delay
            );
            std::process::exit(1);
        }
    }
}
