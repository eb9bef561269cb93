//! Desired-state enforcement worker
//!
//! Periodically reconciles the tracked port map against the live process
//! snapshot: tracked-but-silent deploys are restarted, foreign processes on
//! tracked ports are reported. The worker only ever reads the config.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Enforcer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Pause between reconciliation ticks
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the enforcer worker until the shutdown signal fires
pub async fn run<S, F>(
    options: &Options,
    engine: Arc<Engine>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Enforcer worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Enforcer worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with the tick
            }
        }

        debug!("Enforcing desired state...");
        engine.enforce().await;
    }
}
