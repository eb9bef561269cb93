//! Shared server state

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::Engine;

/// State handed to every RPC handler
pub struct ServerState {
    pub engine: Arc<Engine>,
    /// Fired by the `Shutdown` RPC; the serve loop and workers listen on it
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(engine: Arc<Engine>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            engine,
            shutdown_tx,
        }
    }
}
