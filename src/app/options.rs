//! Manager configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::workers::enforcer;

/// Main manager options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Data root: deploy artifacts, the tracked port map and the load
    /// balancer files all live under here
    pub root: PathBuf,

    /// Base port. The RPC endpoint binds here; deploy ports are
    /// `base+1..=base+99`, the frontend `base+98`, stats `base+99`.
    pub port_base: u16,

    /// Run the desired-state enforcer in the background
    pub enable_enforcer: bool,

    /// Enforcer worker options
    pub enforcer: enforcer::Options,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            port_base: 8100,
            enable_enforcer: true,
            enforcer: enforcer::Options::default(),
            max_shutdown_delay: Duration::from_secs(10),
        }
    }
}
