//! Deploy records as reported by `ListDeploys`

use serde::{Deserialize, Serialize};

/// A deploy as seen by the manager: the merge of the on-disk artifact set,
/// the tracked port map and the live process snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deploy {
    /// Stable id assigned at push time. Listening processes that match no
    /// known deploy are reported under a `<procname>-<port>` pseudo-id.
    pub id: String,

    /// Present in the tracked port map (desired state)
    pub tracked: bool,

    /// Configured port if tracked, else the observed listening port,
    /// else -1
    pub port: i32,

    /// Observed pid listening on `port`, 0 if none
    pub pid: u32,

    /// Latest health probe: positive HTTP status code, 0 when no probe was
    /// attempted, -1 on network error or timeout, -2 when the deploy's
    /// descriptor file is missing
    pub health: i32,

    /// Whether this deploy's port is the load balancer's active backend
    pub set: bool,

    /// Accumulated notes from the most recent list
    pub errors: Vec<String>,
}

impl Deploy {
    /// Port sentinel for "not configured and not observed"
    pub const NO_PORT: i32 = -1;

    pub const HEALTH_UNKNOWN: i32 = 0;
    pub const HEALTH_UNREACHABLE: i32 = -1;
    pub const HEALTH_NO_DESCRIPTOR: i32 = -2;
}
