//! stevedore — a deployment manager for a single application
//!
//! Builds the artifact locally, pushes it to one or more remote hosts,
//! starts it on a dynamically chosen port, health-checks it, and atomically
//! switches the externally visible traffic between versions through an
//! embedded HAProxy reload. A background enforcer keeps tracked deploys
//! running.

pub mod app;
pub mod client;
pub mod engine;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod probe;
pub mod server;
pub mod storage;
pub mod terminal;
pub mod utils;
pub mod workers;
