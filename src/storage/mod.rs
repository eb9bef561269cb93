//! Persistent state: deploy directories and the tracked port map

pub mod config;
pub mod layout;
