//! Client side: reaches one or more managers and drives deploys end to end

pub mod channel;
pub mod fleet;
pub mod host;
