//! Daemon mode: scheduled runs until a shutdown signal arrives.

pub mod scheduler;
pub mod shutdown;
