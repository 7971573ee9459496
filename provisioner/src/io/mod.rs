//! I/O helpers for provisioning: config, host files, child processes, output.

pub mod config;
pub mod executor;
pub mod host;
pub mod process;
pub mod tee;
