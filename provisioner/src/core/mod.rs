//! Deterministic, pure logic shared by the provisioner.
//!
//! Core modules must be free of I/O side effects. They operate on file
//! contents and configuration already read by `io` and return plans or
//! verdicts suitable for tests.

pub mod accounts;
pub mod cluster;
pub mod edits;
pub mod os_release;
pub mod plan;
pub mod types;
