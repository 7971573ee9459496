//! Stable exit codes for provisioner CLI commands.
//!
//! A failed step exits with the failing command's own status instead; these
//! cover everything else.

/// Provisioning (or the requested command) completed.
pub const OK: i32 = 0;
/// Invalid config or usage, internal error, or a step failure without a usable status.
pub const FAILED: i32 = 1;
/// A preflight guard rejected the host before anything was changed.
pub const PRECONDITION: i32 = 2;
