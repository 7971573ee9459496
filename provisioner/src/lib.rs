//! Single-node Kubernetes host provisioner.
//!
//! This crate runs a fixed, ordered list of host-mutation steps (packages,
//! kernel modules, sysctl, containerd, swap, Kubernetes tools, `kubeadm init`,
//! kubeconfig, CNI) and stops at the first failure. The architecture enforces
//! a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (os-release matching, account
//!   selection, cluster state, file edits, the step plan). No I/O.
//! - **[`io`]**: Side-effecting operations (config, host files, child
//!   processes, the terminal/syslog output tee).
//!
//! Orchestration modules ([`preflight`], [`provision`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod preflight;
pub mod provision;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
