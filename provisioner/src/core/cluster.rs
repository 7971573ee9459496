//! Two-state model of the control plane on this host.

/// Whether `kubeadm init` has already run here.
///
/// Derived from a single probe: existence of the kube-apiserver static pod
/// manifest, which `kubeadm init` writes and `kubeadm reset` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Uninitialized,
    Initialized,
}

impl ClusterState {
    pub fn from_marker(marker_present: bool) -> Self {
        if marker_present {
            ClusterState::Initialized
        } else {
            ClusterState::Uninitialized
        }
    }

    pub fn needs_reset(self) -> bool {
        self == ClusterState::Initialized
    }

    /// State after the reset sequence has run.
    pub fn reset(self) -> Self {
        ClusterState::Uninitialized
    }
}
