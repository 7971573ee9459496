//! Guards evaluated before the host is touched.
//!
//! Preflight only reads files. Any failure here is a
//! [`ProvisionError::Precondition`] and the driver never starts.

use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::{debug, info};

use crate::core::accounts::{OperatorAccounts, parse_passwd, select_accounts};
use crate::core::cluster::ClusterState;
use crate::core::os_release::{OsRelease, parse_os_release};
use crate::error::ProvisionError;
use crate::io::config::ProvisionConfig;
use crate::io::host::Host;

/// Host facts gathered by preflight.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub release: OsRelease,
    pub accounts: OperatorAccounts,
    pub cluster_state: ClusterState,
}

/// Check the OS identity, pick the operator account, and probe the
/// control-plane marker.
pub fn preflight(cfg: &ProvisionConfig, host: &Host) -> Result<HostFacts, ProvisionError> {
    let release = check_os(cfg, host)?;
    let accounts = resolve_accounts(cfg, host)?;
    let cluster_state = ClusterState::from_marker(host.exists(&cfg.kubernetes.marker_path));
    info!(
        os = %release.id,
        version = %release.version_id,
        operator = %accounts.operator.name,
        cluster_state = ?cluster_state,
        "preflight passed"
    );
    Ok(HostFacts {
        release,
        accounts,
        cluster_state,
    })
}

fn check_os(cfg: &ProvisionConfig, host: &Host) -> Result<OsRelease, ProvisionError> {
    let path = &cfg.os_release_path;
    let contents = read_required(host, path)?;
    let release = parse_os_release(&contents)
        .with_context(|| format!("parse {}", path.display()))
        .map_err(ProvisionError::precondition)?;
    debug!(id = %release.id, version_id = %release.version_id, "read os-release");
    cfg.target
        .check(&release)
        .map_err(ProvisionError::precondition)?;
    Ok(release)
}

fn resolve_accounts(
    cfg: &ProvisionConfig,
    host: &Host,
) -> Result<OperatorAccounts, ProvisionError> {
    let path = &cfg.accounts.passwd_path;
    let contents = read_required(host, path)?;
    let accounts = parse_passwd(&contents)
        .with_context(|| format!("parse {}", path.display()))
        .map_err(ProvisionError::precondition)?;
    select_accounts(&accounts, &cfg.accounts.policy()).map_err(ProvisionError::precondition)
}

fn read_required(host: &Host, path: &Path) -> Result<String, ProvisionError> {
    host.read_optional(path)
        .map_err(ProvisionError::precondition)?
        .ok_or_else(|| ProvisionError::precondition(anyhow!("{} not found", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DEBIAN_BOOKWORM, FakeHost, UBUNTU_JAMMY};

    #[test]
    fn jammy_with_one_operator_passes() {
        let fake = FakeHost::ready().expect("fake host");
        let facts = preflight(&ProvisionConfig::default(), &fake.host()).expect("preflight");
        assert_eq!(facts.release.id, "ubuntu");
        assert_eq!(facts.accounts.operator.name, "ubuntu");
        assert_eq!(facts.cluster_state, ClusterState::Uninitialized);
    }

    #[test]
    fn marker_makes_cluster_initialized() {
        let fake = FakeHost::ready().expect("fake host");
        fake.with_marker(&ProvisionConfig::default()).expect("marker");
        let facts = preflight(&ProvisionConfig::default(), &fake.host()).expect("preflight");
        assert_eq!(facts.cluster_state, ClusterState::Initialized);
    }

    #[test]
    fn missing_os_release_is_precondition() {
        let fake = FakeHost::new().expect("fake host");
        let err = preflight(&ProvisionConfig::default(), &fake.host()).unwrap_err();
        assert!(matches!(err, ProvisionError::Precondition(_)));
        assert!(err.to_string().contains("/etc/os-release not found"));
    }

    #[test]
    fn other_distribution_is_precondition() {
        let fake = FakeHost::new().expect("fake host");
        fake.write("/etc/os-release", DEBIAN_BOOKWORM).expect("write");
        let err = preflight(&ProvisionConfig::default(), &fake.host()).unwrap_err();
        assert!(matches!(err, ProvisionError::Precondition(_)));
        assert!(err.to_string().contains("found debian 12"));
    }

    #[test]
    fn ambiguous_accounts_are_precondition() {
        let fake = FakeHost::new().expect("fake host");
        fake.write("/etc/os-release", UBUNTU_JAMMY).expect("write");
        fake.write(
            "/etc/passwd",
            "root:x:0:0:root:/root:/bin/bash\n\
             ubuntu:x:1000:1000::/home/ubuntu:/bin/bash\n\
             ubuntu-ops:x:1001:1001::/home/ubuntu-ops:/bin/bash\n",
        )
        .expect("write");
        let err = preflight(&ProvisionConfig::default(), &fake.host()).unwrap_err();
        assert!(err.to_string().contains("set accounts.operator"));
    }
}
