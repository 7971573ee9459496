//! Provisioner configuration stored at `/etc/k8s-bootstrap/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::accounts::AccountPolicy;
use crate::core::os_release::OsTarget;
use crate::core::plan::KubernetesConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/k8s-bootstrap/config.toml";

/// Provisioner configuration (TOML).
///
/// Every field is optional; defaults reproduce the fixed single-node setup
/// (Ubuntu 22.04, Kubernetes 1.28, flannel on `10.244.0.0/16`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisionConfig {
    /// OS descriptor checked before anything is touched.
    pub os_release_path: PathBuf,

    /// Tag attached to every line sent to the system log.
    pub syslog_tag: String,

    /// Wall-clock limit for each external command.
    pub step_timeout_secs: u64,

    pub helm_install_script_url: String,

    pub target: OsTarget,
    pub accounts: AccountsConfig,
    pub kubernetes: KubernetesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountsConfig {
    pub passwd_path: PathBuf,
    pub prefix: String,
    pub min_uid: u32,
    /// Required when more than one account matches `prefix`.
    pub operator: Option<String>,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            passwd_path: PathBuf::from("/etc/passwd"),
            prefix: "ubuntu".to_string(),
            min_uid: 1000,
            operator: None,
        }
    }
}

impl AccountsConfig {
    pub fn policy(&self) -> AccountPolicy {
        AccountPolicy {
            prefix: self.prefix.clone(),
            min_uid: self.min_uid,
            operator: self.operator.clone(),
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            os_release_path: PathBuf::from("/etc/os-release"),
            syslog_tag: "k8s-bootstrap".to_string(),
            step_timeout_secs: 30 * 60,
            helm_install_script_url:
                "https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3".to_string(),
            target: OsTarget::default(),
            accounts: AccountsConfig::default(),
            kubernetes: KubernetesConfig::default(),
        }
    }
}

impl ProvisionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.syslog_tag.trim().is_empty() || self.syslog_tag.contains(char::is_whitespace) {
            return Err(anyhow!("syslog_tag must be a non-empty word"));
        }
        if self.target.id.trim().is_empty() || self.target.version_id.trim().is_empty() {
            return Err(anyhow!("target.id and target.version_id must be non-empty"));
        }
        if self.accounts.prefix.trim().is_empty() && self.accounts.operator.is_none() {
            return Err(anyhow!(
                "accounts.prefix must be non-empty unless accounts.operator is set"
            ));
        }
        if self.kubernetes.version.trim().is_empty() {
            return Err(anyhow!("kubernetes.version must be non-empty"));
        }
        validate_cidr(&self.kubernetes.pod_network_cidr)?;
        validate_url("kubernetes.cni_manifest_url", &self.kubernetes.cni_manifest_url)?;
        validate_url("helm_install_script_url", &self.helm_install_script_url)?;
        for (name, path) in [
            ("os_release_path", &self.os_release_path),
            ("accounts.passwd_path", &self.accounts.passwd_path),
            ("kubernetes.init_log_path", &self.kubernetes.init_log_path),
            ("kubernetes.marker_path", &self.kubernetes.marker_path),
            ("kubernetes.admin_conf_path", &self.kubernetes.admin_conf_path),
        ] {
            if !path.is_absolute() {
                return Err(anyhow!("{name} must be an absolute path"));
            }
        }
        Ok(())
    }
}

fn validate_cidr(cidr: &str) -> Result<()> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| anyhow!("kubernetes.pod_network_cidr must be ADDR/PREFIX"))?;
    addr.parse::<std::net::Ipv4Addr>()
        .with_context(|| format!("kubernetes.pod_network_cidr: invalid address '{addr}'"))?;
    let prefix: u8 = prefix
        .parse()
        .with_context(|| format!("kubernetes.pod_network_cidr: invalid prefix '{prefix}'"))?;
    if prefix > 32 {
        return Err(anyhow!("kubernetes.pod_network_cidr: prefix must be <= 32"));
    }
    Ok(())
}

fn validate_url(name: &str, url: &str) -> Result<()> {
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(anyhow!("{name} must be an http(s) URL"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ProvisionConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProvisionConfig> {
    if !path.exists() {
        let cfg = ProvisionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProvisionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ProvisionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
