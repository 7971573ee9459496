//! The ordered host-provisioning step list.
//!
//! [`build_plan`] is pure: it turns configuration plus the preflight verdicts
//! (selected accounts, cluster state) into a [`Plan`]. Running it is the
//! driver's job.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::accounts::OperatorAccounts;
use crate::core::cluster::ClusterState;
use crate::core::edits::FileEdit;
use crate::core::types::{Action, CommandSpec, Owner, Plan, Step};

pub const STEP_BASE_PACKAGES: &str = "Install base packages";
pub const STEP_KERNEL_MODULES: &str = "Load kernel modules";
pub const STEP_SYSCTL: &str = "Configure sysctl";
pub const STEP_CONTAINERD: &str = "Install containerd";
pub const STEP_SWAP: &str = "Disable swap";
pub const STEP_KUBERNETES_REPO: &str = "Add Kubernetes repository";
pub const STEP_KUBERNETES_TOOLS: &str = "Install Kubernetes tools";
pub const STEP_RESET: &str = "Reset existing cluster";
pub const STEP_INIT: &str = "Initialize control plane";
pub const STEP_KUBECONFIG: &str = "Install kubeconfig";
pub const STEP_CNI: &str = "Install CNI plugin";
pub const STEP_UNTAINT: &str = "Allow workloads on control plane";
pub const STEP_COMPLETION: &str = "Enable kubectl completion";
pub const STEP_STATUS: &str = "Cluster status";
pub const STEP_HELM: &str = "Install Helm";

pub const BASE_PACKAGES: &[&str] = &["apt-transport-https", "ca-certificates", "curl", "gpg"];
pub const KERNEL_MODULES: &[&str] = &["overlay", "br_netfilter"];
pub const SYSCTL_PARAMS: &[(&str, &str)] = &[
    ("net.bridge.bridge-nf-call-iptables", "1"),
    ("net.bridge.bridge-nf-call-ip6tables", "1"),
    ("net.ipv4.ip_forward", "1"),
];
pub const KUBERNETES_PACKAGES: &[&str] = &["kubelet", "kubeadm", "kubectl"];

pub const MODULES_LOAD_PATH: &str = "/etc/modules-load.d/k8s.conf";
pub const SYSCTL_PATH: &str = "/etc/sysctl.d/k8s.conf";
pub const CONTAINERD_DIR: &str = "/etc/containerd";
pub const CONTAINERD_CONFIG_PATH: &str = "/etc/containerd/config.toml";
pub const FSTAB_PATH: &str = "/etc/fstab";
pub const APT_KEYRING_DIR: &str = "/etc/apt/keyrings";
pub const APT_KEYRING_PATH: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
pub const APT_SOURCE_PATH: &str = "/etc/apt/sources.list.d/kubernetes.list";
pub const CNI_CONFIG_DIR: &str = "/etc/cni/net.d";
pub const ETCD_DATA_DIR: &str = "/var/lib/etcd";
pub const ROOT_HOME: &str = "/root";
pub const COMPLETION_LINE: &str = "source <(kubectl completion bash)";
pub const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane:NoSchedule-";

/// Cluster-level settings baked into the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Minor release line, e.g. `1.28`; selects the package repository.
    pub version: String,
    pub pod_network_cidr: String,
    pub cni_manifest_url: String,
    /// `kubeadm init` output is copied here.
    pub init_log_path: PathBuf,
    /// Exists only after a successful `kubeadm init`.
    pub marker_path: PathBuf,
    pub admin_conf_path: PathBuf,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            version: "1.28".to_string(),
            pod_network_cidr: "10.244.0.0/16".to_string(),
            cni_manifest_url:
                "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml"
                    .to_string(),
            init_log_path: PathBuf::from("/root/kubeinit.log"),
            marker_path: PathBuf::from("/etc/kubernetes/manifests/kube-apiserver.yaml"),
            admin_conf_path: PathBuf::from("/etc/kubernetes/admin.conf"),
        }
    }
}

impl KubernetesConfig {
    pub fn repository_url(&self) -> String {
        format!("https://pkgs.k8s.io/core:/stable:/v{}/deb", self.version)
    }
}

pub struct PlanInputs<'a> {
    pub kubernetes: &'a KubernetesConfig,
    pub helm_install_script_url: &'a str,
    pub accounts: &'a OperatorAccounts,
    pub cluster_state: ClusterState,
}

pub fn build_plan(inputs: &PlanInputs<'_>) -> Plan {
    let k8s = inputs.kubernetes;
    let operator = &inputs.accounts.operator;

    let mut steps = vec![
        base_packages(),
        kernel_modules(),
        sysctl(),
        containerd(),
        disable_swap(),
        kubernetes_repository(k8s),
        kubernetes_tools(),
    ];

    let mut state = inputs.cluster_state;
    while state.needs_reset() {
        steps.push(reset_cluster());
        state = state.reset();
    }
    steps.push(
        Step::new(STEP_INIT).run(
            CommandSpec::new("kubeadm")
                .arg("init")
                .arg(format!("--pod-network-cidr={}", k8s.pod_network_cidr))
                .capture_to(&k8s.init_log_path),
        ),
    );

    steps.push(install_kubeconfig(k8s, inputs.accounts));
    steps.push(Step::new(STEP_CNI).run(
        CommandSpec::new("kubectl")
            .args(["apply", "-f", k8s.cni_manifest_url.as_str()])
            .run_as(&operator.name),
    ));
    steps.push(Step::new(STEP_UNTAINT).run(
        CommandSpec::new("kubectl")
            .args(["taint", "nodes", "--all", CONTROL_PLANE_TAINT])
            .run_as(&operator.name),
    ));
    steps.push(Step::new(STEP_COMPLETION).then(Action::AppendLine {
        path: operator.home.join(".bashrc"),
        line: COMPLETION_LINE.to_string(),
        owner: Some(operator.owner()),
    }));
    steps.push(
        Step::new(STEP_STATUS)
            .run(
                CommandSpec::new("kubectl")
                    .args(["get", "nodes"])
                    .run_as(&operator.name),
            )
            .run(
                CommandSpec::new("kubectl")
                    .args(["get", "pods", "--all-namespaces"])
                    .run_as(&operator.name),
            ),
    );
    steps.push(Step::new(STEP_HELM).pipeline(format!(
        "curl -fsSL {} | bash",
        inputs.helm_install_script_url
    )));

    Plan { steps }
}

fn apt_get() -> CommandSpec {
    CommandSpec::new("apt-get")
}

fn base_packages() -> Step {
    Step::new(STEP_BASE_PACKAGES)
        .run(apt_get().arg("update"))
        .run(apt_get().args(["install", "-y"]).args(BASE_PACKAGES.iter().copied()))
}

fn kernel_modules() -> Step {
    let mut step = Step::new(STEP_KERNEL_MODULES);
    for module in KERNEL_MODULES {
        step = step.run(CommandSpec::new("modprobe").arg(*module));
    }
    step.then(Action::WriteFile {
        path: PathBuf::from(MODULES_LOAD_PATH),
        contents: lines(KERNEL_MODULES.iter().copied()),
    })
}

fn sysctl() -> Step {
    let params = SYSCTL_PARAMS
        .iter()
        .map(|(key, value)| format!("{key} = {value}"));
    Step::new(STEP_SYSCTL)
        .then(Action::WriteFile {
            path: PathBuf::from(SYSCTL_PATH),
            contents: lines(params),
        })
        .run(CommandSpec::new("sysctl").arg("--system"))
}

fn containerd() -> Step {
    Step::new(STEP_CONTAINERD)
        .run(apt_get().args(["install", "-y", "containerd"]))
        .then(Action::CreateDir {
            path: PathBuf::from(CONTAINERD_DIR),
            owner: None,
        })
        .pipeline(format!("containerd config default > {CONTAINERD_CONFIG_PATH}"))
        .then(Action::EditFile {
            path: PathBuf::from(CONTAINERD_CONFIG_PATH),
            edit: FileEdit::EnableSystemdCgroup,
        })
        .run(CommandSpec::new("systemctl").args(["restart", "containerd"]))
        .run(CommandSpec::new("systemctl").args(["enable", "containerd"]))
}

fn disable_swap() -> Step {
    Step::new(STEP_SWAP)
        .run(CommandSpec::new("swapoff").arg("-a"))
        .then(Action::EditFile {
            path: PathBuf::from(FSTAB_PATH),
            edit: FileEdit::CommentOutSwap,
        })
}

fn kubernetes_repository(k8s: &KubernetesConfig) -> Step {
    let repo = k8s.repository_url();
    Step::new(STEP_KUBERNETES_REPO)
        .then(Action::CreateDir {
            path: PathBuf::from(APT_KEYRING_DIR),
            owner: None,
        })
        .pipeline(format!(
            "curl -fsSL {repo}/Release.key | gpg --dearmor --yes -o {APT_KEYRING_PATH}"
        ))
        .then(Action::WriteFile {
            path: PathBuf::from(APT_SOURCE_PATH),
            contents: format!("deb [signed-by={APT_KEYRING_PATH}] {repo}/ /\n"),
        })
}

fn kubernetes_tools() -> Step {
    Step::new(STEP_KUBERNETES_TOOLS)
        .run(apt_get().arg("update"))
        .run(apt_get().args(["install", "-y"]).args(KUBERNETES_PACKAGES.iter().copied()))
        .run(CommandSpec::new("apt-mark").arg("hold").args(KUBERNETES_PACKAGES.iter().copied()))
}

fn reset_cluster() -> Step {
    Step::new(STEP_RESET)
        .run(CommandSpec::new("kubeadm").args(["reset", "-f"]))
        .then(Action::RemovePath {
            path: PathBuf::from(CNI_CONFIG_DIR),
        })
        .then(Action::RemovePath {
            path: PathBuf::from(ETCD_DATA_DIR),
        })
}

fn install_kubeconfig(k8s: &KubernetesConfig, accounts: &OperatorAccounts) -> Step {
    let mut step = Step::new(STEP_KUBECONFIG);
    step = kubeconfig_for(step, &k8s.admin_conf_path, Path::new(ROOT_HOME), None);
    for account in &accounts.all {
        step = kubeconfig_for(
            step,
            &k8s.admin_conf_path,
            &account.home,
            Some(account.owner()),
        );
    }
    step
}

fn kubeconfig_for(
    step: Step,
    admin_conf: &Path,
    home: &Path,
    owner: Option<Owner>,
) -> Step {
    let kube_dir = home.join(".kube");
    step.then(Action::CreateDir {
        path: kube_dir.clone(),
        owner,
    })
    .then(Action::InstallFile {
        src: admin_conf.to_path_buf(),
        dest: kube_dir.join("config"),
        owner,
        mode: 0o600,
    })
}

fn lines<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for item in items {
        out.push_str(item.as_ref());
        out.push('\n');
    }
    out
}
