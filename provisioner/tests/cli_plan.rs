//! CLI tests for `provisioner plan` and `provisioner init-config`.
//!
//! Spawns the binary against a temporary host root and checks exit codes and
//! the rendered step list.

use std::process::{Command, Output};

use provisioner::core::plan::{STEP_HELM, STEP_INIT, STEP_RESET};
use provisioner::exit_codes;
use provisioner::io::config::{ProvisionConfig, load_config};
use provisioner::test_support::{DEBIAN_BOOKWORM, FakeHost};

fn plan(fake: &FakeHost, extra: &[&str]) -> Output {
    let missing_config = fake.path().join("missing.toml");
    Command::new(env!("CARGO_BIN_EXE_provisioner"))
        .arg("--root")
        .arg(fake.path())
        .arg("plan")
        .arg("--config")
        .arg(&missing_config)
        .args(extra)
        .output()
        .expect("provisioner plan")
}

#[test]
fn plan_on_wrong_os_exits_with_precondition_code() {
    let fake = FakeHost::new().expect("fake host");
    fake.write("/etc/os-release", DEBIAN_BOOKWORM).expect("write");

    let output = plan(&fake, &[]);

    assert_eq!(output.status.code(), Some(exit_codes::PRECONDITION));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported OS"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn plan_on_fresh_host_lists_steps_without_reset() {
    let fake = FakeHost::ready().expect("fake host");

    let output = plan(&fake, &[]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("1. Install base packages\n"), "stdout: {stdout}");
    assert!(stdout.contains(STEP_INIT));
    assert!(stdout.contains(STEP_HELM));
    assert!(!stdout.contains(STEP_RESET));
}

#[test]
fn plan_json_includes_reset_when_marker_exists() {
    let fake = FakeHost::ready().expect("fake host");
    fake.with_marker(&ProvisionConfig::default()).expect("marker");

    let output = plan(&fake, &["--json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("plan json");
    let names: Vec<&str> = value["steps"]
        .as_array()
        .expect("steps array")
        .iter()
        .filter_map(|step| step["name"].as_str())
        .collect();
    let reset = names.iter().position(|name| *name == STEP_RESET).expect("reset");
    assert_eq!(names[reset + 1], STEP_INIT);
}

#[test]
fn init_config_writes_defaults_and_refuses_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("conf/config.toml");

    let status = Command::new(env!("CARGO_BIN_EXE_provisioner"))
        .arg("init-config")
        .arg(&path)
        .status()
        .expect("provisioner init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load"), ProvisionConfig::default());

    let status = Command::new(env!("CARGO_BIN_EXE_provisioner"))
        .arg("init-config")
        .arg(&path)
        .status()
        .expect("provisioner init-config again");
    assert_eq!(status.code(), Some(exit_codes::FAILED));
}
