//! Executor abstraction for plan actions.
//!
//! The [`ActionExecutor`] trait decouples the driver from the live host.
//! [`SystemExecutor`] spawns real commands and edits real files; tests use
//! scripted executors that record actions without touching anything.

use std::fs;
use std::os::unix::fs::{PermissionsExt, chown};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::edits::FileEdit;
use crate::core::types::{Action, CommandSpec, Owner};
use crate::io::host::Host;
use crate::io::process::run_command_streaming;
use crate::io::tee::Tee;

/// Set on every child so package tools never prompt.
pub const COMMAND_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// An external command ran but did not succeed.
#[derive(Debug, Error)]
#[error("`{command}` {}", failure_text(.exit_code, .timed_out))]
pub struct CommandFailed {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

fn failure_text(exit_code: &Option<i32>, timed_out: &bool) -> String {
    match (*timed_out, *exit_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(code)) => format!("exited with status {code}"),
        (false, None) => "was terminated by a signal".to_string(),
    }
}

/// Abstraction over action execution backends.
pub trait ActionExecutor {
    /// Perform `action`, sending operator-visible output through `tee`.
    fn execute(&self, action: &Action, tee: &Tee) -> Result<()>;
}

/// Executor that mutates the host.
pub struct SystemExecutor {
    host: Host,
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new(host: Host, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    fn run(
        &self,
        command_text: String,
        mut cmd: Command,
        capture: Option<&Path>,
        tee: &Tee,
    ) -> Result<()> {
        cmd.envs(COMMAND_ENV.iter().copied());
        let capture = capture.map(|path| self.host.resolve(path));
        let outcome = run_command_streaming(cmd, tee, self.timeout, capture.as_deref())
            .with_context(|| format!("run {command_text}"))?;
        if !outcome.success() {
            // Reported to the operator through the tee by the driver.
            debug!(
                command = %command_text,
                exit_code = ?outcome.status.code(),
                timed_out = outcome.timed_out,
                "command failed"
            );
            return Err(CommandFailed {
                command: command_text,
                exit_code: outcome.status.code(),
                timed_out: outcome.timed_out,
            }
            .into());
        }
        Ok(())
    }

    fn run_spec(&self, spec: &CommandSpec, tee: &Tee) -> Result<()> {
        let argv = spec.argv();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        self.run(spec.to_string(), cmd, spec.capture_path.as_deref(), tee)
    }

    fn run_pipeline(&self, script: &str, tee: &Tee) -> Result<()> {
        let mut cmd = Command::new("bash");
        cmd.arg("-o").arg("pipefail").arg("-c").arg(script);
        self.run(script.to_string(), cmd, None, tee)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        let resolved = self.host.resolve(path);
        ensure_parent(&resolved)?;
        fs::write(&resolved, contents).with_context(|| format!("write {}", path.display()))
    }

    fn append_line(
        &self,
        path: &Path,
        line: &str,
        owner: Option<Owner>,
        tee: &Tee,
    ) -> Result<()> {
        let resolved = self.host.resolve(path);
        let existing = match fs::read_to_string(&resolved) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        if existing.lines().any(|existing_line| existing_line == line) {
            tee.line(&format!("{} already contains '{line}'", path.display()))?;
            return Ok(());
        }

        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(line);
        updated.push('\n');
        ensure_parent(&resolved)?;
        fs::write(&resolved, updated).with_context(|| format!("write {}", path.display()))?;
        apply_owner(&resolved, owner)
    }

    fn edit_file(&self, path: &Path, edit: FileEdit) -> Result<()> {
        let resolved = self.host.resolve(path);
        let contents =
            fs::read_to_string(&resolved).with_context(|| format!("read {}", path.display()))?;
        let edited = edit
            .apply(&contents)
            .with_context(|| format!("edit {}", path.display()))?;
        if edited != contents {
            fs::write(&resolved, edited).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }

    fn install_file(
        &self,
        src: &Path,
        dest: &Path,
        owner: Option<Owner>,
        mode: u32,
    ) -> Result<()> {
        let src_resolved = self.host.resolve(src);
        let dest_resolved = self.host.resolve(dest);
        ensure_parent(&dest_resolved)?;
        fs::copy(&src_resolved, &dest_resolved)
            .with_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
        fs::set_permissions(&dest_resolved, fs::Permissions::from_mode(mode))
            .with_context(|| format!("chmod {}", dest.display()))?;
        apply_owner(&dest_resolved, owner)
    }

    fn create_dir(&self, path: &Path, owner: Option<Owner>) -> Result<()> {
        let resolved = self.host.resolve(path);
        fs::create_dir_all(&resolved).with_context(|| format!("create {}", path.display()))?;
        apply_owner(&resolved, owner)
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        let resolved = self.host.resolve(path);
        let meta = match fs::symlink_metadata(&resolved) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "nothing to remove");
                return Ok(());
            }
            Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&resolved)
        } else {
            fs::remove_file(&resolved)
        }
        .with_context(|| format!("remove {}", path.display()))
    }
}

impl ActionExecutor for SystemExecutor {
    #[instrument(skip_all, fields(action = %action))]
    fn execute(&self, action: &Action, tee: &Tee) -> Result<()> {
        info!("executing action");
        match action {
            Action::Run(spec) => {
                tee.line(&format!("+ {spec}"))?;
                self.run_spec(spec, tee)
            }
            Action::Pipeline { script } => {
                tee.line(&format!("+ {script}"))?;
                self.run_pipeline(script, tee)
            }
            Action::WriteFile { path, contents } => {
                tee.line(&format!("writing {}", path.display()))?;
                self.write_file(path, contents)
            }
            Action::AppendLine { path, line, owner } => self.append_line(path, line, *owner, tee),
            Action::EditFile { path, edit } => {
                tee.line(&format!("{edit} in {}", path.display()))?;
                self.edit_file(path, *edit)
            }
            Action::InstallFile {
                src,
                dest,
                owner,
                mode,
            } => {
                tee.line(&format!("installing {} to {}", src.display(), dest.display()))?;
                self.install_file(src, dest, *owner, *mode)
            }
            Action::CreateDir { path, owner } => self.create_dir(path, *owner),
            Action::RemovePath { path } => {
                tee.line(&format!("removing {}", path.display()))?;
                self.remove_path(path)
            }
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    Ok(())
}

fn apply_owner(path: &Path, owner: Option<Owner>) -> Result<()> {
    if let Some(owner) = owner {
        chown(path, Some(owner.uid), Some(owner.gid))
            .with_context(|| format!("chown {}:{} {}", owner.uid, owner.gid, path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_tee;
    use std::path::PathBuf;

    fn executor(root: &Path) -> SystemExecutor {
        SystemExecutor::new(Host::new(root), Duration::from_secs(10))
    }

    #[test]
    fn failing_command_carries_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, terminal, _syslog) = memory_tee();
        let err = executor(temp.path())
            .execute(
                &Action::Pipeline {
                    script: "echo boom 1>&2; exit 3".to_string(),
                },
                &tee,
            )
            .unwrap_err();
        let failed = err.downcast_ref::<CommandFailed>().expect("command failure");
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(err.to_string(), "`echo boom 1>&2; exit 3` exited with status 3");
        assert!(terminal.lines().contains(&"boom".to_string()));
    }

    #[test]
    fn pipeline_fails_when_early_stage_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, _terminal, _syslog) = memory_tee();
        let err = executor(temp.path())
            .execute(
                &Action::Pipeline {
                    script: "false | cat".to_string(),
                },
                &tee,
            )
            .unwrap_err();
        assert!(err.downcast_ref::<CommandFailed>().is_some());
    }

    #[test]
    fn pipeline_timeout_stops_every_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, _terminal, _syslog) = memory_tee();
        let exec = SystemExecutor::new(Host::new(temp.path()), Duration::from_millis(300));
        let started = std::time::Instant::now();

        let err = exec
            .execute(
                &Action::Pipeline {
                    script: "sleep 6 | cat".to_string(),
                },
                &tee,
            )
            .unwrap_err();

        let failed = err.downcast_ref::<CommandFailed>().expect("command failure");
        assert!(failed.timed_out);
        assert_eq!(err.to_string(), "`sleep 6 | cat` timed out");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn commands_see_noninteractive_frontend() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, terminal, _syslog) = memory_tee();
        executor(temp.path())
            .execute(
                &Action::Run(CommandSpec::new("sh").args(["-c", "echo $DEBIAN_FRONTEND"])),
                &tee,
            )
            .expect("run");
        assert!(terminal.lines().contains(&"noninteractive".to_string()));
    }

    #[test]
    fn append_line_is_skipped_when_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, _terminal, _syslog) = memory_tee();
        let exec = executor(temp.path());
        let action = Action::AppendLine {
            path: PathBuf::from("/home/ubuntu/.bashrc"),
            line: "source <(kubectl completion bash)".to_string(),
            owner: None,
        };
        fs::create_dir_all(temp.path().join("home/ubuntu")).expect("mkdir");
        fs::write(temp.path().join("home/ubuntu/.bashrc"), "alias ll='ls -l'").expect("write");

        exec.execute(&action, &tee).expect("first append");
        exec.execute(&action, &tee).expect("second append");

        let contents =
            fs::read_to_string(temp.path().join("home/ubuntu/.bashrc")).expect("read");
        assert_eq!(contents, "alias ll='ls -l'\nsource <(kubectl completion bash)\n");
    }

    #[test]
    fn edit_file_rewrites_fstab() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, _terminal, _syslog) = memory_tee();
        fs::create_dir_all(temp.path().join("etc")).expect("mkdir");
        fs::write(temp.path().join("etc/fstab"), "/swap.img none swap sw 0 0\n").expect("write");

        executor(temp.path())
            .execute(
                &Action::EditFile {
                    path: PathBuf::from("/etc/fstab"),
                    edit: FileEdit::CommentOutSwap,
                },
                &tee,
            )
            .expect("edit");

        assert_eq!(
            fs::read_to_string(temp.path().join("etc/fstab")).expect("read"),
            "#/swap.img none swap sw 0 0\n"
        );
    }

    #[test]
    fn install_file_copies_with_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, _terminal, _syslog) = memory_tee();
        fs::create_dir_all(temp.path().join("etc/kubernetes")).expect("mkdir");
        fs::write(temp.path().join("etc/kubernetes/admin.conf"), "apiVersion: v1\n")
            .expect("write");

        executor(temp.path())
            .execute(
                &Action::InstallFile {
                    src: PathBuf::from("/etc/kubernetes/admin.conf"),
                    dest: PathBuf::from("/root/.kube/config"),
                    owner: None,
                    mode: 0o600,
                },
                &tee,
            )
            .expect("install");

        let dest = temp.path().join("root/.kube/config");
        assert_eq!(fs::read_to_string(&dest).expect("read"), "apiVersion: v1\n");
        let mode = fs::metadata(&dest).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn remove_path_handles_dirs_and_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tee, _terminal, _syslog) = memory_tee();
        let exec = executor(temp.path());
        fs::create_dir_all(temp.path().join("var/lib/etcd/member")).expect("mkdir");

        let action = Action::RemovePath {
            path: PathBuf::from("/var/lib/etcd"),
        };
        exec.execute(&action, &tee).expect("remove dir");
        assert!(!temp.path().join("var/lib/etcd").exists());
        exec.execute(&action, &tee).expect("remove missing");
    }
}
