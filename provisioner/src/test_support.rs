//! Test-only helpers: in-memory output sinks, a scripted executor, and a
//! temporary host root.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use crate::core::types::Action;
use crate::io::config::ProvisionConfig;
use crate::io::executor::{ActionExecutor, CommandFailed};
use crate::io::host::Host;
use crate::io::tee::{LineSink, Tee};

pub const UBUNTU_JAMMY: &str = "\
PRETTY_NAME=\"Ubuntu 22.04.4 LTS\"
NAME=\"Ubuntu\"
VERSION_ID=\"22.04\"
ID=ubuntu
ID_LIKE=debian
";

pub const DEBIAN_BOOKWORM: &str = "\
PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"
VERSION_ID=\"12\"
ID=debian
";

pub const SINGLE_OPERATOR_PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
ubuntu:x:1000:1000:Ubuntu:/home/ubuntu:/bin/bash
";

/// Shared view of the lines a [`MemorySink`] received.
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl SinkLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}

pub struct MemorySink {
    log: SinkLog,
}

impl LineSink for MemorySink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.log
            .lines
            .lock()
            .map_err(|_| anyhow!("memory sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

/// A tee with two in-memory sinks standing in for terminal and syslog.
pub fn memory_tee() -> (Tee, SinkLog, SinkLog) {
    let terminal = SinkLog::default();
    let syslog = SinkLog::default();
    let tee = Tee::new(vec![
        Box::new(MemorySink {
            log: terminal.clone(),
        }),
        Box::new(MemorySink {
            log: syslog.clone(),
        }),
    ]);
    (tee, terminal, syslog)
}

enum Failure {
    Command { exit_code: i32 },
    Other,
}

/// Executor that records actions instead of performing them.
///
/// Optionally fails the first action whose display text contains a pattern.
pub struct ScriptedExecutor {
    fail_on: Option<(String, Failure)>,
    executed: RefCell<Vec<Action>>,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self {
            fail_on: None,
            executed: RefCell::new(Vec::new()),
        }
    }

    /// Fail like a command exiting with `exit_code`.
    pub fn failing_on(pattern: &str, exit_code: i32) -> Self {
        Self {
            fail_on: Some((pattern.to_string(), Failure::Command { exit_code })),
            executed: RefCell::new(Vec::new()),
        }
    }

    /// Fail with a non-command error (e.g. a file write).
    pub fn erroring_on(pattern: &str) -> Self {
        Self {
            fail_on: Some((pattern.to_string(), Failure::Other)),
            executed: RefCell::new(Vec::new()),
        }
    }

    /// Every action attempted, including the one that failed.
    pub fn executed(&self) -> Vec<Action> {
        self.executed.borrow().clone()
    }

    pub fn executed_text(&self) -> Vec<String> {
        self.executed.borrow().iter().map(ToString::to_string).collect()
    }
}

impl ActionExecutor for ScriptedExecutor {
    fn execute(&self, action: &Action, tee: &Tee) -> Result<()> {
        let text = action.to_string();
        self.executed.borrow_mut().push(action.clone());
        tee.line(&format!("+ {text}"))?;

        match &self.fail_on {
            Some((pattern, failure)) if text.contains(pattern.as_str()) => match failure {
                Failure::Command { exit_code } => {
                    tee.line(&format!("E: scripted failure in {text}"))?;
                    Err(CommandFailed {
                        command: text,
                        exit_code: Some(*exit_code),
                        timed_out: false,
                    }
                    .into())
                }
                Failure::Other => Err(anyhow!("scripted error in {text}")),
            },
            _ => Ok(()),
        }
    }
}

/// Temporary directory laid out like a host root.
pub struct FakeHost {
    dir: tempfile::TempDir,
}

impl FakeHost {
    /// Empty root: no os-release, no passwd.
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create fake host root")?,
        })
    }

    /// Ubuntu 22.04 with exactly one `ubuntu` operator account.
    pub fn ready() -> Result<Self> {
        let fake = Self::new()?;
        fake.write("/etc/os-release", UBUNTU_JAMMY)?;
        fake.write("/etc/passwd", SINGLE_OPERATOR_PASSWD)?;
        Ok(fake)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn host(&self) -> Host {
        Host::new(self.dir.path())
    }

    /// Write `contents` at absolute host path `path`.
    pub fn write(&self, path: &str, contents: &str) -> Result<()> {
        let resolved = self.host().resolve(Path::new(path));
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&resolved, contents).with_context(|| format!("write {}", resolved.display()))
    }

    /// Create the control-plane marker, as a prior `kubeadm init` would.
    pub fn with_marker(&self, cfg: &ProvisionConfig) -> Result<()> {
        let marker = cfg.kubernetes.marker_path.to_string_lossy().into_owned();
        self.write(&marker, "apiVersion: v1\nkind: Pod\n")
    }
}
