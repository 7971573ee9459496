//! Step and action types shared by the planner and the driver.
//!
//! A [`Plan`] is an ordered list of named [`Step`]s; each step is an ordered
//! list of [`Action`]s. Actions are plain data so plans can be printed,
//! serialized, and compared in tests without touching the host.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::edits::FileEdit;

/// Numeric owner applied to files written on behalf of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// A single external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Account to run as (via `sudo -u <account> -H`). `None` runs as the caller.
    pub run_as: Option<String>,
    /// Also copy the command's output to this file.
    pub capture_path: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            run_as: None,
            capture_path: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn run_as(mut self, account: &str) -> Self {
        self.run_as = Some(account.to_string());
        self
    }

    pub fn capture_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_path = Some(path.into());
        self
    }

    /// Full argv as it will be spawned, including the `sudo` prefix for `run_as`.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 6);
        if let Some(account) = &self.run_as {
            argv.extend(
                ["sudo", "-u", account.as_str(), "-H", "--"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// One host mutation or check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Spawn a program directly.
    Run(CommandSpec),
    /// Shell pipeline run under `bash -o pipefail`; any failing stage fails the action.
    Pipeline { script: String },
    /// Create or replace a file.
    WriteFile { path: PathBuf, contents: String },
    /// Append `line` unless the file already contains it verbatim.
    AppendLine {
        path: PathBuf,
        line: String,
        owner: Option<Owner>,
    },
    /// Rewrite a file in place through a pure text transform.
    EditFile { path: PathBuf, edit: FileEdit },
    /// Copy `src` to `dest`, creating parent directories.
    InstallFile {
        src: PathBuf,
        dest: PathBuf,
        owner: Option<Owner>,
        mode: u32,
    },
    /// `mkdir -p`, optionally chowning the leaf directory.
    CreateDir { path: PathBuf, owner: Option<Owner> },
    /// `rm -rf`; a missing path is not an error.
    RemovePath { path: PathBuf },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Run(cmd) => write!(f, "{cmd}"),
            Action::Pipeline { script } => write!(f, "{script}"),
            Action::WriteFile { path, .. } => write!(f, "write {}", path.display()),
            Action::AppendLine { path, line, .. } => {
                write!(f, "append '{line}' to {}", path.display())
            }
            Action::EditFile { path, edit } => write!(f, "{edit} in {}", path.display()),
            Action::InstallFile { src, dest, .. } => {
                write!(f, "install {} -> {}", src.display(), dest.display())
            }
            Action::CreateDir { path, .. } => write!(f, "mkdir -p {}", path.display()),
            Action::RemovePath { path } => write!(f, "rm -rf {}", path.display()),
        }
    }
}

/// A named group of actions; the unit of progress reporting and failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Step {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            actions: Vec::new(),
        }
    }

    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn run(self, cmd: CommandSpec) -> Self {
        self.then(Action::Run(cmd))
    }

    pub fn pipeline(self, script: impl Into<String>) -> Self {
        self.then(Action::Pipeline {
            script: script.into(),
        })
    }
}

/// Ordered list of steps for one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_wraps_run_as_with_sudo() {
        let cmd = CommandSpec::new("kubectl")
            .args(["get", "nodes"])
            .run_as("ubuntu");
        assert_eq!(
            cmd.argv(),
            vec!["sudo", "-u", "ubuntu", "-H", "--", "kubectl", "get", "nodes"]
        );
    }

    #[test]
    fn display_joins_argv() {
        let cmd = CommandSpec::new("swapoff").arg("-a");
        assert_eq!(cmd.to_string(), "swapoff -a");
    }

    #[test]
    fn action_serializes_with_kind_tag() {
        let action = Action::RemovePath {
            path: PathBuf::from("/var/lib/etcd"),
        };
        let json = serde_json::to_value(&action).expect("serialize");
        assert_eq!(json["kind"], "remove_path");
        assert_eq!(json["path"], "/var/lib/etcd");
    }
}
