//! In-place text edits applied to host configuration files.

use std::fmt;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use serde::Serialize;

static SYSTEMD_CGROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*SystemdCgroup[ \t]*=[ \t]*)(true|false)[ \t]*$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEdit {
    /// Set containerd's runc `SystemdCgroup` option to `true`.
    EnableSystemdCgroup,
    /// Comment out every active swap entry in an fstab.
    CommentOutSwap,
}

impl FileEdit {
    pub fn apply(self, contents: &str) -> Result<String> {
        match self {
            FileEdit::EnableSystemdCgroup => enable_systemd_cgroup(contents),
            FileEdit::CommentOutSwap => Ok(comment_out_swap(contents)),
        }
    }
}

impl fmt::Display for FileEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileEdit::EnableSystemdCgroup => write!(f, "set SystemdCgroup = true"),
            FileEdit::CommentOutSwap => write!(f, "comment out swap entries"),
        }
    }
}

fn enable_systemd_cgroup(contents: &str) -> Result<String> {
    if !SYSTEMD_CGROUP_RE.is_match(contents) {
        bail!("SystemdCgroup setting not found");
    }
    Ok(SYSTEMD_CGROUP_RE
        .replace_all(contents, "${1}true")
        .into_owned())
}

fn comment_out_swap(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len() + 8);
    for line in contents.split_inclusive('\n') {
        if is_swap_entry(line) {
            out.push('#');
        }
        out.push_str(line);
    }
    out
}

/// Third whitespace-separated field is the filesystem type.
fn is_swap_entry(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return false;
    }
    trimmed.split_whitespace().nth(2) == Some("swap")
}
