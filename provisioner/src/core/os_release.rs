//! Parsing and matching of the os-release descriptor.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Identity fields read from os-release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
}

/// The one OS identity the provisioner accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsTarget {
    pub id: String,
    pub version_id: String,
}

impl Default for OsTarget {
    fn default() -> Self {
        Self {
            id: "ubuntu".to_string(),
            version_id: "22.04".to_string(),
        }
    }
}

impl OsTarget {
    /// Fail unless `release` is exactly this target.
    pub fn check(&self, release: &OsRelease) -> Result<()> {
        if release.id != self.id || release.version_id != self.version_id {
            bail!(
                "unsupported OS: expected {} {}, found {} {}",
                self.id,
                self.version_id,
                release.id,
                release.version_id
            );
        }
        Ok(())
    }
}

/// Parse `KEY=value` lines. Quoted values are unquoted; comments and blank
/// lines are skipped. `ID` and `VERSION_ID` are required.
pub fn parse_os_release(contents: &str) -> Result<OsRelease> {
    let mut id = None;
    let mut version_id = None;

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("os-release line {}: expected KEY=value", idx + 1))?;
        match key.trim() {
            "ID" => id = Some(unquote(value.trim())),
            "VERSION_ID" => version_id = Some(unquote(value.trim())),
            _ => {}
        }
    }

    Ok(OsRelease {
        id: id.ok_or_else(|| anyhow!("os-release missing ID"))?,
        version_id: version_id.ok_or_else(|| anyhow!("os-release missing VERSION_ID"))?,
    })
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU_JAMMY: &str = r#"PRETTY_NAME="Ubuntu 22.04.4 LTS"
NAME="Ubuntu"
VERSION_ID="22.04"
VERSION="22.04.4 LTS (Jammy Jellyfish)"
ID=ubuntu
ID_LIKE=debian
"#;

    #[test]
    fn parses_quoted_and_bare_values() {
        let release = parse_os_release(UBUNTU_JAMMY).expect("parse");
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.version_id, "22.04");
    }

    #[test]
    fn id_like_does_not_shadow_id() {
        let release = parse_os_release("ID_LIKE=debian\nID=ubuntu\nVERSION_ID='22.04'\n")
            .expect("parse");
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.version_id, "22.04");
    }

    #[test]
    fn missing_version_id_is_error() {
        let err = parse_os_release("ID=debian\n").unwrap_err();
        assert!(err.to_string().contains("VERSION_ID"));
    }

    #[test]
    fn malformed_line_is_error() {
        let err = parse_os_release("# header\nID ubuntu\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn default_target_accepts_jammy() {
        let release = parse_os_release(UBUNTU_JAMMY).expect("parse");
        OsTarget::default().check(&release).expect("target matches");
    }

    #[test]
    fn target_rejects_other_distribution() {
        let release = OsRelease {
            id: "debian".to_string(),
            version_id: "12".to_string(),
        };
        let err = OsTarget::default().check(&release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported OS: expected ubuntu 22.04, found debian 12"
        );
    }

    #[test]
    fn target_rejects_other_version() {
        let release = OsRelease {
            id: "ubuntu".to_string(),
            version_id: "24.04".to_string(),
        };
        assert!(OsTarget::default().check(&release).is_err());
    }
}
