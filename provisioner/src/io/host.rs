//! Filesystem view of the host being provisioned.
//!
//! All probes and native file actions go through [`Host::resolve`], so a test
//! can point the provisioner at a temporary directory laid out like `/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Host {
    root: PathBuf,
}

impl Host {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an absolute host path onto this root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if self.root == Path::new("/") {
            return path.to_path_buf();
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.join(relative)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    /// Read a host file, or `None` if it does not exist.
    pub fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        let resolved = self.resolve(path);
        match fs::read_to_string(&resolved) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }
}
