// ABOUTME: Stable workspace identity and SSH host naming
// ABOUTME: Normalizes workspace paths and derives the md5 identity used for labels and record files

use md5::{Digest, Md5};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Hex md5 of a normalized absolute workspace path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the box hash record for this workspace
    pub fn record_file_name(&self) -> String {
        format!("hash-{}", self.0)
    }

    /// Last 8 hex characters, used in container names
    pub fn short(&self) -> &str {
        &self.0[self.0.len().saturating_sub(8)..]
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute, lexically normalized form of a path with no trailing separator
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    #[cfg(windows)]
    {
        normalized = PathBuf::from(normalized.to_string_lossy().to_lowercase());
    }

    normalized
}

pub fn identity_of(path: &Path) -> WorkspaceId {
    let normalized = normalize_path(path);
    let mut hasher = Md5::new();
    hasher.update(normalized.to_string_lossy().as_bytes());
    WorkspaceId(hex::encode(hasher.finalize()))
}

/// Host name under which the dev container's SSH server is reachable
pub fn ssh_domain(path: &Path, home: &Path, suffix: &str) -> String {
    let path = path.to_string_lossy();
    let home = home.to_string_lossy();

    let mut s = if home.is_empty() {
        path.to_string()
    } else {
        path.replace(home.as_ref(), "")
    };
    s = s
        .to_lowercase()
        .replace(":\\", "/")
        .replace(' ', "-")
        .replace(['/', '\\'], ".");

    let s = s.trim_matches('.');
    if s.is_empty() {
        suffix.to_string()
    } else {
        format!("{}.{}", s, suffix)
    }
}
