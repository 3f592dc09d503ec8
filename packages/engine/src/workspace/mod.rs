// ABOUTME: Workspace model tying a project directory to its declaration and environment binding
// ABOUTME: Re-exports identity, kl.yml parsing and the local binding store

pub mod binding;
pub mod identity;
pub mod klfile;

pub use binding::{LocalEnv, LocalEnvStore};
pub use identity::{identity_of, normalize_path, ssh_domain, WorkspaceId};
pub use klfile::{EnvReference, EnvVarDecl, KlFile, MountDecl, MountReference, SourceKind};

use std::path::PathBuf;

/// A project directory with its parsed declaration and selected environment
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub binding: LocalEnv,
    pub spec: KlFile,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>, binding: LocalEnv, spec: KlFile) -> Self {
        Self {
            path: normalize_path(&path.into()),
            binding,
            spec,
        }
    }

    pub fn id(&self) -> WorkspaceId {
        identity_of(&self.path)
    }

    pub fn account(&self) -> &str {
        &self.spec.account_name
    }

    pub fn environment(&self) -> &str {
        &self.binding.name
    }
}
