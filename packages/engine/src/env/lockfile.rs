// ABOUTME: Package lock file (kl.lock) pinning declared packages to immutable references
// ABOUTME: Reuses pinned entries, resolves new ones through the package index and prunes stale ones

use crate::error::{DevboxError, Result};
use crate::service::PackageIndex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LOCK_FILE: &str = "kl.lock";

/// Split `name@version`, defaulting the version to `latest`
pub fn split_package(spec: &str) -> (&str, &str) {
    match spec.split_once('@') {
        Some((name, version)) if !version.is_empty() => (name, version),
        Some((name, _)) => (name, "latest"),
        None => (spec, "latest"),
    }
}

/// `name@version -> nixpkgs/<commit>#name`
#[derive(Debug, Clone)]
pub struct PackageLock {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl PackageLock {
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = workspace.join(LOCK_FILE);
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| DevboxError::drift(&path, e))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn references(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Bring the lock in line with `packages`; returns whether anything changed.
    /// Nothing is modified unless every new package resolves.
    pub async fn sync(&mut self, packages: &[String], index: &dyn PackageIndex) -> Result<bool> {
        let mut next = BTreeMap::new();

        for spec in packages {
            let (name, version) = split_package(spec);
            let key = format!("{}@{}", name, version);

            if let Some(existing) = self.entries.get(&key) {
                next.insert(key, existing.clone());
                continue;
            }

            debug!("Resolving package {} through the index", key);
            let resolved = index
                .resolve(name, version)
                .await
                .map_err(|source| DevboxError::PackageIndex {
                    package: spec.clone(),
                    source,
                })?;

            next.insert(key, format!("nixpkgs/{}#{}", resolved.commit_hash, name));
        }

        let changed = next != self.entries;
        if changed {
            info!("Package lock updated ({} entries)", next.len());
            self.entries = next;
        }
        Ok(changed)
    }

    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}
