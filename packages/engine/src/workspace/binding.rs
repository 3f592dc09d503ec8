// ABOUTME: Per-workspace environment binding persisted in local-envs.json
// ABOUTME: Remembers the selected environment and the allocated SSH port across invocations

use crate::error::{DevboxError, Result};
use crate::workspace::identity::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PORT_PICK_ATTEMPTS: usize = 16;

/// Environment selected for a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEnv {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub target_namespace: String,
    #[serde(default)]
    pub ssh_port: u16,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalEnvsFile {
    #[serde(default)]
    selected_envs: HashMap<String, LocalEnv>,
}

/// JSON file store keyed by normalized workspace path
#[derive(Debug, Clone)]
pub struct LocalEnvStore {
    path: PathBuf,
}

impl LocalEnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn key(workspace: &Path) -> String {
        normalize_path(workspace).to_string_lossy().to_string()
    }

    fn load(&self) -> Result<LocalEnvsFile> {
        if !self.path.exists() {
            return Ok(LocalEnvsFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(LocalEnvsFile::default());
        }
        serde_json::from_str(&content).map_err(|e| DevboxError::drift(&self.path, e))
    }

    fn save(&self, file: &LocalEnvsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(file)?)?;
        debug!("Saved local env bindings to {:?}", self.path);
        Ok(())
    }

    pub fn get(&self, workspace: &Path) -> Result<Option<LocalEnv>> {
        Ok(self.load()?.selected_envs.remove(&Self::key(workspace)))
    }

    /// Replace the binding, keeping any port already allocated
    pub fn set(&self, workspace: &Path, mut env: LocalEnv) -> Result<LocalEnv> {
        let mut file = self.load()?;
        let key = Self::key(workspace);
        if env.ssh_port == 0 {
            env.ssh_port = file
                .selected_envs
                .get(&key)
                .map(|e| e.ssh_port)
                .unwrap_or_default();
        }
        file.selected_envs.insert(key, env.clone());
        self.save(&file)?;
        Ok(env)
    }

    /// SSH port for a workspace: reuse the stored one or pick and persist a free one
    pub fn allocate_port(&self, workspace: &Path) -> Result<u16> {
        let mut file = self.load()?;
        let entry = file.selected_envs.entry(Self::key(workspace)).or_default();
        if entry.ssh_port != 0 {
            return Ok(entry.ssh_port);
        }

        let port = pick_free_port()?;
        entry.ssh_port = port;
        self.save(&file)?;
        info!("Allocated ssh port {} for {}", port, workspace.display());
        Ok(port)
    }
}

fn pick_free_port() -> Result<u16> {
    for _ in 0..PORT_PICK_ATTEMPTS {
        if let Some(port) = portpicker::pick_unused_port() {
            if portpicker::is_free(port) {
                return Ok(port);
            }
        }
    }
    Err(DevboxError::PortAllocation(
        "no free local port available".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_port_is_stable_across_store_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local-envs.json");
        let workspace = Path::new("/work/app");

        let first = LocalEnvStore::new(&path).allocate_port(workspace).unwrap();
        assert_ne!(first, 0);

        // Fresh instance over the same file behaves like a new process
        let second = LocalEnvStore::new(&path).allocate_port(workspace).unwrap();
        assert_eq!(first, second);

        let trailing = LocalEnvStore::new(&path)
            .allocate_port(Path::new("/work/app/"))
            .unwrap();
        assert_eq!(first, trailing);
    }

    #[test]
    fn test_set_keeps_allocated_port() {
        let dir = TempDir::new().unwrap();
        let store = LocalEnvStore::new(dir.path().join("local-envs.json"));
        let workspace = Path::new("/work/api");

        let port = store.allocate_port(workspace).unwrap();
        let saved = store
            .set(
                workspace,
                LocalEnv {
                    name: "staging".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(saved.ssh_port, port);

        let loaded = store.get(workspace).unwrap().unwrap();
        assert_eq!(loaded.name, "staging");
        assert_eq!(loaded.ssh_port, port);
        assert!(store.get(Path::new("/work/other")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local-envs.json");
        fs::write(&path, "{not json").unwrap();
        let store = LocalEnvStore::new(&path);
        assert!(matches!(
            store.get(Path::new("/work/app")),
            Err(DevboxError::Drift { .. })
        ));
    }
}
