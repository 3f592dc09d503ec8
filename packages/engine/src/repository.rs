// ABOUTME: Label-based lookup of managed containers
// ABOUTME: Finds dev containers by workspace and the singleton relay and VPN containers

use crate::containers::{ContainerEngine, ContainerSummary, EngineResult, LabelSelector};
use crate::workspace::identity_of;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const LABEL_MANAGED: &str = "kloudlite";
pub const LABEL_WORKSPACE_BOX: &str = "workspacebox";
pub const LABEL_WORKING_DIR: &str = "working_dir";
pub const LABEL_WORKSPACE_ID: &str = "workspace_id";
pub const LABEL_SSH_PORT: &str = "ssh_port";
pub const LABEL_PROXY: &str = "proxy";
pub const LABEL_PROXY_PORTS: &str = "proxy_ports";
pub const LABEL_PROXY_TARGET: &str = "proxy_target";
pub const LABEL_VPN: &str = "wg";
pub const LABEL_VPN_SUM: &str = "wgsum";

/// Containers that must exist at most once per host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingletonKind {
    Relay,
    Vpn,
}

impl SingletonKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Relay => LABEL_PROXY,
            Self::Vpn => LABEL_VPN,
        }
    }
}

/// Label set carried by everything this tool creates
pub fn managed_labels() -> HashMap<String, String> {
    HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())])
}

#[derive(Clone)]
pub struct ContainerRepository {
    engine: Arc<dyn ContainerEngine>,
}

impl ContainerRepository {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Dev container bound to a workspace, running or not
    pub async fn find_by_workspace(&self, path: &Path) -> EngineResult<Option<ContainerSummary>> {
        let selectors = [
            LabelSelector::flag(LABEL_MANAGED),
            LabelSelector::flag(LABEL_WORKSPACE_BOX),
            LabelSelector::eq(LABEL_WORKSPACE_ID, identity_of(path).as_str()),
        ];
        let mut found = self.engine.list(&selectors, true).await?;

        // Prefer a running one if stale duplicates exist
        found.sort_by_key(|c| !c.state.is_running());
        Ok(found.into_iter().next())
    }

    /// Every dev container on the host
    pub async fn list_workspaces(&self, include_stopped: bool) -> EngineResult<Vec<ContainerSummary>> {
        let selectors = [
            LabelSelector::flag(LABEL_MANAGED),
            LabelSelector::flag(LABEL_WORKSPACE_BOX),
        ];
        self.engine.list(&selectors, include_stopped).await
    }

    /// All relay or VPN containers, including stopped ones
    pub async fn find_singletons(&self, kind: SingletonKind) -> EngineResult<Vec<ContainerSummary>> {
        let selectors = [
            LabelSelector::flag(LABEL_MANAGED),
            LabelSelector::flag(kind.label()),
        ];
        self.engine.list(&selectors, true).await
    }

    /// Labels identifying a workspace's dev container
    pub fn workspace_labels(path: &Path, ssh_port: u16) -> HashMap<String, String> {
        let mut labels = managed_labels();
        labels.insert(LABEL_WORKSPACE_BOX.to_string(), "true".to_string());
        labels.insert(LABEL_WORKING_DIR.to_string(), path.display().to_string());
        labels.insert(
            LABEL_WORKSPACE_ID.to_string(),
            identity_of(path).as_str().to_string(),
        );
        labels.insert(LABEL_SSH_PORT.to_string(), ssh_port.to_string());
        labels
    }

    /// Base labels of a singleton container
    pub fn singleton_labels(kind: SingletonKind) -> HashMap<String, String> {
        let mut labels = managed_labels();
        labels.insert(kind.label().to_string(), "true".to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_labels() {
        let labels = ContainerRepository::workspace_labels(Path::new("/home/dev/app"), 2222);
        assert_eq!(labels[LABEL_MANAGED], "true");
        assert_eq!(labels[LABEL_WORKSPACE_BOX], "true");
        assert_eq!(labels[LABEL_WORKING_DIR], "/home/dev/app");
        assert_eq!(labels[LABEL_SSH_PORT], "2222");
        assert_eq!(labels[LABEL_WORKSPACE_ID].len(), 32);
    }

    #[test]
    fn test_singleton_labels() {
        let relay = ContainerRepository::singleton_labels(SingletonKind::Relay);
        assert_eq!(relay[LABEL_PROXY], "true");
        assert!(!relay.contains_key(LABEL_VPN));

        let vpn = ContainerRepository::singleton_labels(SingletonKind::Vpn);
        assert_eq!(vpn[LABEL_VPN], "true");
        assert_eq!(vpn[LABEL_MANAGED], "true");
    }
}
