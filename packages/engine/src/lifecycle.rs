// ABOUTME: Dev container lifecycle manager orchestrating start, stop, exec, reload and inspection
// ABOUTME: Resolves the environment, keeps one dev container per workspace and syncs relay and VPN after boot

use crate::config::EngineConfig;
use crate::containers::{
    ContainerEngine, ContainerState, ContainerSummary, CreateSpec, EngineError, HostSpec,
    PortBinding, Protocol,
};
use crate::env::{BoxHashStore, EnvResolver, RecordSync};
use crate::error::{DevboxError, Result};
use crate::interaction::{FixedAnswer, NoProgress, Progress, Prompter};
use crate::readiness::{collect_diagnostics, ReadinessObserver, ReadinessOutcome, DIAGNOSTIC_TAIL};
use crate::relay::{RelayAction, RelayManager};
use crate::repository::{
    managed_labels, ContainerRepository, LABEL_SSH_PORT, LABEL_WORKING_DIR,
};
use crate::service::{EnvironmentService, PackageIndex};
use crate::ssh;
use crate::vpn::{VpnAction, VpnConfigStore, VpnManager};
use crate::workspace::{
    identity_of, normalize_path, ssh_domain, KlFile, LocalEnv, LocalEnvStore, Workspace,
    WorkspaceId,
};
use futures::StreamExt;
use klbox_config::constants::{
    KLCONFIG_PATH, KL_BASE_URL, KL_DNS, KL_HASH_FILE, KL_WORKSPACE, SSH_PORT,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const HOME_CACHE_VOLUME: &str = "kl-home-cache";
pub const NIX_STORE_VOLUME: &str = "kl-nix-store";

const CONTAINER_CONFIG_DIR: &str = "/.cache/kl";
const CONTAINER_WORKSPACE_DIR: &str = "/workspace";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const STOP_TIMEOUT_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    AlreadyRunning,
    Started,
    Created,
}

#[derive(Debug, Clone)]
pub struct StartReport {
    pub container_id: String,
    pub action: ContainerAction,
    pub record: RecordSync,
    pub record_path: PathBuf,
    pub relay: RelayAction,
    pub vpn: Option<VpnAction>,
    pub ssh_port: u16,
    pub ssh_command: String,
    /// Other workspaces' containers stopped to make room
    pub stopped_others: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Absent,
    Stopped(String),
    Removed(String),
}

/// One dev container as shown by `info` and `ps`
#[derive(Debug, Clone)]
pub struct BoxInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub path: String,
    pub ssh_port: Option<u16>,
    pub ssh_command: Option<String>,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub struct DevboxManager {
    config: EngineConfig,
    engine: Arc<dyn ContainerEngine>,
    repo: ContainerRepository,
    service: Arc<dyn EnvironmentService>,
    resolver: EnvResolver,
    records: BoxHashStore,
    bindings: LocalEnvStore,
    relay: RelayManager,
    vpn: VpnManager,
    vpn_configs: VpnConfigStore,
    prompter: Arc<dyn Prompter>,
    progress: Arc<dyn Progress>,
}

impl DevboxManager {
    pub fn new(
        config: EngineConfig,
        engine: Arc<dyn ContainerEngine>,
        service: Arc<dyn EnvironmentService>,
        index: Arc<dyn PackageIndex>,
    ) -> Self {
        let repo = ContainerRepository::new(engine.clone());
        Self {
            resolver: EnvResolver::new(service.clone(), index),
            records: BoxHashStore::new(config.box_hash_dir()),
            bindings: LocalEnvStore::new(config.local_envs_path()),
            relay: RelayManager::new(repo.clone(), &config.relay_image, &config.network),
            vpn: VpnManager::new(repo.clone(), &config.vpn_image),
            vpn_configs: VpnConfigStore::new(config.vpn_dir()),
            prompter: Arc::new(FixedAnswer(false)),
            progress: Arc::new(NoProgress),
            config,
            engine,
            repo,
            service,
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn records(&self) -> &BoxHashStore {
        &self.records
    }

    /// Load kl.yml and the environment binding, binding `defaultEnv` on first use
    pub async fn open_workspace(&self, path: &Path) -> Result<Workspace> {
        let path = normalize_path(path);
        let spec = KlFile::load(&self.config.kl_file_for(&path))?;

        let binding = match self.bindings.get(&path)? {
            Some(binding) if !binding.name.is_empty() => binding,
            _ => {
                if spec.default_env.is_empty() {
                    return Err(DevboxError::InvalidWorkspace(
                        "kl.yml has no defaultEnv, select an environment first".into(),
                    ));
                }
                let info = self
                    .service
                    .get_environment(&spec.account_name, &spec.default_env)
                    .await
                    .map_err(DevboxError::resolution(format!(
                        "look up environment '{}'",
                        spec.default_env
                    )))?;
                info!("Binding {} to environment {}", path.display(), info.name);
                self.bindings.set(
                    &path,
                    LocalEnv {
                        name: info.name,
                        cluster_name: info.cluster_name,
                        target_namespace: info.target_namespace,
                        ssh_port: 0,
                    },
                )?
            }
        };

        Ok(Workspace::new(path, binding, spec))
    }

    /// Record identity; inside a dev container the mounted workspace path wins
    fn record_id(&self, workspace: &Workspace) -> WorkspaceId {
        match &self.config.in_box_workspace {
            Some(path) => identity_of(path),
            None => workspace.id(),
        }
    }

    fn ssh_command_for(&self, path: &Path, port: u16) -> String {
        let domain = ssh_domain(path, &self.config.home_dir, &self.config.ssh_domain_suffix);
        ssh::ssh_command(&domain, port)
    }

    async fn sync_record(&self, workspace: &Workspace) -> Result<(RecordSync, PathBuf)> {
        let env = self.resolver.resolve(workspace).await?;
        let id = self.record_id(workspace);
        let outcome = self.records.sync(&id, env)?;
        Ok((outcome, self.records.path_for(&id)))
    }

    /// Running dev containers of other workspaces, after the user agreed to stop them
    async fn confirm_stop_others(&self, workspace: &Workspace) -> Result<Vec<ContainerSummary>> {
        let path = workspace.path.display().to_string();
        let others: Vec<ContainerSummary> = self
            .repo
            .list_workspaces(false)
            .await
            .map_err(DevboxError::container("list running dev containers"))?
            .into_iter()
            .filter(|c| c.state.is_running() && c.label(LABEL_WORKING_DIR) != Some(path.as_str()))
            .collect();

        if others.is_empty() {
            return Ok(others);
        }

        let names: Vec<&str> = others
            .iter()
            .map(|c| c.label(LABEL_WORKING_DIR).unwrap_or(c.id.as_str()))
            .collect();
        let message = format!(
            "devbox for {} is running, stop it and start this workspace?",
            names.join(", ")
        );

        let mut confirmed = false;
        self.progress
            .suspend(&mut || confirmed = self.prompter.confirm(&message));

        if !confirmed {
            return Err(DevboxError::Declined(format!(
                "{} must be stopped first",
                names.join(", ")
            )));
        }
        Ok(others)
    }

    async fn create_dev_container(
        &self,
        workspace: &Workspace,
        ssh_port: u16,
        record_path: &Path,
    ) -> Result<String> {
        self.progress.set_message("pulling dev container image");
        self.engine
            .ensure_image(&self.config.box_image)
            .await
            .map_err(DevboxError::container("pull dev container image"))?;

        for volume in [HOME_CACHE_VOLUME, NIX_STORE_VOLUME] {
            self.engine
                .ensure_volume(volume, managed_labels())
                .await
                .map_err(DevboxError::container(format!("create volume {}", volume)))?;
        }

        let authorized_keys = ssh::prepare_authorized_keys(
            &self.config.ssh_dir,
            &self.config.authorized_keys_dir(),
        )
        .await?;

        let record_file = record_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let id = self.record_id(workspace);

        let kl_file_in_box = if Path::new(&self.config.kl_file).is_absolute() {
            self.config.kl_file.clone()
        } else {
            format!("{}/{}", CONTAINER_WORKSPACE_DIR, self.config.kl_file)
        };

        let env = BTreeMap::from([
            (
                KL_HASH_FILE.to_string(),
                format!("{}/box-hash/{}", CONTAINER_CONFIG_DIR, record_file),
            ),
            (SSH_PORT.to_string(), ssh_port.to_string()),
            (KL_WORKSPACE.to_string(), workspace.path.display().to_string()),
            (KLCONFIG_PATH.to_string(), kl_file_in_box),
            (KL_DNS.to_string(), self.config.dns.clone()),
            (KL_BASE_URL.to_string(), self.config.base_url.clone()),
        ]);

        let binds = vec![
            format!("{}:/tmp/ssh2/authorized_keys:ro,z", authorized_keys.display()),
            format!("{}:/home:z", HOME_CACHE_VOLUME),
            format!("{}:/nix:z", NIX_STORE_VOLUME),
            format!("{}:{}:z", self.config.config_dir.display(), CONTAINER_CONFIG_DIR),
            format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET),
            format!("{}:{}:z", workspace.path.display(), CONTAINER_WORKSPACE_DIR),
        ];

        let spec = CreateSpec {
            name: Some(format!("kl-{}", id.short())),
            image: self.config.box_image.clone(),
            env,
            labels: ContainerRepository::workspace_labels(&workspace.path, ssh_port),
            hostname: Some("box".to_string()),
            host: HostSpec {
                binds,
                network_mode: Some(self.config.network.clone()),
                port_bindings: vec![PortBinding::same(ssh_port, Protocol::Tcp)],
                privileged: true,
                ..Default::default()
            },
            ..Default::default()
        };

        self.progress.set_message("creating dev container");
        let container_id = self
            .engine
            .create(&spec)
            .await
            .map_err(DevboxError::container("create dev container"))?;

        info!(
            "Created dev container {} for {}",
            container_id,
            workspace.path.display()
        );
        Ok(container_id)
    }

    async fn sync_vpn(&self, account: &str) -> Result<Option<VpnAction>> {
        if account.is_empty() {
            debug!("No account on workspace, skipping VPN tunnel");
            return Ok(None);
        }
        let config = self
            .vpn_configs
            .get_or_fetch(account, self.service.as_ref())
            .await?;
        Ok(Some(self.vpn.sync(&config.wireguard_config).await?))
    }

    /// Bring the workspace's dev container up and sync relay and VPN
    pub async fn start(&self, workspace: &Workspace) -> Result<StartReport> {
        info!("Starting devbox for {}", workspace.path.display());

        let existing = self
            .repo
            .find_by_workspace(&workspace.path)
            .await
            .map_err(DevboxError::container("look up dev container"))?;

        // Ask before touching anything so a decline leaves no trace
        let others = match &existing {
            Some(c) if c.state.is_running() => Vec::new(),
            _ => self.confirm_stop_others(workspace).await?,
        };

        self.progress.set_message("resolving environment");
        self.engine
            .ensure_network(&self.config.network, managed_labels())
            .await
            .map_err(DevboxError::container(format!(
                "create network {}",
                self.config.network
            )))?;

        let (record, record_path) = self.sync_record(workspace).await?;
        let ssh_port = self.bindings.allocate_port(&workspace.path)?;

        // At most one dev container may share the global caches
        let mut stopped_others = Vec::new();
        for other in &others {
            info!("Stopping dev container {}", other.id);
            self.engine
                .stop(&other.id, STOP_TIMEOUT_SECS)
                .await
                .map_err(DevboxError::container("stop other dev container"))?;
            stopped_others.push(other.id.clone());
        }

        let (container_id, action, booted_at) = match existing {
            Some(c) if c.state.is_running() => (c.id, ContainerAction::AlreadyRunning, None),
            Some(c) => {
                let since = unix_now();
                self.engine
                    .start(&c.id)
                    .await
                    .map_err(DevboxError::container("start dev container"))?;
                (c.id, ContainerAction::Started, Some(since))
            }
            None => {
                let id = self
                    .create_dev_container(workspace, ssh_port, &record_path)
                    .await?;
                let since = unix_now();
                self.engine
                    .start(&id)
                    .await
                    .map_err(DevboxError::container("start dev container"))?;
                (id, ContainerAction::Created, Some(since))
            }
        };

        if let Some(since) = booted_at {
            self.progress.set_message("waiting for dev container");
            let observer = ReadinessObserver::new(
                self.engine.clone(),
                self.config.readiness_timeout,
                self.progress.clone(),
            );
            let outcome = observer.await_ready(&container_id, Some(since)).await;
            if outcome != ReadinessOutcome::Ready {
                warn!("Dev container {} {}", container_id, outcome);
                let diagnostics = collect_diagnostics(
                    self.engine.as_ref(),
                    &container_id,
                    Some(since),
                    DIAGNOSTIC_TAIL,
                )
                .await;
                return Err(DevboxError::Readiness {
                    outcome,
                    diagnostics,
                });
            }
        }

        let current = self
            .repo
            .find_by_workspace(&workspace.path)
            .await
            .map_err(DevboxError::container("look up dev container"))?
            .ok_or(DevboxError::NotRunning)?;

        self.progress.set_message("syncing port relay");
        let relay = self
            .relay
            .sync(&workspace.spec.ports, current.ip_on(&self.config.network))
            .await?;

        self.progress.set_message("syncing vpn tunnel");
        let vpn = self.sync_vpn(workspace.account()).await?;

        Ok(StartReport {
            container_id,
            action,
            record,
            record_path,
            relay,
            vpn,
            ssh_port,
            ssh_command: self.ssh_command_for(&workspace.path, ssh_port),
            stopped_others,
        })
    }

    /// Stop (and optionally remove) the workspace's dev container; absent is not an error
    pub async fn stop(&self, workspace: &Workspace, remove: bool) -> Result<StopOutcome> {
        let Some(container) = self
            .repo
            .find_by_workspace(&workspace.path)
            .await
            .map_err(DevboxError::container("look up dev container"))?
        else {
            debug!("No dev container for {}", workspace.path.display());
            return Ok(StopOutcome::Absent);
        };

        match self.engine.stop(&container.id, STOP_TIMEOUT_SECS).await {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => return Err(DevboxError::container("stop dev container")(e)),
        }

        if remove {
            self.engine
                .remove(&container.id, true)
                .await
                .map_err(DevboxError::container("remove dev container"))?;
            info!("Removed dev container {}", container.id);
            return Ok(StopOutcome::Removed(container.id));
        }

        info!("Stopped dev container {}", container.id);
        Ok(StopOutcome::Stopped(container.id))
    }

    pub async fn restart(&self, workspace: &Workspace) -> Result<StartReport> {
        self.stop(workspace, false).await?;
        self.start(workspace).await
    }

    /// Stop every dev container and tear down the relay
    pub async fn stop_all(&self) -> Result<Vec<String>> {
        let running = self
            .repo
            .list_workspaces(false)
            .await
            .map_err(DevboxError::container("list dev containers"))?;

        let mut stopped = Vec::new();
        for container in running {
            match self.engine.stop(&container.id, STOP_TIMEOUT_SECS).await {
                Ok(()) | Err(EngineError::NotFound(_)) => stopped.push(container.id),
                Err(e) => return Err(DevboxError::container("stop dev container")(e)),
            }
        }

        self.relay.sync(&[], None).await?;
        Ok(stopped)
    }

    /// Re-resolve the environment and rewrite the record when it drifted
    pub async fn reload(&self, workspace: &Workspace) -> Result<RecordSync> {
        let (outcome, path) = self.sync_record(workspace).await?;
        info!("Reload of {}: {:?}", path.display(), outcome);
        Ok(outcome)
    }

    /// Run `command` in the running dev container, piping `stdin`/`stdout`; returns the exit code
    pub async fn exec<R, W>(
        &self,
        workspace: &Workspace,
        command: Vec<String>,
        tty: bool,
        mut stdin: R,
        mut stdout: W,
    ) -> Result<i64>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let container = self
            .repo
            .find_by_workspace(&workspace.path)
            .await
            .map_err(DevboxError::container("look up dev container"))?
            .filter(|c| c.state.is_running())
            .ok_or(DevboxError::NotRunning)?;

        let command = if command.is_empty() {
            vec!["/bin/bash".to_string()]
        } else {
            command
        };

        let session = self
            .engine
            .exec(&container.id, command, tty)
            .await
            .map_err(DevboxError::container("start exec session"))?;

        let mut input = session.input;
        let pump = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stdin, &mut input).await;
            let _ = input.shutdown().await;
        });

        let mut output = session.output;
        while let Some(chunk) = output.next().await {
            let chunk = chunk.map_err(DevboxError::container("read exec output"))?;
            stdout.write_all(&chunk).await?;
        }
        stdout.flush().await?;
        pump.abort();

        self.engine
            .exec_exit_code(&session.exec_id)
            .await
            .map_err(DevboxError::container("inspect exec session"))
    }

    fn box_info(&self, container: ContainerSummary) -> BoxInfo {
        let path = container.label(LABEL_WORKING_DIR).unwrap_or_default().to_string();
        let ssh_port = container
            .label(LABEL_SSH_PORT)
            .and_then(|p| p.parse::<u16>().ok());
        let ssh_command = ssh_port
            .filter(|_| !path.is_empty())
            .map(|port| self.ssh_command_for(Path::new(&path), port));

        BoxInfo {
            name: container.display_name(),
            id: container.id,
            state: container.state,
            path,
            ssh_port,
            ssh_command,
        }
    }

    pub async fn info(&self, workspace: &Workspace) -> Result<Option<BoxInfo>> {
        Ok(self
            .repo
            .find_by_workspace(&workspace.path)
            .await
            .map_err(DevboxError::container("look up dev container"))?
            .map(|c| self.box_info(c)))
    }

    pub async fn list(&self) -> Result<Vec<BoxInfo>> {
        let containers = self
            .repo
            .list_workspaces(true)
            .await
            .map_err(DevboxError::container("list dev containers"))?;
        Ok(containers.into_iter().map(|c| self.box_info(c)).collect())
    }
}
