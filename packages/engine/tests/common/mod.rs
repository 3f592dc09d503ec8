// ABOUTME: In-memory container engine, environment service and package index for integration tests
// ABOUTME: Plus a harness wiring them into a DevboxManager over temporary directories

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use klbox_engine::containers::{
    ContainerEngine, ContainerState, ContainerSummary, CreateSpec, EngineError, EngineResult,
    ExecSession, LabelSelector, LineStream, LogOptions, LogStream,
};
use klbox_engine::service::{
    EnvironmentInfo, EnvironmentService, NameCheck, PackageIndex, ResolvedPackage, ResolvedValue,
    ResourceQuery, ServiceContext, ServiceError, ServiceResult, VpnDevice,
};
use klbox_engine::workspace::SourceKind;
use klbox_engine::{DevboxManager, EngineConfig, FixedAnswer, KlFile, LocalEnv, Workspace};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const READY_LINE: &str = "kloudlite-entrypoint:SETUP_COMPLETE";
pub const CRASH_LINE: &str = "kloudlite-entrypoint:CRASHED";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: CreateSpec,
    pub state: ContainerState,
    pub ip: String,
}

impl FakeContainer {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.spec.labels.get(key).map(String::as_str)
    }

    /// Shell script passed via entrypoint or command
    pub fn script(&self) -> String {
        self.spec
            .entrypoint
            .as_ref()
            .or(self.spec.command.as_ref())
            .and_then(|args| args.last().cloned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptLine {
    pub stream: LogStream,
    /// Delay before this line, relative to the previous one
    pub delay: Duration,
    pub line: String,
}

impl ScriptLine {
    pub fn new(stream: LogStream, delay_ms: u64, line: &str) -> Self {
        Self {
            stream,
            delay: Duration::from_millis(delay_ms),
            line: line.to_string(),
        }
    }
}

#[derive(Default)]
struct EngineState {
    containers: Vec<FakeContainer>,
    next_id: usize,
    volumes: Vec<String>,
    networks: Vec<String>,
    images: Vec<String>,
    execs: HashMap<String, i64>,
}

#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub removed: AtomicUsize,
}

pub struct FakeEngine {
    state: Mutex<EngineState>,
    boot_script: Mutex<Vec<ScriptLine>>,
    /// When set, following streams end after the script instead of hanging
    streams_end: AtomicBool,
    exec_output: Mutex<(Vec<u8>, i64)>,
    pub counters: Counters,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            boot_script: Mutex::new(vec![ScriptLine::new(LogStream::Stdout, 0, READY_LINE)]),
            streams_end: AtomicBool::new(false),
            exec_output: Mutex::new((Vec::new(), 0)),
            counters: Counters::default(),
        }
    }
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_boot_script(&self, lines: Vec<ScriptLine>) {
        *self.boot_script.lock().unwrap() = lines;
    }

    pub fn set_streams_end(&self, end: bool) {
        self.streams_end.store(end, Ordering::SeqCst);
    }

    pub fn set_exec_result(&self, output: &[u8], exit_code: i64) {
        *self.exec_output.lock().unwrap() = (output.to_vec(), exit_code);
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn with_label(&self, key: &str) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.label(key) == Some("true"))
            .collect()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.containers().into_iter().find(|c| c.id == id)
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.clone()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.clone()
    }

    /// Seed a container directly, bypassing counters
    pub fn insert(&self, spec: CreateSpec, state: ContainerState) -> String {
        let mut guard = self.state.lock().unwrap();
        guard.next_id += 1;
        let id = format!("seed{}", guard.next_id);
        let ip = format!("172.20.0.{}", guard.next_id + 1);
        guard.containers.push(FakeContainer {
            id: id.clone(),
            spec,
            state,
            ip,
        });
        id
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        let mut guard = self.state.lock().unwrap();
        if let Some(c) = guard.containers.iter_mut().find(|c| c.id == id) {
            c.state = state;
        }
    }

    fn summary(container: &FakeContainer) -> ContainerSummary {
        let mut networks = HashMap::new();
        if let Some(network) = &container.spec.host.network_mode {
            if network != "host" && container.state.is_running() {
                networks.insert(network.clone(), container.ip.clone());
            }
        }
        ContainerSummary {
            id: container.id.clone(),
            names: container
                .spec
                .name
                .iter()
                .map(|n| format!("/{}", n))
                .collect(),
            state: container.state.clone(),
            labels: container.spec.labels.clone(),
            networks,
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list(
        &self,
        selectors: &[LabelSelector],
        include_stopped: bool,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let guard = self.state.lock().unwrap();
        Ok(guard
            .containers
            .iter()
            .filter(|c| include_stopped || c.state.is_running())
            .filter(|c| selectors.iter().all(|s| s.matches(&c.spec.labels)))
            .map(Self::summary)
            .collect())
    }

    async fn create(&self, spec: &CreateSpec) -> EngineResult<String> {
        let mut guard = self.state.lock().unwrap();
        if let Some(name) = &spec.name {
            if guard
                .containers
                .iter()
                .any(|c| c.spec.name.as_ref() == Some(name))
            {
                return Err(EngineError::Container(format!("name {} is in use", name)));
            }
        }
        guard.next_id += 1;
        let id = format!("c{}", guard.next_id);
        let ip = format!("172.20.0.{}", guard.next_id + 1);
        guard.containers.push(FakeContainer {
            id: id.clone(),
            spec: spec.clone(),
            state: ContainerState::Created,
            ip,
        });
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        let container = guard
            .containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        container.state = ContainerState::Running;
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, container_id: &str, _timeout_secs: i64) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        let container = guard
            .containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        container.state = ContainerState::Exited;
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        if let Some(pos) = guard.containers.iter().position(|c| c.id == container_id) {
            if guard.containers[pos].state.is_running() && !force {
                return Err(EngineError::Container("container is running".into()));
            }
            guard.containers.remove(pos);
            self.counters.removed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn exec(
        &self,
        container_id: &str,
        _command: Vec<String>,
        _tty: bool,
    ) -> EngineResult<ExecSession> {
        let (output, exit_code) = self.exec_output.lock().unwrap().clone();
        let exec_id = format!("exec-{}", container_id);
        self.state
            .lock()
            .unwrap()
            .execs
            .insert(exec_id.clone(), exit_code);

        let chunks: Vec<EngineResult<Vec<u8>>> = vec![Ok(output)];
        Ok(ExecSession {
            exec_id,
            output: Box::pin(futures::stream::iter(chunks)),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> EngineResult<i64> {
        self.state
            .lock()
            .unwrap()
            .execs
            .get(exec_id)
            .copied()
            .ok_or_else(|| EngineError::Exec(format!("unknown exec {}", exec_id)))
    }

    fn log_lines(&self, _container_id: &str, options: LogOptions) -> LineStream {
        let lines: Vec<(Duration, String)> = self
            .boot_script
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.stream == options.stream)
            .map(|l| (l.delay, l.line.clone()))
            .collect();
        let follow = options.follow;
        let hang = follow && !self.streams_end.load(Ordering::SeqCst);

        Box::pin(async_stream::stream! {
            for (delay, line) in lines {
                if follow && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<_, EngineError>(line);
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        })
    }

    async fn ensure_volume(
        &self,
        name: &str,
        _labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        if !guard.volumes.iter().any(|v| v == name) {
            guard.volumes.push(name.to_string());
        }
        Ok(())
    }

    async fn ensure_network(
        &self,
        name: &str,
        _labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        if !guard.networks.iter().any(|n| n == name) {
            guard.networks.push(name.to_string());
        }
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        if !guard.images.iter().any(|i| i == image) {
            guard.images.push(image.to_string());
        }
        Ok(())
    }
}

pub fn wireguard_b64(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text)
}

#[derive(Default)]
pub struct FakeService {
    values: Mutex<HashMap<(SourceKind, String, String), String>>,
    pub resolve_calls: Mutex<Vec<(ServiceContext, Vec<ResourceQuery>)>>,
    pub fail_resolve: AtomicBool,
    /// Return resolved values in reverse order
    pub reverse: AtomicBool,
    pub devices_created: AtomicUsize,
    pub device_config: Mutex<String>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        let service = Self::default();
        *service.device_config.lock().unwrap() = wireguard_b64("[Interface]\nAddress = 10.13.0.2/32\n");
        Arc::new(service)
    }

    pub fn set_value(&self, kind: SourceKind, resource: &str, key: &str, value: &str) {
        self.values.lock().unwrap().insert(
            (kind, resource.to_string(), key.to_string()),
            value.to_string(),
        );
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl EnvironmentService for FakeService {
    async fn resolve(
        &self,
        ctx: &ServiceContext,
        queries: &[ResourceQuery],
    ) -> ServiceResult<Vec<ResolvedValue>> {
        self.resolve_calls
            .lock()
            .unwrap()
            .push((ctx.clone(), queries.to_vec()));

        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(ServiceError::Api("environment service unavailable".into()));
        }

        let values = self.values.lock().unwrap();
        let mut out: Vec<ResolvedValue> = queries
            .iter()
            .filter_map(|q| {
                values
                    .get(&(q.kind, q.resource.clone(), q.key.clone()))
                    .map(|v| ResolvedValue {
                        kind: q.kind,
                        resource: q.resource.clone(),
                        key: q.key.clone(),
                        value: v.clone(),
                    })
            })
            .collect();
        if self.reverse.load(Ordering::SeqCst) {
            out.reverse();
        }
        Ok(out)
    }

    async fn get_environment(
        &self,
        _account: &str,
        environment: &str,
    ) -> ServiceResult<EnvironmentInfo> {
        Ok(EnvironmentInfo {
            name: environment.to_string(),
            display_name: environment.to_uppercase(),
            cluster_name: "dev-cluster".to_string(),
            target_namespace: format!("env-{}", environment),
        })
    }

    async fn check_device_name(&self, _account: &str, _name: &str) -> ServiceResult<NameCheck> {
        Ok(NameCheck {
            result: true,
            suggested_names: vec![],
        })
    }

    async fn create_device(&self, _account: &str, name: &str) -> ServiceResult<VpnDevice> {
        self.devices_created.fetch_add(1, Ordering::SeqCst);
        Ok(VpnDevice {
            name: name.to_string(),
            wireguard_config: self.device_config.lock().unwrap().clone(),
        })
    }

    async fn get_device(&self, _account: &str, name: &str) -> ServiceResult<VpnDevice> {
        Ok(VpnDevice {
            name: name.to_string(),
            wireguard_config: self.device_config.lock().unwrap().clone(),
        })
    }
}

#[derive(Default)]
pub struct FakeIndex {
    pub calls: AtomicUsize,
}

impl FakeIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PackageIndex for FakeIndex {
    async fn resolve(&self, name: &str, version: &str) -> ServiceResult<ResolvedPackage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if name == "missing" {
            return Err(ServiceError::NotFound(format!("{}@{}", name, version)));
        }
        Ok(ResolvedPackage {
            commit_hash: format!("{}-commit", name),
            version: if version == "latest" {
                "1.0.0".to_string()
            } else {
                version.to_string()
            },
        })
    }
}

/// Temporary config dir, home with an ssh key, and a workspace directory
pub struct Harness {
    pub config_dir: TempDir,
    pub home: TempDir,
    pub workspace_dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub service: Arc<FakeService>,
    pub index: Arc<FakeIndex>,
}

impl Harness {
    pub fn new() -> Self {
        let home = TempDir::new().unwrap();
        let ssh_dir = home.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        std::fs::write(ssh_dir.join("id_rsa.pub"), "ssh-rsa AAAATEST dev@host\n").unwrap();

        Self {
            config_dir: TempDir::new().unwrap(),
            home,
            workspace_dir: TempDir::new().unwrap(),
            engine: FakeEngine::new(),
            service: FakeService::new(),
            index: FakeIndex::new(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::for_dirs(self.config_dir.path(), self.home.path());
        config.readiness_timeout = Duration::from_secs(5);
        config
    }

    pub fn manager(&self, confirm: bool) -> DevboxManager {
        DevboxManager::new(
            self.config(),
            self.engine.clone(),
            self.service.clone(),
            self.index.clone(),
        )
        .with_prompter(Arc::new(FixedAnswer(confirm)))
    }

    pub fn workspace_path(&self) -> PathBuf {
        self.workspace_dir.path().to_path_buf()
    }

    /// Workspace bound to environment `dev`
    pub fn workspace(&self, spec: KlFile) -> Workspace {
        Workspace::new(
            self.workspace_path(),
            LocalEnv {
                name: "dev".to_string(),
                ..Default::default()
            },
            spec,
        )
    }

    pub fn record_files(&self) -> Vec<PathBuf> {
        let dir = self.config().box_hash_dir();
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_none())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
