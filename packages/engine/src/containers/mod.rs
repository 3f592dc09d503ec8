// ABOUTME: Container engine contract consumed by the orchestration core
// ABOUTME: Label-addressed create/start/stop/remove/list/exec/log operations plus volume, network and image helpers

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

pub mod docker;

pub use docker::DockerEngine;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Exec error: {0}")]
    Exec(String),

    #[error("Log stream error: {0}")]
    Logs(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl ContainerState {
    /// Convert the engine's state string to our state
    pub fn from_engine(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown(other) => other.as_str(),
        };
        f.write_str(s)
    }
}

/// One row of a label-filtered container listing
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    /// network name -> IPv4 address on that network
    pub networks: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn ip_on(&self, network: &str) -> Option<&str> {
        self.networks
            .get(network)
            .map(String::as_str)
            .filter(|ip| !ip.is_empty())
    }

    pub fn display_name(&self) -> String {
        self.names
            .iter()
            .map(|n| n.trim_start_matches('/'))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `key=value` (or bare `key`) label filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: Option<String>,
}

impl LabelSelector {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Matches `key=true`
    pub fn flag(key: impl Into<String>) -> Self {
        Self::eq(key, "true")
    }

    pub fn to_filter(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.key, value),
            None => self.key.clone(),
        }
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match (&self.value, labels.get(&self.key)) {
            (Some(expected), Some(actual)) => expected == actual,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    /// Same port number on host and container
    pub fn same(port: u16, protocol: Protocol) -> Self {
        Self {
            container_port: port,
            host_port: port,
            protocol,
        }
    }

    /// Engine port key, e.g. `8080/tcp`
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostSpec {
    pub binds: Vec<String>,
    pub cap_add: Vec<String>,
    pub network_mode: Option<String>,
    pub port_bindings: Vec<PortBinding>,
    pub privileged: bool,
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub name: Option<String>,
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub labels: HashMap<String, String>,
    pub hostname: Option<String>,
    pub host: HostSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub stream: LogStream,
    pub follow: bool,
    /// Unix timestamp (seconds); `None` reads from the beginning
    pub since: Option<i64>,
}

/// Whole log lines with trailing newlines stripped
pub type LineStream = BoxStream<'static, EngineResult<String>>;

/// An attached exec session; poll `output` to completion, then ask for the exit code
pub struct ExecSession {
    pub exec_id: String,
    pub output: BoxStream<'static, EngineResult<Vec<u8>>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Container engine operations used by the orchestration core
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// List containers matching every selector
    async fn list(
        &self,
        selectors: &[LabelSelector],
        include_stopped: bool,
    ) -> EngineResult<Vec<ContainerSummary>>;

    /// Create a container (not started); returns its id
    async fn create(&self, spec: &CreateSpec) -> EngineResult<String>;

    async fn start(&self, container_id: &str) -> EngineResult<()>;

    /// Stop a container; stopping an already stopped container succeeds
    async fn stop(&self, container_id: &str, timeout_secs: i64) -> EngineResult<()>;

    /// Remove a container; removing a missing container succeeds
    async fn remove(&self, container_id: &str, force: bool) -> EngineResult<()>;

    /// Start an attached exec session
    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        tty: bool,
    ) -> EngineResult<ExecSession>;

    /// Wait for an exec session to finish and return its exit code
    async fn exec_exit_code(&self, exec_id: &str) -> EngineResult<i64>;

    /// Line iterator over one output channel of a container
    fn log_lines(&self, container_id: &str, options: LogOptions) -> LineStream;

    /// Create a labeled volume unless one with that label exists
    async fn ensure_volume(&self, name: &str, labels: HashMap<String, String>)
        -> EngineResult<()>;

    /// Create a labeled bridge network unless one with that label exists
    async fn ensure_network(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()>;

    /// Pull an image if it is not present locally
    async fn ensure_image(&self, image: &str) -> EngineResult<()>;
}
