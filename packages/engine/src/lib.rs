// ABOUTME: Devbox orchestration engine for local, container-backed development environments
// ABOUTME: Dev container lifecycle, environment drift hashing, readiness, port relay and VPN tunnel

pub mod config;
pub mod containers;
pub mod env;
pub mod error;
pub mod interaction;
pub mod lifecycle;
pub mod readiness;
pub mod relay;
pub mod repository;
pub mod service;
pub mod ssh;
pub mod vpn;
pub mod workspace;

pub use config::EngineConfig;
pub use containers::{ContainerEngine, ContainerState, ContainerSummary, DockerEngine, EngineError};
pub use env::{BoxHashRecord, BoxHashStore, EnvResolver, PersistedEnv, RecordSync};
pub use error::{DevboxError, Result};
pub use interaction::{FixedAnswer, NoProgress, Progress, Prompter};
pub use lifecycle::{BoxInfo, ContainerAction, DevboxManager, StartReport, StopOutcome};
pub use readiness::{ReadinessObserver, ReadinessOutcome};
pub use relay::{RelayAction, RelayManager};
pub use repository::{ContainerRepository, SingletonKind};
pub use service::{
    EnvironmentService, HttpEnvironmentService, HttpPackageIndex, PackageIndex, ServiceError,
};
pub use vpn::{AccountVpnConfig, VpnAction, VpnConfigStore, VpnManager};
pub use workspace::{identity_of, KlFile, LocalEnv, LocalEnvStore, Workspace, WorkspaceId};
