// ABOUTME: Contracts for the remote environment service and the package index
// ABOUTME: Resource queries, environment lookups and VPN device calls with their error type

use crate::workspace::SourceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

pub use http::{HttpEnvironmentService, HttpPackageIndex};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Not logged in, run `kl auth login`")]
    Unauthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Account and environment every resolution call is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub account: String,
    pub environment: String,
}

/// One (kind, resource, key) lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceQuery {
    pub kind: SourceKind,
    pub resource: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedValue {
    pub kind: SourceKind,
    pub resource: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub target_namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameCheck {
    pub result: bool,
    #[serde(default)]
    pub suggested_names: Vec<String>,
}

/// A VPN device registered with the account and its wireguard config (base64)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnDevice {
    pub name: String,
    pub wireguard_config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub commit_hash: String,
    pub version: String,
}

/// Remote environment/config service
#[async_trait]
pub trait EnvironmentService: Send + Sync {
    /// Resolve every query in one round trip
    async fn resolve(
        &self,
        ctx: &ServiceContext,
        queries: &[ResourceQuery],
    ) -> ServiceResult<Vec<ResolvedValue>>;

    async fn get_environment(&self, account: &str, environment: &str)
        -> ServiceResult<EnvironmentInfo>;

    async fn check_device_name(&self, account: &str, name: &str) -> ServiceResult<NameCheck>;

    async fn create_device(&self, account: &str, name: &str) -> ServiceResult<VpnDevice>;

    async fn get_device(&self, account: &str, name: &str) -> ServiceResult<VpnDevice>;
}

/// Package name + version to pinned reference lookup
#[async_trait]
pub trait PackageIndex: Send + Sync {
    async fn resolve(&self, name: &str, version: &str) -> ServiceResult<ResolvedPackage>;
}
