// ABOUTME: HTTP clients for the environment service API and the package search index
// ABOUTME: Method-style POST calls with session cookies, plus a GET-based package resolver

use super::{
    EnvironmentInfo, EnvironmentService, NameCheck, PackageIndex, ResolvedPackage, ResolvedValue,
    ResourceQuery, ServiceContext, ServiceError, ServiceResult, VpnDevice,
};
use crate::workspace::SourceKind;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_VPN_NAME: &str = "default";

fn build_client() -> ServiceResult<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ServiceError::Network(e.to_string()))
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    method: &'a str,
    args: [Value; 1],
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigEntry {
    config_name: String,
    key: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretEntry {
    secret_name: String,
    key: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MresEntry {
    mres_name: String,
    key: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct ConfigSecretMap {
    #[serde(default)]
    configs: Vec<ConfigEntry>,
    #[serde(default)]
    secrets: Vec<SecretEntry>,
    #[serde(default)]
    mreses: Vec<MresEntry>,
}

#[derive(Deserialize, Default)]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct EnvironmentSpec {
    #[serde(default)]
    target_namespace: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvironmentResponse {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: EnvironmentSpec,
}

#[derive(Deserialize)]
struct WireguardConfig {
    value: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceResponse {
    #[serde(default)]
    metadata: Metadata,
    wireguard_config: Option<WireguardConfig>,
}

impl DeviceResponse {
    fn into_device(self) -> ServiceResult<VpnDevice> {
        let config = self.wireguard_config.ok_or_else(|| {
            ServiceError::InvalidResponse(format!(
                "device {} has no wireguard config yet",
                self.metadata.name
            ))
        })?;

        let wireguard_config = if config.encoding.eq_ignore_ascii_case("base64") {
            config.value
        } else {
            base64::engine::general_purpose::STANDARD.encode(config.value)
        };

        Ok(VpnDevice {
            name: self.metadata.name,
            wireguard_config,
        })
    }
}

/// Client for the method-style environment service API
#[derive(Clone)]
pub struct HttpEnvironmentService {
    http_client: Client,
    api_url: String,
    session: Option<String>,
}

impl HttpEnvironmentService {
    pub fn new(base_url: &str, session: Option<String>) -> ServiceResult<Self> {
        Ok(Self {
            http_client: build_client()?,
            api_url: format!("{}/api/", base_url.trim_end_matches('/')),
            session,
        })
    }

    fn cookie(&self, account: &str) -> ServiceResult<String> {
        let session = self.session.as_ref().ok_or(ServiceError::Unauthenticated)?;
        if account.is_empty() {
            Ok(format!("hotspot-session={}", session))
        } else {
            Ok(format!(
                "kloudlite-account={};hotspot-session={}",
                account, session
            ))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        account: &str,
        vars: Value,
    ) -> ServiceResult<T> {
        debug!("Calling {} for account '{}'", method, account);

        let response = self
            .http_client
            .post(&self.api_url)
            .header("cookie", self.cookie(account)?)
            .json(&ApiRequest {
                method,
                args: [vars],
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ServiceError::Unauthenticated)
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ServiceError::Api(format!(
                    "{} returned {}: {}",
                    method, status, body
                )));
            }
            _ => {}
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(ServiceError::Api(messages.join("; ")));
        }

        body.data
            .ok_or_else(|| ServiceError::InvalidResponse(format!("{} returned no data", method)))
    }
}

#[async_trait]
impl EnvironmentService for HttpEnvironmentService {
    async fn resolve(
        &self,
        ctx: &ServiceContext,
        queries: &[ResourceQuery],
    ) -> ServiceResult<Vec<ResolvedValue>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut config_queries = Vec::new();
        let mut secret_queries = Vec::new();
        let mut mres_queries = Vec::new();
        for q in queries {
            match q.kind {
                SourceKind::Config => {
                    config_queries.push(json!({"configName": q.resource, "key": q.key}))
                }
                SourceKind::Secret => {
                    secret_queries.push(json!({"secretName": q.resource, "key": q.key}))
                }
                SourceKind::Mres => {
                    mres_queries.push(json!({"mresName": q.resource, "key": q.key}))
                }
            }
        }

        let map: ConfigSecretMap = self
            .call(
                "cli_getConfigSecretMap",
                &ctx.account,
                json!({
                    "envName": ctx.environment,
                    "configQueries": config_queries,
                    "secretQueries": secret_queries,
                    "mresQueries": mres_queries,
                }),
            )
            .await?;

        let configs = map.configs.into_iter().map(|e| ResolvedValue {
            kind: SourceKind::Config,
            resource: e.config_name,
            key: e.key,
            value: e.value,
        });
        let secrets = map.secrets.into_iter().map(|e| ResolvedValue {
            kind: SourceKind::Secret,
            resource: e.secret_name,
            key: e.key,
            value: e.value,
        });
        let mreses = map.mreses.into_iter().map(|e| ResolvedValue {
            kind: SourceKind::Mres,
            resource: e.mres_name,
            key: e.key,
            value: e.value,
        });

        Ok(configs.chain(secrets).chain(mreses).collect())
    }

    async fn get_environment(
        &self,
        account: &str,
        environment: &str,
    ) -> ServiceResult<EnvironmentInfo> {
        let env: EnvironmentResponse = self
            .call("cli_getEnvironment", account, json!({ "name": environment }))
            .await?;

        let target_namespace = if env.spec.target_namespace.is_empty() {
            env.metadata.namespace
        } else {
            env.spec.target_namespace
        };

        Ok(EnvironmentInfo {
            name: if env.metadata.name.is_empty() {
                environment.to_string()
            } else {
                env.metadata.name
            },
            display_name: env.display_name,
            cluster_name: env.cluster_name,
            target_namespace,
        })
    }

    async fn check_device_name(&self, account: &str, name: &str) -> ServiceResult<NameCheck> {
        self.call(
            "cli_infraCheckNameAvailability",
            account,
            json!({ "resType": "global_vpn_device", "name": name }),
        )
        .await
    }

    async fn create_device(&self, account: &str, name: &str) -> ServiceResult<VpnDevice> {
        let device: DeviceResponse = self
            .call(
                "cli_createGlobalVPNDevice",
                account,
                json!({
                    "gvpnDevice": {
                        "metadata": { "name": name },
                        "globalVPNName": DEFAULT_VPN_NAME,
                        "displayName": name,
                        "creationMethod": "kl",
                    }
                }),
            )
            .await?;
        device.into_device()
    }

    async fn get_device(&self, account: &str, name: &str) -> ServiceResult<VpnDevice> {
        let device: DeviceResponse = self
            .call(
                "cli_getGlobalVpnDevice",
                account,
                json!({ "gvpn": DEFAULT_VPN_NAME, "deviceName": name }),
            )
            .await?;
        device.into_device()
    }
}

/// GET `<url>?name=<pkg>&version=<ver>` package resolver
#[derive(Clone)]
pub struct HttpPackageIndex {
    http_client: Client,
    url: String,
}

impl HttpPackageIndex {
    pub fn new(url: impl Into<String>) -> ServiceResult<Self> {
        Ok(Self {
            http_client: build_client()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PackageIndex for HttpPackageIndex {
    async fn resolve(&self, name: &str, version: &str) -> ServiceResult<ResolvedPackage> {
        debug!("Resolving package {}@{}", name, version);

        let response = self
            .http_client
            .get(&self.url)
            .query(&[("name", name), ("version", version)])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(format!("{}@{}", name, version))),
            status if !status.is_success() => Err(ServiceError::Api(format!(
                "package index returned {} for {}@{}",
                status, name, version
            ))),
            _ => response
                .json::<ResolvedPackage>()
                .await
                .map_err(|e| ServiceError::InvalidResponse(e.to_string())),
        }
    }
}
