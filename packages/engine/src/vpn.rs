// ABOUTME: Singleton WireGuard tunnel container and the per-account VPN config cache
// ABOUTME: Rebuilds the tunnel only when the config digest label changes, otherwise just starts it

use crate::containers::{ContainerSummary, CreateSpec, EngineError, HostSpec};
use crate::error::{DevboxError, Result};
use crate::repository::{ContainerRepository, SingletonKind, LABEL_VPN_SUM};
use crate::service::EnvironmentService;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnAction {
    Unchanged,
    /// Matching tunnel existed but was stopped
    Started(String),
    Created(String),
    Replaced(String),
}

pub fn config_digest(wireguard_config: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(wireguard_config.as_bytes());
    hex::encode(hasher.finalize())
}

/// Startup script writing the config and bringing wg0 up
pub fn tunnel_script(wireguard_config_b64: &str) -> String {
    format!(
        "echo {} | base64 -d > /etc/wireguard/wg0.conf && (wg-quick down wg0 || echo done) && wg-quick up wg0 && tail -f /dev/null",
        wireguard_config_b64
    )
}

/// Validate a base64 wireguard config so it is safe to splice into the startup script
fn validate_config(wireguard_config_b64: &str) -> Result<()> {
    if wireguard_config_b64.trim().is_empty() {
        return Err(DevboxError::Tunnel("wireguard config is empty".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(wireguard_config_b64.trim())
        .map_err(|e| DevboxError::Tunnel(format!("wireguard config is not valid base64: {}", e)))?;
    Ok(())
}

pub struct VpnManager {
    repo: ContainerRepository,
    image: String,
}

impl VpnManager {
    pub fn new(repo: ContainerRepository, image: impl Into<String>) -> Self {
        Self {
            repo,
            image: image.into(),
        }
    }

    async fn remove(&self, container: &ContainerSummary) -> Result<()> {
        let engine = self.repo.engine();
        match engine.stop(&container.id, 0).await {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => {
                return Err(DevboxError::Tunnel(format!(
                    "stop tunnel {}: {}",
                    container.id, e
                )))
            }
        }
        engine
            .remove(&container.id, true)
            .await
            .map_err(|e| DevboxError::Tunnel(format!("remove tunnel {}: {}", container.id, e)))
    }

    /// Make the singleton tunnel run `wireguard_config_b64`
    pub async fn sync(&self, wireguard_config_b64: &str) -> Result<VpnAction> {
        let wireguard_config_b64 = wireguard_config_b64.trim();
        validate_config(wireguard_config_b64)?;

        let digest = config_digest(wireguard_config_b64);
        let existing = self
            .repo
            .find_singletons(SingletonKind::Vpn)
            .await
            .map_err(|e| DevboxError::Tunnel(format!("list tunnels: {}", e)))?;

        let keep = existing
            .iter()
            .position(|c| c.label(LABEL_VPN_SUM) == Some(digest.as_str()));

        for (i, container) in existing.iter().enumerate() {
            if Some(i) != keep {
                self.remove(container).await?;
            }
        }

        let engine = self.repo.engine();

        if let Some(i) = keep {
            let current = &existing[i];
            if current.state.is_running() {
                debug!("VPN tunnel {} is up to date", current.id);
                return Ok(VpnAction::Unchanged);
            }
            engine
                .start(&current.id)
                .await
                .map_err(|e| DevboxError::Tunnel(format!("start tunnel: {}", e)))?;
            info!("Started stopped VPN tunnel {}", current.id);
            return Ok(VpnAction::Started(current.id.clone()));
        }

        engine
            .ensure_image(&self.image)
            .await
            .map_err(|e| DevboxError::Tunnel(format!("pull tunnel image: {}", e)))?;

        let mut labels = ContainerRepository::singleton_labels(SingletonKind::Vpn);
        labels.insert(LABEL_VPN_SUM.to_string(), digest);

        let spec = CreateSpec {
            image: self.image.clone(),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                tunnel_script(wireguard_config_b64),
            ]),
            labels,
            host: HostSpec {
                cap_add: vec!["NET_ADMIN".to_string()],
                network_mode: Some("host".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let id = engine
            .create(&spec)
            .await
            .map_err(|e| DevboxError::Tunnel(format!("create tunnel: {}", e)))?;
        engine
            .start(&id)
            .await
            .map_err(|e| DevboxError::Tunnel(format!("start tunnel: {}", e)))?;

        info!("VPN tunnel {} is up", id);
        if existing.is_empty() {
            Ok(VpnAction::Created(id))
        } else {
            Ok(VpnAction::Replaced(id))
        }
    }
}

/// Cached per-account VPN device and its wireguard config (base64)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountVpnConfig {
    #[serde(rename = "wg", default)]
    pub wireguard_config: String,
    #[serde(rename = "device", default)]
    pub device_name: String,
}

pub struct VpnConfigStore {
    dir: PathBuf,
}

impl VpnConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, account: &str) -> PathBuf {
        self.dir.join(format!("{}.json", account))
    }

    pub fn read(&self, account: &str) -> Result<Option<AccountVpnConfig>> {
        let path = self.path_for(account);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!("Ignoring unreadable VPN cache {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    fn write(&self, account: &str, config: &AccountVpnConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(account), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Cached config, fetching (and creating the device if needed) when the cache is empty
    pub async fn get_or_fetch(
        &self,
        account: &str,
        service: &dyn EnvironmentService,
    ) -> Result<AccountVpnConfig> {
        let cached = self.read(account)?.unwrap_or_default();
        if !cached.wireguard_config.trim().is_empty() {
            return Ok(cached);
        }

        let device = if cached.device_name.is_empty() {
            let name = preferred_device_name();
            let check = service
                .check_device_name(account, &name)
                .await
                .map_err(|e| DevboxError::Tunnel(format!("check device name: {}", e)))?;

            let name = if check.result {
                name
            } else {
                check.suggested_names.into_iter().next().ok_or_else(|| {
                    DevboxError::Tunnel(format!("device name '{}' is taken", name))
                })?
            };

            service
                .create_device(account, &name)
                .await
                .map_err(|e| DevboxError::Tunnel(format!("create device {}: {}", name, e)))?
        } else {
            service
                .get_device(account, &cached.device_name)
                .await
                .map_err(|e| {
                    DevboxError::Tunnel(format!("fetch device {}: {}", cached.device_name, e))
                })?
        };

        let config = AccountVpnConfig {
            wireguard_config: device.wireguard_config,
            device_name: device.name,
        };
        self.write(account, &config)?;
        info!("Cached VPN device {} for {}", config.device_name, account);
        Ok(config)
    }
}

fn preferred_device_name() -> String {
    let raw = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();

    let name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let name = name.trim_matches('-');

    if name.is_empty() {
        "kl-device".to_string()
    } else {
        name.to_string()
    }
}
