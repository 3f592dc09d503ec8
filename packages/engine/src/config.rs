// ABOUTME: Engine configuration resolved from KL_* environment variables
// ABOUTME: Holds images, network names, local state directories and the readiness timeout

use crate::error::{DevboxError, Result};
use klbox_config::constants::*;
use klbox_config::{env_flag, non_empty_env, parse_env_or_default_with_validation};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for the devbox engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local state root (records, bindings, VPN cache, authorized keys)
    pub config_dir: PathBuf,
    pub home_dir: PathBuf,
    /// Directory holding the user's SSH key pair
    pub ssh_dir: PathBuf,
    pub base_url: String,
    pub package_index_url: String,
    pub box_image: String,
    pub relay_image: String,
    pub vpn_image: String,
    pub network: String,
    pub dns: String,
    pub ssh_domain_suffix: String,
    /// Workspace config file name, relative to the workspace root
    pub kl_file: String,
    pub readiness_timeout: Duration,
    /// Set when running inside a dev container; records are keyed by this path instead
    pub in_box_workspace: Option<PathBuf>,
}

impl EngineConfig {
    /// Defaults rooted at the given directories
    pub fn for_dirs(config_dir: impl Into<PathBuf>, home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        Self {
            config_dir: config_dir.into(),
            ssh_dir: home_dir.join(".ssh"),
            home_dir,
            base_url: DEFAULT_BASE_URL.to_string(),
            package_index_url: DEFAULT_PACKAGE_INDEX_URL.to_string(),
            box_image: default_box_image(),
            relay_image: DEFAULT_RELAY_IMAGE.to_string(),
            vpn_image: DEFAULT_VPN_IMAGE.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            dns: DEFAULT_DNS.to_string(),
            ssh_domain_suffix: DEFAULT_SSH_DOMAIN_SUFFIX.to_string(),
            kl_file: DEFAULT_KL_FILE.to_string(),
            readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
            in_box_workspace: None,
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let home_dir = non_empty_env(HOME)
            .or_else(|| non_empty_env(USERPROFILE))
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or_else(|| DevboxError::Config("could not determine home directory".into()))?;

        let config_dir = match non_empty_env(KL_CONFIG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => home_dir.join(".cache").join(".kl"),
        };

        let mut config = Self::for_dirs(config_dir, home_dir);

        if let Some(v) = non_empty_env(KL_BASE_URL) {
            config.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = non_empty_env(KL_PACKAGE_INDEX_URL) {
            config.package_index_url = v;
        }
        if let Some(v) = non_empty_env(KL_BOX_IMAGE) {
            config.box_image = v;
        }
        if let Some(v) = non_empty_env(KL_RELAY_IMAGE) {
            config.relay_image = v;
        }
        if let Some(v) = non_empty_env(KL_VPN_IMAGE) {
            config.vpn_image = v;
        }
        if let Some(v) = non_empty_env(KL_NETWORK) {
            config.network = v;
        }
        if let Some(v) = non_empty_env(KL_DNS) {
            config.dns = v;
        }
        if let Some(v) = non_empty_env(KLCONFIG_PATH) {
            config.kl_file = v;
        }

        let timeout = parse_env_or_default_with_validation(
            KL_READINESS_TIMEOUT_SECS,
            DEFAULT_READINESS_TIMEOUT_SECS,
            |v| (1..=3600).contains(&v),
        );
        config.readiness_timeout = Duration::from_secs(timeout);

        if env_flag(IN_DEV_BOX) {
            config.in_box_workspace = non_empty_env(KL_WORKSPACE).map(PathBuf::from);
        }

        Ok(config)
    }

    pub fn box_hash_dir(&self) -> PathBuf {
        self.config_dir.join("box-hash")
    }

    pub fn vpn_dir(&self) -> PathBuf {
        self.config_dir.join("vpn")
    }

    pub fn local_envs_path(&self) -> PathBuf {
        self.config_dir.join("local-envs.json")
    }

    pub fn authorized_keys_dir(&self) -> PathBuf {
        self.config_dir.join("ssh")
    }

    /// Workspace config file for a workspace root
    pub fn kl_file_for(&self, workspace: &Path) -> PathBuf {
        let file = Path::new(&self.kl_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            workspace.join(file)
        }
    }
}

fn default_box_image() -> String {
    format!("{}:v{}", DEFAULT_BOX_IMAGE_REPO, env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_dirs_defaults() {
        let config = EngineConfig::for_dirs("/tmp/kl", "/home/dev");
        assert_eq!(config.ssh_dir, PathBuf::from("/home/dev/.ssh"));
        assert_eq!(config.box_hash_dir(), PathBuf::from("/tmp/kl/box-hash"));
        assert_eq!(
            config.local_envs_path(),
            PathBuf::from("/tmp/kl/local-envs.json")
        );
        assert_eq!(config.readiness_timeout, Duration::from_secs(60));
        assert_eq!(config.network, "kloudlite");
        assert!(config.box_image.starts_with("ghcr.io/kloudlite/kl/box:v"));
    }

    #[test]
    fn test_kl_file_resolution() {
        let mut config = EngineConfig::for_dirs("/tmp/kl", "/home/dev");
        assert_eq!(
            config.kl_file_for(Path::new("/work/app")),
            PathBuf::from("/work/app/kl.yml")
        );

        config.kl_file = "/etc/kl/custom.yml".to_string();
        assert_eq!(
            config.kl_file_for(Path::new("/work/app")),
            PathBuf::from("/etc/kl/custom.yml")
        );
    }
}
