// ABOUTME: Environment variable name constants and built-in defaults
// ABOUTME: Centralized definitions of every environment variable the kl devbox tooling reads

// Remote API
pub const KL_BASE_URL: &str = "KL_BASE_URL";
pub const KL_SESSION: &str = "KL_SESSION";
pub const KL_PACKAGE_INDEX_URL: &str = "KL_PACKAGE_INDEX_URL";

// Local state
pub const KL_CONFIG_DIR: &str = "KL_CONFIG_DIR";
pub const KLCONFIG_PATH: &str = "KLCONFIG_PATH";

// Container images and networking
pub const KL_BOX_IMAGE: &str = "KL_BOX_IMAGE";
pub const KL_RELAY_IMAGE: &str = "KL_RELAY_IMAGE";
pub const KL_VPN_IMAGE: &str = "KL_VPN_IMAGE";
pub const KL_NETWORK: &str = "KL_NETWORK";
pub const KL_DNS: &str = "KL_DNS";

// Readiness
pub const KL_READINESS_TIMEOUT_SECS: &str = "KL_READINESS_TIMEOUT_SECS";

// Set inside a running dev container
pub const IN_DEV_BOX: &str = "IN_DEV_BOX";
pub const KL_WORKSPACE: &str = "KL_WORKSPACE";
pub const KL_HASH_FILE: &str = "KL_HASH_FILE";
pub const SSH_PORT: &str = "SSH_PORT";

// System Environment Variables
pub const HOME: &str = "HOME";
pub const USERPROFILE: &str = "USERPROFILE"; // Windows

pub const DEFAULT_BASE_URL: &str = "https://auth.dev.kloudlite.io";
pub const DEFAULT_PACKAGE_INDEX_URL: &str = "https://search.devbox.sh/v1/resolve";
pub const DEFAULT_BOX_IMAGE_REPO: &str = "ghcr.io/kloudlite/kl/box";
pub const DEFAULT_RELAY_IMAGE: &str = "ghcr.io/kloudlite/hub/socat:latest";
pub const DEFAULT_VPN_IMAGE: &str = "ghcr.io/kloudlite/hub/wireguard:latest";
pub const DEFAULT_NETWORK: &str = "kloudlite";
pub const DEFAULT_DNS: &str = "100.64.0.1";
pub const DEFAULT_SSH_DOMAIN_SUFFIX: &str = "local.khost.dev";
pub const DEFAULT_KL_FILE: &str = "kl.yml";
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 60;
