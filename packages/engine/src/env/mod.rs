// ABOUTME: Resolved workspace environment and its canonical digests
// ABOUTME: PersistedEnv, BoxHashRecord, the value digest and the narrower declaration digest

pub mod lockfile;
pub mod resolver;
pub mod store;

pub use lockfile::PackageLock;
pub use resolver::EnvResolver;
pub use store::{BoxHashStore, RecordSync};

use crate::workspace::KlFile;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fully resolved environment a dev container materializes on boot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEnv {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub package_hashes: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub mounts: HashMap<String, String>,
    #[serde(default)]
    pub kl_config_hash: String,
}

/// On-disk record read by the dev container entrypoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxHashRecord {
    /// Hex md5 of the resolved values
    pub hash: String,
    pub config: PersistedEnv,
}

impl BoxHashRecord {
    pub fn new(config: PersistedEnv) -> Self {
        Self {
            hash: digest_hex(&config),
            config,
        }
    }
}

fn update_sorted(hasher: &mut Md5, map: &HashMap<String, String>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(map[key].as_bytes());
        hasher.update([0u8]);
    }
}

/// md5 over mounts, package references and env, each in sorted-key order
pub fn digest(env: &PersistedEnv) -> [u8; 16] {
    let mut hasher = Md5::new();
    for section in [&env.mounts, &env.package_hashes, &env.env] {
        update_sorted(&mut hasher, section);
        hasher.update([0xffu8]);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn digest_hex(env: &PersistedEnv) -> String {
    hex::encode(digest(env))
}

fn update_opt(hasher: &mut Md5, value: &Option<String>) {
    hasher.update(value.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
}

/// md5 over the declarations only (packages, env var and mount declarations)
pub fn kl_config_hash(file: &KlFile) -> String {
    let mut hasher = Md5::new();

    let mut env_vars: Vec<_> = file.env_vars.iter().collect();
    env_vars.sort_by(|a, b| a.key.cmp(&b.key));
    for decl in env_vars {
        hasher.update(decl.key.as_bytes());
        hasher.update([0u8]);
        update_opt(&mut hasher, &decl.value);
        update_opt(&mut hasher, &decl.config_ref);
        update_opt(&mut hasher, &decl.secret_ref);
        update_opt(&mut hasher, &decl.mres_ref);
    }

    let mut packages: Vec<&String> = file.packages.iter().collect();
    packages.sort();
    for package in packages {
        hasher.update(package.as_bytes());
        hasher.update([0u8]);
    }

    let mut mounts: Vec<_> = file.mounts.iter().collect();
    mounts.sort_by(|a, b| a.path.cmp(&b.path));
    for mount in mounts {
        hasher.update(mount.path.as_bytes());
        hasher.update([0u8]);
        update_opt(&mut hasher, &mount.config_ref);
        update_opt(&mut hasher, &mount.secret_ref);
    }

    hex::encode(hasher.finalize())
}
