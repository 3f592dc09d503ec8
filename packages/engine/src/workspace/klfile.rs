// ABOUTME: Workspace declaration file (kl.yml) model and parser
// ABOUTME: Turns env var and mount declarations into typed literal values and remote references

use crate::error::{DevboxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Remote resource kinds a declaration may point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Config,
    Secret,
    Mres,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Secret => "secret",
            Self::Mres => "managed resource",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarDecl {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mres_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountDecl {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

/// Parsed kl.yml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub default_env: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub env_vars: Vec<EnvVarDecl>,
    #[serde(default)]
    pub mounts: Vec<MountDecl>,
}

/// Env var sourced from a remote resource, renamed to `local_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvReference {
    pub local_key: String,
    pub kind: SourceKind,
    pub resource: String,
    pub remote_key: String,
}

/// File whose content comes from a remote resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountReference {
    pub target_path: String,
    pub kind: SourceKind,
    pub resource: String,
    pub remote_key: String,
}

/// Split a `resource/key` reference
fn parse_ref(raw: &str, what: &str) -> Result<(String, String)> {
    match raw.split_once('/') {
        Some((resource, key)) if !resource.is_empty() && !key.is_empty() => {
            Ok((resource.to_string(), key.to_string()))
        }
        _ => Err(DevboxError::InvalidWorkspace(format!(
            "{} reference '{}' must look like <name>/<key>",
            what, raw
        ))),
    }
}

impl KlFile {
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Self = serde_yaml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DevboxError::InvalidWorkspace(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> Result<()> {
        for decl in &self.env_vars {
            if decl.key.trim().is_empty() {
                return Err(DevboxError::InvalidWorkspace(
                    "env var declaration without a key".into(),
                ));
            }
            let sources = [
                decl.value.is_some(),
                decl.config_ref.is_some(),
                decl.secret_ref.is_some(),
                decl.mres_ref.is_some(),
            ]
            .iter()
            .filter(|set| **set)
            .count();
            if sources != 1 {
                return Err(DevboxError::InvalidWorkspace(format!(
                    "env var '{}' must have exactly one of value, configRef, secretRef, mresRef",
                    decl.key
                )));
            }
        }

        for mount in &self.mounts {
            if mount.config_ref.is_some() == mount.secret_ref.is_some() {
                return Err(DevboxError::InvalidWorkspace(format!(
                    "mount '{}' must have exactly one of configRef, secretRef",
                    mount.path
                )));
            }
        }

        Ok(())
    }

    /// Env vars with literal values
    pub fn literal_env(&self) -> Vec<(String, String)> {
        self.env_vars
            .iter()
            .filter_map(|d| d.value.as_ref().map(|v| (d.key.clone(), v.clone())))
            .collect()
    }

    pub fn env_references(&self) -> Result<Vec<EnvReference>> {
        let mut refs = Vec::new();
        for decl in &self.env_vars {
            let (kind, raw) = match (&decl.config_ref, &decl.secret_ref, &decl.mres_ref) {
                (Some(r), _, _) => (SourceKind::Config, r),
                (_, Some(r), _) => (SourceKind::Secret, r),
                (_, _, Some(r)) => (SourceKind::Mres, r),
                _ => continue,
            };
            let (resource, remote_key) = parse_ref(raw, &kind.to_string())?;
            refs.push(EnvReference {
                local_key: decl.key.clone(),
                kind,
                resource,
                remote_key,
            });
        }
        Ok(refs)
    }

    pub fn mount_references(&self) -> Result<Vec<MountReference>> {
        let mut refs = Vec::new();
        for mount in &self.mounts {
            let (kind, raw) = match (&mount.config_ref, &mount.secret_ref) {
                (Some(r), _) => (SourceKind::Config, r),
                (_, Some(r)) => (SourceKind::Secret, r),
                _ => continue,
            };
            let (resource, remote_key) = parse_ref(raw, &kind.to_string())?;
            refs.push(MountReference {
                target_path: mount.path.clone(),
                kind,
                resource,
                remote_key,
            });
        }
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
version: v1
accountName: acme
defaultEnv: staging
packages:
  - nodejs@20
  - git
ports: [3000, 8080]
envVars:
  - key: LOG_LEVEL
    value: debug
  - key: DB_URL
    secretRef: db-creds/url
  - key: API_HOST
    configRef: api/host
  - key: REDIS_URI
    mresRef: cache/uri
mounts:
  - path: /etc/app/config.json
    configRef: app-config/config.json
"#;

    #[test]
    fn test_parse_sample() {
        let file = KlFile::from_yaml(SAMPLE).unwrap();
        assert_eq!(file.account_name, "acme");
        assert_eq!(file.default_env, "staging");
        assert_eq!(file.ports, vec![3000, 8080]);
        assert_eq!(
            file.literal_env(),
            vec![("LOG_LEVEL".to_string(), "debug".to_string())]
        );

        let refs = file.env_references().unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(
            refs[0],
            EnvReference {
                local_key: "DB_URL".to_string(),
                kind: SourceKind::Secret,
                resource: "db-creds".to_string(),
                remote_key: "url".to_string(),
            }
        );
        assert_eq!(refs[2].kind, SourceKind::Mres);

        let mounts = file.mount_references().unwrap();
        assert_eq!(mounts[0].target_path, "/etc/app/config.json");
        assert_eq!(mounts[0].resource, "app-config");
        assert_eq!(mounts[0].remote_key, "config.json");
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(KlFile::from_yaml("  \n").unwrap(), KlFile::default());
    }

    #[test]
    fn test_rejects_ambiguous_env_var() {
        let yaml = r#"
envVars:
  - key: A
    value: x
    configRef: c/k
"#;
        assert!(matches!(
            KlFile::from_yaml(yaml),
            Err(DevboxError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_reference() {
        let yaml = r#"
envVars:
  - key: A
    secretRef: no-slash
"#;
        let file = KlFile::from_yaml(yaml).unwrap();
        assert!(file.env_references().is_err());
    }
}
