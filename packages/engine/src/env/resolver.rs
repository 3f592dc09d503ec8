// ABOUTME: Resolves a workspace declaration into a PersistedEnv
// ABOUTME: One batched service call for env and mount references, package pinning via kl.lock

use super::{kl_config_hash, PackageLock, PersistedEnv};
use crate::error::{DevboxError, Result};
use crate::service::{
    EnvironmentService, PackageIndex, ResourceQuery, ServiceContext, ServiceError,
};
use crate::workspace::{SourceKind, Workspace};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub const PROMPT_SYMBOL_KEY: &str = "PURE_PROMPT_SYMBOL";

type ValueKey = (SourceKind, String, String);

pub struct EnvResolver {
    service: Arc<dyn EnvironmentService>,
    index: Arc<dyn PackageIndex>,
}

impl EnvResolver {
    pub fn new(service: Arc<dyn EnvironmentService>, index: Arc<dyn PackageIndex>) -> Self {
        Self { service, index }
    }

    /// Resolve every reference declared by the workspace; any failure aborts
    pub async fn resolve(&self, workspace: &Workspace) -> Result<PersistedEnv> {
        let spec = &workspace.spec;
        if workspace.environment().is_empty() {
            return Err(DevboxError::InvalidWorkspace(format!(
                "no environment selected for {}",
                workspace.path.display()
            )));
        }

        let env_refs = spec.env_references()?;
        let mount_refs = spec.mount_references()?;

        let queries: BTreeSet<ResourceQuery> = env_refs
            .iter()
            .map(|r| (r.kind, &r.resource, &r.remote_key))
            .chain(mount_refs.iter().map(|m| (m.kind, &m.resource, &m.remote_key)))
            .map(|(kind, resource, key)| ResourceQuery {
                kind,
                resource: resource.clone(),
                key: key.clone(),
            })
            .collect();

        let ctx = ServiceContext {
            account: workspace.account().to_string(),
            environment: workspace.environment().to_string(),
        };

        let values: HashMap<ValueKey, String> = if queries.is_empty() {
            HashMap::new()
        } else {
            let queries: Vec<ResourceQuery> = queries.into_iter().collect();
            debug!("Resolving {} references in {}", queries.len(), ctx.environment);
            self.service
                .resolve(&ctx, &queries)
                .await
                .map_err(DevboxError::resolution(format!(
                    "resolve references in environment '{}'",
                    ctx.environment
                )))?
                .into_iter()
                .map(|v| ((v.kind, v.resource, v.key), v.value))
                .collect()
        };

        let mut env = HashMap::new();
        for r in &env_refs {
            let key = (r.kind, r.resource.clone(), r.remote_key.clone());
            let value = values.get(&key).ok_or_else(|| {
                DevboxError::resolution(format!("resolve env var {}", r.local_key))(
                    ServiceError::NotFound(format!(
                        "{} {}/{}",
                        r.kind, r.resource, r.remote_key
                    )),
                )
            })?;
            env.insert(r.local_key.clone(), value.clone());
        }

        for (key, value) in spec.literal_env() {
            env.insert(key, value);
        }
        // Written last so the prompt always names the bound environment
        env.insert(
            PROMPT_SYMBOL_KEY.to_string(),
            format!("({}) ❯", ctx.environment),
        );

        let mut mounts = HashMap::new();
        for m in &mount_refs {
            let key = (m.kind, m.resource.clone(), m.remote_key.clone());
            let content = match values.get(&key) {
                Some(v) => v.clone(),
                None => {
                    warn!(
                        "No value for {} {}/{}, mounting {} as an empty file",
                        m.kind, m.resource, m.remote_key, m.target_path
                    );
                    String::new()
                }
            };
            mounts.insert(m.target_path.clone(), content);
        }

        let mut lock = PackageLock::load(&workspace.path)?;
        if lock.sync(&spec.packages, self.index.as_ref()).await? {
            lock.save()?;
        }

        Ok(PersistedEnv {
            packages: spec.packages.clone(),
            package_hashes: lock.references(),
            env,
            mounts,
            kl_config_hash: kl_config_hash(spec),
        })
    }
}
