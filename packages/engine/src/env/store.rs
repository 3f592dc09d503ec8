// ABOUTME: Box hash record persistence under the local cache directory
// ABOUTME: Decides when a freshly resolved environment must be rewritten for the dev container

use super::{BoxHashRecord, PersistedEnv};
use crate::error::{DevboxError, Result};
use crate::workspace::WorkspaceId;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// What `BoxHashStore::sync` did with the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSync {
    Created,
    /// kl.yml declarations changed
    DeclarationChanged,
    /// Only resolved values changed
    ValuesChanged,
    Unchanged,
}

impl RecordSync {
    pub fn written(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct BoxHashStore {
    dir: PathBuf,
}

impl BoxHashStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: &WorkspaceId) -> PathBuf {
        self.dir.join(id.record_file_name())
    }

    /// Current record, `None` when absent; an unreadable record is a drift error
    pub fn read(&self, id: &WorkspaceId) -> Result<Option<BoxHashRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let record: BoxHashRecord =
            serde_json::from_str(&content).map_err(|e| DevboxError::drift(&path, e))?;
        Ok(Some(record))
    }

    pub fn write(&self, id: &WorkspaceId, record: &BoxHashRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(id);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;

        debug!("Wrote box hash record {:?}", path);
        Ok(path)
    }

    /// Persist `env` when no record exists or it differs from the stored one
    pub fn sync(&self, id: &WorkspaceId, env: PersistedEnv) -> Result<RecordSync> {
        let fresh = BoxHashRecord::new(env);

        let outcome = match self.read(id)? {
            None => RecordSync::Created,
            Some(current) if current.config.kl_config_hash != fresh.config.kl_config_hash => {
                RecordSync::DeclarationChanged
            }
            Some(current) if current.hash != fresh.hash => RecordSync::ValuesChanged,
            Some(_) => RecordSync::Unchanged,
        };

        if outcome.written() {
            self.write(id, &fresh)?;
            info!("Box hash record {:?} ({:?})", self.path_for(id), outcome);
        }

        Ok(outcome)
    }
}
