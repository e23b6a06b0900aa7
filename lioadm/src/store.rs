use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{LioError, RequestContext, Volume};

pub type BoxedVolumeStore = Arc<dyn VolumeStore>;

/// Read access to persisted volume records.
///
/// Missing records are reported as [LioError::VolumeNotFound] and volumes
/// without a provisioned target as [LioError::TargetNumNotFound].
pub trait VolumeStore: Send + Sync {
    fn get(&self, ctx: &RequestContext, volume_id: &str) -> Result<Volume>;

    fn get_iscsi_target_num(&self, ctx: &RequestContext, volume_id: &str) -> Result<u32> {
        self.get(ctx, volume_id)?
            .iscsi_target
            .ok_or_else(|| LioError::TargetNumNotFound(volume_id.to_string()).into())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VolumeList {
    #[serde(default)]
    volumes: Vec<Volume>,
}

/// Volume records kept in a yaml file. The file is re-read on every lookup.
#[derive(Debug, Clone)]
pub struct YamlVolumeStore {
    path: PathBuf,
}

impl YamlVolumeStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        YamlVolumeStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<VolumeList> {
        let s = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read volume store {}", self.path.display()))?;
        let list = serde_yml::from_str::<VolumeList>(&s)?;
        Ok(list)
    }
}

impl VolumeStore for YamlVolumeStore {
    fn get(&self, _ctx: &RequestContext, volume_id: &str) -> Result<Volume> {
        self.load()?
            .volumes
            .into_iter()
            .find(|v| v.id == volume_id)
            .context(LioError::VolumeNotFound(volume_id.to_string()))
    }
}
