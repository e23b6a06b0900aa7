use anyhow::Result;

use crate::executor::BoxedExecutor;
use crate::store::BoxedVolumeStore;
use crate::{
    ChapAuth, Config, ConnectionInfo, Connector, LioAdm, LioError, RequestContext, TargetHelper,
    TargetId, Volume,
};

/// Export management for one iSCSI target implementation.
///
/// `tid` and `lun` arguments are part of the shared signature; helpers that
/// address targets by IQN accept and ignore them.
pub trait TargetAdmin: Send + Sync {
    /// Re-asserts the target of an existing export. Volumes whose record or
    /// credentials cannot be read are skipped, not failed.
    fn ensure_export(&self, ctx: &RequestContext, volume: &Volume, volume_path: &str) -> Result<()>;

    /// Tears down the target of `volume`; a volume without a provisioned
    /// target is a no-op.
    fn remove_export(&self, ctx: &RequestContext, volume: &Volume) -> Result<()>;

    fn create_target(
        &self,
        name: &str,
        tid: u32,
        lun: u32,
        path: &str,
        chap_auth: Option<&ChapAuth>,
        check_exit_code: bool,
    ) -> Result<TargetId>;

    fn remove_iscsi_target(&self, tid: u32, lun: u32, vol_id: &str, vol_name: &str) -> Result<()>;

    fn show_target(&self, tid: u32, iqn: Option<&str>) -> Result<()>;

    fn initialize_connection(&self, volume: &Volume, connector: &Connector)
        -> Result<ConnectionInfo>;

    fn terminate_connection(&self, volume: &Volume, connector: &Connector) -> Result<()>;
}

/// Builds the target admin selected by `config.target_helper`.
pub fn target_admin(
    config: Config,
    executor: BoxedExecutor,
    store: BoxedVolumeStore,
) -> Result<Box<dyn TargetAdmin>> {
    match config.target_helper() {
        TargetHelper::Lioadm => Ok(Box::new(LioAdm::new(config, executor, store)?)),
        other => anyhow::bail!(LioError::UnsupportedTargetHelper(other.name().to_string())),
    }
}
