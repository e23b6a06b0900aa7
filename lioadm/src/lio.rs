use anyhow::{Context, Result};

use crate::admin::TargetAdmin;
use crate::executor::BoxedExecutor;
use crate::store::BoxedVolumeStore;
use crate::{
    ChapAuth, Config, ConnectionInfo, Connector, IscsiProperties, LioError, RequestContext,
    RtsTool, TargetId, Volume,
};

/// LIO exposes every volume at LUN 0.
static LIO_TARGET_LUN: u32 = 0;
/// Placeholder tid handed to `create_target` by `ensure_export`.
static ENSURE_TID: u32 = 1;

/// iSCSI target administration for LIO through `cinder-rtstool`.
pub struct LioAdm {
    config: Config,
    rtstool: RtsTool,
    store: BoxedVolumeStore,
}

impl LioAdm {
    /// Fails with [LioError::ToolUnavailable] unless `rtstool verify`
    /// succeeds.
    pub fn new(config: Config, executor: BoxedExecutor, store: BoxedVolumeStore) -> Result<Self> {
        config.validate()?;

        if config.lio_initiator_iqns().is_some() {
            log::warn!(
                "The lio_initiator_iqns option has been deprecated and no longer has any effect."
            );
        }

        let rtstool = RtsTool::new(&config, executor);
        if let Err(e) = rtstool.verify() {
            log::error!("{} is not installed correctly: {}", config.rtstool_path(), e);
            return Err(e).context(LioError::ToolUnavailable(config.rtstool_path().to_string()));
        }

        Ok(LioAdm {
            config,
            rtstool,
            store,
        })
    }

    pub fn rtstool(&self) -> &RtsTool {
        &self.rtstool
    }

    fn iqn(&self, name: &str) -> String {
        format!("{}{}", self.config.iscsi_target_prefix(), name)
    }
}

/// The volume id carried by a target name, the field after the first `:`.
pub fn target_volume_id(name: &str) -> Result<&str> {
    let vol_id = name
        .split(':')
        .nth(1)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            LioError::InvalidParameter(format!("target name '{}' carries no volume id", name))
        })?;
    Ok(vol_id)
}

fn chap_credentials(chap_auth: Option<&ChapAuth>) -> (&str, &str) {
    chap_auth
        .map(|c| (c.username.as_str(), c.password.as_str()))
        .unwrap_or(("", ""))
}

impl TargetAdmin for LioAdm {
    fn ensure_export(&self, ctx: &RequestContext, volume: &Volume, volume_path: &str) -> Result<()> {
        let chap_auth = match self
            .store
            .get(ctx, &volume.id)
            .and_then(|info| info.chap_auth())
        {
            Ok(chap_auth) => chap_auth,
            Err(e) if LioError::is_not_found(&e) => {
                log::info!(
                    "Skipping ensure_export. No iscsi_target provision for volume: {}",
                    volume.id
                );
                return Ok(());
            }
            Err(e) => {
                log::warn!(
                    "Skipping ensure_export for volume {}, cannot read its credentials: {:#}",
                    volume.id,
                    e
                );
                return Ok(());
            }
        };

        let iscsi_name = self.iqn(&volume.name);
        self.create_target(
            &iscsi_name,
            ENSURE_TID,
            LIO_TARGET_LUN,
            volume_path,
            chap_auth.as_ref(),
            false,
        )?;

        Ok(())
    }

    fn remove_export(&self, ctx: &RequestContext, volume: &Volume) -> Result<()> {
        let iscsi_target = match self.store.get_iscsi_target_num(ctx, &volume.id) {
            Ok(tid) => tid,
            Err(e) if LioError::is_not_found(&e) => {
                log::info!(
                    "Skipping remove_export. No iscsi_target provisioned for volume: {}",
                    volume.id
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.remove_iscsi_target(iscsi_target, LIO_TARGET_LUN, &volume.id, &volume.name)
    }

    fn create_target(
        &self,
        name: &str,
        _tid: u32,
        _lun: u32,
        path: &str,
        chap_auth: Option<&ChapAuth>,
        check_exit_code: bool,
    ) -> Result<TargetId> {
        let vol_id = target_volume_id(name)?;

        log::info!("Creating iscsi_target for volume: {}", vol_id);

        let (chap_user, chap_pass) = chap_credentials(chap_auth);
        self.rtstool
            .create(path, name, chap_user, chap_pass, check_exit_code)
            .map_err(|e| {
                log::error!("Failed to create iscsi target for volume id:{}: {}", vol_id, e);
                e
            })
            .context(LioError::TargetCreateFailed(vol_id.to_string()))?;

        let iqn = self.iqn(vol_id);
        let tid = self
            .rtstool
            .find_target_by_iqn(&iqn)
            .context(LioError::TargetCreateFailed(vol_id.to_string()))?;

        match tid {
            Some(tid) => Ok(tid),
            None => {
                log::error!(
                    "Failed to create iscsi target for volume id:{}, {} is not listed",
                    vol_id,
                    iqn
                );
                anyhow::bail!(LioError::TargetNotFound(iqn))
            }
        }
    }

    fn remove_iscsi_target(&self, _tid: u32, _lun: u32, vol_id: &str, vol_name: &str) -> Result<()> {
        log::info!("Removing iscsi_target: {}", vol_id);
        let iqn = self.iqn(vol_name);

        self.rtstool
            .delete(&iqn)
            .map_err(|e| {
                log::error!("Failed to remove iscsi target for volume id:{}: {}", vol_id, e);
                e
            })
            .context(LioError::TargetRemoveFailed(vol_id.to_string()))?;

        Ok(())
    }

    fn show_target(&self, _tid: u32, iqn: Option<&str>) -> Result<()> {
        let iqn = match iqn {
            Some(iqn) if !iqn.is_empty() => iqn,
            _ => anyhow::bail!(LioError::InvalidParameter(
                "valid iqn needed for show_target".to_string()
            )),
        };

        match self.rtstool.find_target_by_iqn(iqn)? {
            Some(_) => Ok(()),
            None => anyhow::bail!(LioError::TargetNotFound(iqn.to_string())),
        }
    }

    fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> Result<ConnectionInfo> {
        let volume_iqn = volume.location()?.iqn;
        let chap_auth = volume.chap_auth()?;
        let (chap_user, chap_pass) = chap_credentials(chap_auth.as_ref());

        // Add initiator iqns to target ACL
        self.rtstool
            .add_initiator(&volume_iqn, chap_user, chap_pass, &connector.initiator)
            .map_err(|e| {
                log::error!(
                    "Failed to add initiator iqn {} to target: {}",
                    connector.initiator,
                    e
                );
                e
            })
            .context(LioError::InitiatorAttachFailed(volume.id.clone()))?;

        let properties = IscsiProperties::from_volume(volume)?.with_lun(LIO_TARGET_LUN);
        Ok(ConnectionInfo::iscsi(properties))
    }

    fn terminate_connection(&self, volume: &Volume, connector: &Connector) -> Result<()> {
        let volume_iqn = volume.location()?.iqn;

        // Delete initiator iqns from target ACL
        self.rtstool
            .delete_initiator(&volume_iqn, &connector.initiator)
            .map_err(|e| {
                log::error!(
                    "Failed to delete initiator iqn {} to target: {}",
                    connector.initiator,
                    e
                );
                e
            })
            .context(LioError::InitiatorDetachFailed(volume.id.clone()))?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use anyhow::Result;

    use super::*;
    use crate::executor::Output;
    use crate::ExecutionError;
    use crate::fakes::{tool_args, FakeExecutor, FakeTargets, MemoryVolumeStore};

    static PREFIX: &str = "iqn.2021-01.com.example:";

    struct Harness {
        admin: LioAdm,
        fake: Arc<FakeExecutor>,
        targets: Arc<Mutex<FakeTargets>>,
    }

    fn harness(store: MemoryVolumeStore) -> Result<Harness> {
        let fake = FakeExecutor::new();
        let targets = FakeTargets::new();
        fake.set_handler(FakeTargets::handler(targets.clone()));
        let admin = LioAdm::new(Config::new(PREFIX), fake.clone().as_executor(), store.boxed())?;
        Ok(Harness {
            admin,
            fake,
            targets,
        })
    }

    fn lio_error(err: &anyhow::Error) -> &LioError {
        err.downcast_ref::<LioError>().expect("LioError")
    }

    fn volume() -> Volume {
        Volume::new("v1", "vol-v1")
            .with_location(format!("10.0.0.1:3260,1 {}vol-v1 1", PREFIX))
            .with_auth("CHAP user secret")
    }

    #[test]
    fn startup_verifies_tool() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        assert_eq!(h.fake.calls(), vec![vec!["cinder-rtstool", "verify"]]);
        Ok(())
    }

    #[test]
    fn startup_fails_without_tool() {
        let fake = FakeExecutor::new();
        fake.set_handler(Box::new(|_args: &[String]| Output::failure(127, "command not found")));
        let err = LioAdm::new(
            Config::new(PREFIX),
            fake.clone().as_executor(),
            MemoryVolumeStore::new().boxed(),
        )
        .err()
        .unwrap();
        assert!(matches!(lio_error(&err), LioError::ToolUnavailable(_)));
    }

    #[test]
    fn startup_accepts_deprecated_initiator_iqns() -> Result<()> {
        let cfg = Config::new(PREFIX).with_initiator_iqns("iqn.ini-a,iqn.ini-b");
        LioAdm::new(cfg, FakeExecutor::new().as_executor(), MemoryVolumeStore::new().boxed())?;
        Ok(())
    }

    #[test]
    fn create_then_remove_target() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        let name = format!("{}vol-v1", PREFIX);

        let tid = h.admin.create_target(&name, 0, 0, "/dev/vg/vol-v1", None, true)?;
        assert_eq!(tid.as_str(), "iqn.2021-01.com.example:vol-v1");
        assert_eq!(
            h.fake.calls_to("create")[0],
            vec!["sudo", "cinder-rtstool", "create", "/dev/vg/vol-v1", name.as_str(), "", ""]
        );

        h.admin.show_target(1, Some(name.as_str()))?;

        h.admin.remove_iscsi_target(1, 0, "v1", "vol-v1")?;
        let deletes = h.fake.calls_to("delete");
        assert_eq!(tool_args(&deletes[0]), &["delete", name.as_str()]);
        assert!(!h.targets.lock().unwrap().contains(&name));
        Ok(())
    }

    #[test]
    fn create_passes_chap_user_and_password() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        let chap = ChapAuth::new("IncomingUser", "alice", "s3cret");

        h.admin
            .create_target(&format!("{}vol-v1", PREFIX), 1, 0, "/dev/x", Some(&chap), true)?;
        let args = h.fake.calls_to("create")[0].clone();
        assert_eq!(&tool_args(&args)[3..], &["alice", "s3cret"]);
        Ok(())
    }

    #[test]
    fn create_reports_missing_target() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        // create exits 0 but the listing never shows the target
        h.fake.set_handler(Box::new(|_args: &[String]| Output::success()));

        let err = h
            .admin
            .create_target(&format!("{}vol-v1", PREFIX), 1, 0, "/dev/x", None, true)
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::TargetNotFound(iqn) if iqn.ends_with("vol-v1")));
        Ok(())
    }

    #[test]
    fn create_failure_maps_to_domain_error() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        h.fake.set_handler(Box::new(|args: &[String]| match tool_args(args)[0].as_str() {
            "create" => Output::failure(1, "storage object in use"),
            _ => Output::success(),
        }));

        let err = h
            .admin
            .create_target(&format!("{}vol-v1", PREFIX), 1, 0, "/dev/x", None, true)
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::TargetCreateFailed(id) if id == "vol-v1"));
        let cause = err.root_cause().downcast_ref::<ExecutionError>().unwrap();
        assert_eq!(cause.stderr(), "storage object in use");
        Ok(())
    }

    #[test]
    fn create_rejects_name_without_volume_id() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        let err = h
            .admin
            .create_target("iqn-without-colon", 1, 0, "/dev/x", None, true)
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::InvalidParameter(_)));
        assert!(h.fake.calls_to("create").is_empty());
        Ok(())
    }

    #[test]
    fn volume_id_from_target_name() -> Result<()> {
        assert_eq!(target_volume_id("iqn.2021-01.com.example:vol-v1")?, "vol-v1");
        for name in ["iqn-without-colon", "iqn.2021-01.com.example:"] {
            let err = target_volume_id(name).unwrap_err();
            assert!(matches!(lio_error(&err), LioError::InvalidParameter(_)));
        }

        let err = ChapAuth::parse(target_volume_id("iqn.x:vol-v1")?, "CHAP").unwrap_err();
        assert!(matches!(
            lio_error(&err),
            LioError::InvalidProviderAuth(id) if id == "vol-v1"
        ));
        Ok(())
    }

    #[test]
    fn ensure_export_tolerates_existing_target() -> Result<()> {
        let vol = volume();
        let h = harness(MemoryVolumeStore::new().with_volume(vol.clone()))?;
        let ctx = RequestContext::new("req-1");

        h.admin.ensure_export(&ctx, &vol, "/dev/vg/vol-v1")?;
        // the second create exits non-zero since the target exists
        h.admin.ensure_export(&ctx, &vol, "/dev/vg/vol-v1")?;

        let creates = h.fake.calls_to("create");
        assert_eq!(creates.len(), 2);
        assert_eq!(&tool_args(&creates[0])[3..], &["user", "secret"]);
        Ok(())
    }

    #[test]
    fn ensure_export_without_auth_sends_empty_credentials() -> Result<()> {
        let vol = Volume::new("v1", "vol-v1");
        let h = harness(MemoryVolumeStore::new().with_volume(vol.clone()))?;

        h.admin
            .ensure_export(&RequestContext::default(), &vol, "/dev/x")?;
        assert_eq!(
            h.fake.calls_to("create"),
            vec![vec![
                "sudo",
                "cinder-rtstool",
                "create",
                "/dev/x",
                "iqn.2021-01.com.example:vol-v1",
                "",
                ""
            ]]
        );
        assert!(h.targets.lock().unwrap().contains("iqn.2021-01.com.example:vol-v1"));
        Ok(())
    }

    #[test]
    fn ensure_export_reports_missing_target_after_tolerated_failure() -> Result<()> {
        let vol = volume();
        let h = harness(MemoryVolumeStore::new().with_volume(vol.clone()))?;
        // create exits non-zero and leaves nothing behind
        h.fake.set_handler(Box::new(|args: &[String]| match tool_args(args)[0].as_str() {
            "create" => Output::failure(1, "device busy"),
            _ => Output::success(),
        }));

        let err = h
            .admin
            .ensure_export(&RequestContext::default(), &vol, "/dev/x")
            .unwrap_err();
        assert!(matches!(
            lio_error(&err),
            LioError::TargetNotFound(iqn) if iqn == "iqn.2021-01.com.example:vol-v1"
        ));
        assert_eq!(h.fake.calls_to("get-targets").len(), 1);
        Ok(())
    }

    #[test]
    fn create_listing_failure_maps_to_create_failed() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        h.fake.set_handler(Box::new(|args: &[String]| match tool_args(args)[0].as_str() {
            "get-targets" => Output::failure(1, "configfs not mounted"),
            _ => Output::success(),
        }));

        let err = h
            .admin
            .create_target(&format!("{}vol-v1", PREFIX), 1, 0, "/dev/x", None, true)
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::TargetCreateFailed(id) if id == "vol-v1"));
        let cause = err.root_cause().downcast_ref::<ExecutionError>().unwrap();
        assert_eq!(cause.stderr(), "configfs not mounted");
        Ok(())
    }

    #[test]
    fn ensure_export_skips_unknown_volume() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        h.admin
            .ensure_export(&RequestContext::default(), &volume(), "/dev/vg/vol-v1")?;
        assert!(h.fake.calls_to("create").is_empty());
        Ok(())
    }

    #[test]
    fn ensure_export_skips_malformed_auth() -> Result<()> {
        let vol = Volume::new("v1", "vol-v1").with_auth("CHAP");
        let h = harness(MemoryVolumeStore::new().with_volume(vol.clone()))?;
        h.admin
            .ensure_export(&RequestContext::default(), &vol, "/dev/vg/vol-v1")?;
        assert!(h.fake.calls_to("create").is_empty());
        Ok(())
    }

    #[test]
    fn remove_export_without_target_is_noop() -> Result<()> {
        let vol = volume();
        let h = harness(MemoryVolumeStore::new().with_volume(vol.clone()))?;
        let ctx = RequestContext::default();

        h.admin.remove_export(&ctx, &vol)?;
        h.admin.remove_export(&ctx, &Volume::new("v9", "vol-v9"))?;
        assert!(h.fake.calls_to("delete").is_empty());
        Ok(())
    }

    #[test]
    fn remove_export_deletes_provisioned_target() -> Result<()> {
        let vol = volume().with_target(1);
        let h = harness(MemoryVolumeStore::new().with_volume(vol.clone()))?;
        h.targets.lock().unwrap().insert("iqn.2021-01.com.example:vol-v1");

        h.admin.remove_export(&RequestContext::default(), &vol)?;
        assert_eq!(h.fake.calls_to("delete").len(), 1);
        assert!(!h.targets.lock().unwrap().contains("iqn.2021-01.com.example:vol-v1"));

        // a second removal reaches the tool, which no longer knows the target
        let err = h
            .admin
            .remove_export(&RequestContext::default(), &vol)
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::TargetRemoveFailed(id) if id == "v1"));
        Ok(())
    }

    #[test]
    fn show_target_requires_iqn() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        let before = h.fake.calls().len();

        for iqn in [None, Some("")] {
            let err = h.admin.show_target(1, iqn).unwrap_err();
            assert!(matches!(lio_error(&err), LioError::InvalidParameter(_)));
        }
        assert_eq!(h.fake.calls().len(), before);

        let err = h.admin.show_target(1, Some("iqn.x:missing")).unwrap_err();
        assert!(matches!(lio_error(&err), LioError::TargetNotFound(_)));
        Ok(())
    }

    #[test]
    fn attach_and_detach_initiator() -> Result<()> {
        let vol = volume();
        let h = harness(MemoryVolumeStore::new())?;
        let iqn = "iqn.2021-01.com.example:vol-v1";
        h.targets.lock().unwrap().insert(iqn);
        let connector = Connector::new("iqn.1993-08.org.debian:01:host");

        let info = h.admin.initialize_connection(&vol, &connector)?;
        assert_eq!(info.driver_volume_type, "iscsi");
        assert_eq!(info.data.target_iqn, iqn);
        assert_eq!(info.data.target_portal, "10.0.0.1:3260");
        assert_eq!(info.data.target_lun, 0);
        assert_eq!(info.data.auth_username.as_deref(), Some("user"));

        let adds = h.fake.calls_to("add-initiator");
        assert_eq!(
            tool_args(&adds[0]),
            &["add-initiator", iqn, "user", "secret", "iqn.1993-08.org.debian:01:host"]
        );
        assert_eq!(
            h.targets.lock().unwrap().initiators(iqn),
            vec!["iqn.1993-08.org.debian:01:host"]
        );

        h.admin.terminate_connection(&vol, &connector)?;
        assert!(h.targets.lock().unwrap().initiators(iqn).is_empty());
        Ok(())
    }

    #[test]
    fn attach_without_chap_sends_empty_credentials() -> Result<()> {
        let vol = Volume::new("v2", "vol-v2").with_location(format!("10.0.0.1:3260,2 {}vol-v2", PREFIX));
        let h = harness(MemoryVolumeStore::new())?;
        h.targets.lock().unwrap().insert("iqn.2021-01.com.example:vol-v2");

        let info = h.admin.initialize_connection(&vol, &Connector::new("iqn.ini"))?;
        assert_eq!(info.data.auth_method, None);
        let adds = h.fake.calls_to("add-initiator");
        assert_eq!(&tool_args(&adds[0])[2..4], &["", ""]);
        Ok(())
    }

    #[test]
    fn attach_failure_maps_to_domain_error() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        // no target exists, so the fake tool rejects the ACL change
        let err = h
            .admin
            .initialize_connection(&volume(), &Connector::new("iqn.ini"))
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::InitiatorAttachFailed(id) if id == "v1"));

        let err = h
            .admin
            .terminate_connection(&volume(), &Connector::new("iqn.ini"))
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::InitiatorDetachFailed(id) if id == "v1"));
        Ok(())
    }

    #[test]
    fn attach_rejects_missing_location() -> Result<()> {
        let h = harness(MemoryVolumeStore::new())?;
        let err = h
            .admin
            .initialize_connection(&Volume::new("v1", "vol-v1"), &Connector::new("iqn.ini"))
            .unwrap_err();
        assert!(matches!(lio_error(&err), LioError::InvalidProviderLocation(_)));
        assert!(h.fake.calls_to("add-initiator").is_empty());
        Ok(())
    }
}
