use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::Volume;

static DRIVER_VOLUME_TYPE: &str = "iscsi";

/// Data an initiator needs to log in to a target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IscsiProperties {
    pub target_discovered: bool,
    pub target_portal: String,
    pub target_iqn: String,
    pub target_lun: u32,
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
}

impl IscsiProperties {
    /// Builds properties from what the volume's provider fields record.
    pub fn from_volume(volume: &Volume) -> Result<Self> {
        let location = volume.location()?;
        let chap = volume.chap_auth()?;

        Ok(IscsiProperties {
            target_discovered: false,
            target_portal: location.portal,
            target_iqn: location.iqn,
            target_lun: location.lun,
            volume_id: volume.id.clone(),
            auth_method: chap.as_ref().map(|c| c.method.clone()),
            auth_username: chap.as_ref().map(|c| c.username.clone()),
            auth_password: chap.map(|c| c.password),
        })
    }

    pub fn with_lun(mut self, lun: u32) -> Self {
        self.target_lun = lun;
        self
    }
}

/// What `initialize_connection` hands back to the attaching client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub driver_volume_type: String,
    pub data: IscsiProperties,
}

impl ConnectionInfo {
    pub fn iscsi(data: IscsiProperties) -> Self {
        ConnectionInfo {
            driver_volume_type: DRIVER_VOLUME_TYPE.to_string(),
            data,
        }
    }
}
