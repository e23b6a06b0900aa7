use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::LioError;

/// A block-storage volume as recorded by the volume store.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub provider_location: Option<String>,
    #[serde(default)]
    pub provider_auth: Option<String>,
    #[serde(default)]
    pub iscsi_target: Option<u32>,
}

impl Volume {
    pub fn new<S: AsRef<str>>(id: S, name: S) -> Self {
        Volume {
            id: id.as_ref().to_string(),
            name: name.as_ref().to_string(),
            ..Default::default()
        }
    }

    pub fn with_location<S: AsRef<str>>(mut self, location: S) -> Self {
        self.provider_location = Some(location.as_ref().to_string());
        self
    }

    pub fn with_auth<S: AsRef<str>>(mut self, auth: S) -> Self {
        self.provider_auth = Some(auth.as_ref().to_string());
        self
    }

    pub fn with_target(mut self, tid: u32) -> Self {
        self.iscsi_target = Some(tid);
        self
    }

    /// CHAP credentials from `provider_auth`; `None` when no auth is recorded.
    pub fn chap_auth(&self) -> Result<Option<ChapAuth>> {
        match self.provider_auth.as_deref() {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => ChapAuth::parse(&self.id, s).map(Some),
        }
    }

    pub fn location(&self) -> Result<ProviderLocation> {
        let location = self
            .provider_location
            .as_deref()
            .ok_or_else(|| LioError::InvalidProviderLocation(self.id.clone()))?;
        ProviderLocation::parse(&self.id, location)
    }
}

/// CHAP credentials, rendered as `"<method> <username> <password>"`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChapAuth {
    pub method: String,
    pub username: String,
    pub password: String,
}

impl ChapAuth {
    pub fn new<S: AsRef<str>>(method: S, username: S, password: S) -> Self {
        ChapAuth {
            method: method.as_ref().to_string(),
            username: username.as_ref().to_string(),
            password: password.as_ref().to_string(),
        }
    }

    /// Splits on the first two spaces; the password keeps any further ones.
    pub fn parse(volume_id: &str, s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ' ');
        let (method, username, password) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(u), Some(p)) if !m.is_empty() && !u.is_empty() && !p.is_empty() => {
                (m, u, p)
            }
            _ => anyhow::bail!(LioError::InvalidProviderAuth(volume_id.to_string())),
        };

        Ok(ChapAuth::new(method, username, password))
    }
}

impl fmt::Display for ChapAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.username, self.password)
    }
}

/// Fields of `provider_location`: `"<portal>,<tid> <iqn> [<lun>]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLocation {
    pub portal: String,
    pub iqn: String,
    pub lun: u32,
}

impl ProviderLocation {
    pub fn parse(volume_id: &str, s: &str) -> Result<Self> {
        let fields = s.split(' ').collect::<Vec<&str>>();
        let iqn = match fields.get(1) {
            Some(iqn) if !iqn.is_empty() => iqn.to_string(),
            _ => anyhow::bail!(LioError::InvalidProviderLocation(volume_id.to_string())),
        };
        let portal = fields
            .first()
            .and_then(|f| f.split(',').next())
            .unwrap_or("")
            .to_string();
        let lun = fields
            .get(2)
            .and_then(|l| l.parse::<u32>().ok())
            .unwrap_or(0);

        Ok(ProviderLocation { portal, iqn, lun })
    }
}

/// The initiator side of an attach/detach request.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Connector {
    pub initiator: String,
    #[serde(default)]
    pub host: Option<String>,
}

impl Connector {
    pub fn new<S: AsRef<str>>(initiator: S) -> Self {
        Connector {
            initiator: initiator.as_ref().to_string(),
            host: None,
        }
    }
}

/// Caller context forwarded to the volume store.
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    pub fn new<S: AsRef<str>>(request_id: S) -> Self {
        RequestContext {
            request_id: request_id.as_ref().to_string(),
        }
    }
}
