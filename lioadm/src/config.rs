use std::fs;
use std::path::Path;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::LioError;

static DEFAULT_TARGET_PREFIX: &str = "iqn.2010-10.org.openstack:";
static DEFAULT_RTSTOOL: &str = "cinder-rtstool";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetHelper {
    #[default]
    Lioadm,
    Tgtadm,
}

impl TargetHelper {
    pub fn name(&self) -> &str {
        match self {
            TargetHelper::Lioadm => "lioadm",
            TargetHelper::Tgtadm => "tgtadm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// prepended to a volume name to form its target IQN
    #[serde(default = "default_target_prefix")]
    iscsi_target_prefix: String,
    #[serde(default = "default_rtstool")]
    rtstool_path: String,
    /// command prefix used for privileged invocations, e.g. `[sudo]`
    #[serde(default = "default_root_helper")]
    root_helper: Vec<String>,
    #[serde(default)]
    target_helper: TargetHelper,
    /// deprecated, only triggers a warning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lio_initiator_iqns: Option<String>,
}

fn default_target_prefix() -> String {
    DEFAULT_TARGET_PREFIX.to_string()
}

fn default_rtstool() -> String {
    DEFAULT_RTSTOOL.to_string()
}

fn default_root_helper() -> Vec<String> {
    vec!["sudo".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            iscsi_target_prefix: default_target_prefix(),
            rtstool_path: default_rtstool(),
            root_helper: default_root_helper(),
            target_helper: TargetHelper::default(),
            lio_initiator_iqns: None,
        }
    }
}

impl Config {
    pub fn new<S: AsRef<str>>(prefix: S) -> Self {
        Config {
            iscsi_target_prefix: prefix.as_ref().to_string(),
            ..Default::default()
        }
    }

    /// create `Config` from yaml string
    pub fn from(s: &str) -> Result<Config> {
        let config = serde_yml::from_str::<Config>(s)?;
        config.validate()?;
        Ok(config)
    }

    /// create `Config` from yaml file
    pub fn read<S: AsRef<Path>>(filename: S) -> Result<Config> {
        let s = fs::read_to_string(filename)?;
        Config::from(&s)
    }

    /// encodes `Config` to yaml string
    pub fn to_yml(&self) -> Result<String> {
        let s = serde_yml::to_string(self)?;
        Ok(s)
    }

    /// The volume id is recovered from a target name as its second
    /// colon-delimited field, so the prefix must carry exactly one trailing
    /// colon.
    pub fn validate(&self) -> Result<()> {
        let re = Regex::new(r"^[^:\s]+:$")?;
        if !re.is_match(&self.iscsi_target_prefix) {
            anyhow::bail!(LioError::InvalidParameter(format!(
                "iscsi_target_prefix '{}' must end with a single ':'",
                self.iscsi_target_prefix
            )))
        }
        if self.rtstool_path.is_empty() {
            anyhow::bail!(LioError::InvalidParameter(
                "rtstool_path must not be empty".to_string()
            ))
        }

        Ok(())
    }

    pub fn iscsi_target_prefix(&self) -> &str {
        &self.iscsi_target_prefix
    }

    pub fn rtstool_path(&self) -> &str {
        &self.rtstool_path
    }

    pub fn root_helper(&self) -> &[String] {
        &self.root_helper
    }

    pub fn target_helper(&self) -> TargetHelper {
        self.target_helper
    }

    pub fn lio_initiator_iqns(&self) -> Option<&str> {
        self.lio_initiator_iqns.as_deref()
    }

    pub fn with_rtstool<S: AsRef<str>>(mut self, path: S) -> Self {
        self.rtstool_path = path.as_ref().to_string();
        self
    }

    pub fn with_root_helper(mut self, helper: &[&str]) -> Self {
        self.root_helper = helper.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_initiator_iqns<S: AsRef<str>>(mut self, iqns: S) -> Self {
        self.lio_initiator_iqns = Some(iqns.as_ref().to_string());
        self
    }
}
