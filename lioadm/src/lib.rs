//! LIO iSCSI target administration.
//!
//! Targets, LUNs and initiator ACLs are managed through the `cinder-rtstool`
//! command line; this crate builds its argument vectors, runs it behind a
//! root helper and maps the outcome onto [LioError].
//!
//! ```no_run
//! use lioadm::{target_admin, Config, HostExecutor, TargetAdmin, YamlVolumeStore};
//! use std::sync::Arc;
//!
//! let cfg = Config::read("/etc/lioadm/lioadm.yml")?;
//! let store = Arc::new(YamlVolumeStore::new("/var/lib/lioadm/volumes.yml"));
//! let admin = target_admin(cfg, HostExecutor::new().as_executor(), store)?;
//!
//! let name = "iqn.2010-10.org.openstack:vol-1";
//! admin.create_target(name, 1, 0, "/dev/vg/vol-1", None, true)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod admin;
mod config;
mod connection;
mod error;
pub mod executor;
pub mod fakes;
mod lio;
mod rtstool;
pub mod store;
mod volume;

pub use admin::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use executor::{BoxedExecutor, Executor, HostExecutor, Output};
pub use lio::*;
pub use rtstool::*;
pub use store::{BoxedVolumeStore, VolumeStore, YamlVolumeStore};
pub use volume::*;
