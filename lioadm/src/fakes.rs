//! Test doubles for the process and volume store seams.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::executor::{BoxedExecutor, Executor, Output};
use crate::store::{BoxedVolumeStore, VolumeStore};
use crate::{ExecutionError, LioError, RequestContext, Volume};

/// Handler deciding the output of each fake invocation from its argv.
pub type BoxedHandler = Box<dyn FnMut(&[String]) -> Output + Send>;

/// An executor which records every command and answers with a handler.
pub struct FakeExecutor {
    calls: Mutex<Vec<Vec<String>>>,
    handler: Mutex<BoxedHandler>,
}

impl FakeExecutor {
    pub fn new() -> Arc<FakeExecutor> {
        Arc::new(FakeExecutor {
            calls: Mutex::new(Vec::new()),
            handler: Mutex::new(Box::new(|_args: &[String]| Output::success())),
        })
    }

    pub fn set_handler(&self, f: BoxedHandler) {
        *self.handler.lock().unwrap() = f;
    }

    /// Full argv of every command run so far, root helper included.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands whose tool subcommand is `subcommand`.
    pub fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| tool_args(argv).first().map(|s| s.as_str()) == Some(subcommand))
            .collect()
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

impl Executor for FakeExecutor {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let argv = std::iter::once(command.get_program())
            .chain(command.get_args())
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<String>>();
        self.calls.lock().unwrap().push(argv.clone());

        let output = self.handler.lock().unwrap()(&argv);
        Ok(output)
    }
}

/// Arguments following the tool binary in `argv`, subcommand first.
pub fn tool_args(argv: &[String]) -> &[String] {
    match argv.iter().position(|a| a.ends_with("rtstool")) {
        Some(pos) => &argv[pos + 1..],
        None => argv,
    }
}

/// An in-process model of the LIO target table answering rtstool
/// subcommands.
#[derive(Debug, Default)]
pub struct FakeTargets {
    targets: BTreeMap<String, BTreeSet<String>>,
}

impl FakeTargets {
    pub fn new() -> Arc<Mutex<FakeTargets>> {
        Arc::new(Mutex::new(FakeTargets::default()))
    }

    pub fn handler(state: Arc<Mutex<FakeTargets>>) -> BoxedHandler {
        Box::new(move |argv: &[String]| state.lock().unwrap().answer(tool_args(argv)))
    }

    pub fn insert(&mut self, iqn: &str) {
        self.targets.entry(iqn.to_string()).or_default();
    }

    pub fn contains(&self, iqn: &str) -> bool {
        self.targets.contains_key(iqn)
    }

    pub fn initiators(&self, iqn: &str) -> Vec<String> {
        self.targets
            .get(iqn)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn answer(&mut self, args: &[String]) -> Output {
        let arg = |i: usize| args.get(i).map(|s| s.as_str()).unwrap_or("");
        match arg(0) {
            "verify" => Output::success(),
            "get-targets" => {
                let listing = self
                    .targets
                    .keys()
                    .map(|iqn| iqn.to_string())
                    .collect::<Vec<String>>()
                    .join("\n");
                Output::success().with_stdout(&listing)
            }
            "create" => {
                if self.targets.contains_key(arg(2)) {
                    return Output::failure(1, "target already exists");
                }
                self.insert(arg(2));
                Output::success()
            }
            "delete" => match self.targets.remove(arg(1)) {
                Some(_) => Output::success(),
                None => Output::failure(1, "no such target"),
            },
            "add-initiator" => match self.targets.get_mut(arg(1)) {
                Some(acl) => {
                    acl.insert(arg(4).to_string());
                    Output::success()
                }
                None => Output::failure(1, "no such target"),
            },
            "delete-initiator" => {
                let removed = self
                    .targets
                    .get_mut(arg(1))
                    .map(|acl| acl.remove(arg(2)))
                    .unwrap_or(false);
                if removed {
                    Output::success()
                } else {
                    Output::failure(1, "no such initiator")
                }
            }
            other => Output::failure(2, &format!("unknown command {}", other)),
        }
    }
}

/// Volume records held in memory.
#[derive(Debug, Default)]
pub struct MemoryVolumeStore {
    volumes: BTreeMap<String, Volume>,
}

impl MemoryVolumeStore {
    pub fn new() -> Self {
        MemoryVolumeStore::default()
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.insert(volume.id.clone(), volume);
        self
    }

    pub fn boxed(self) -> BoxedVolumeStore {
        Arc::new(self)
    }
}

impl VolumeStore for MemoryVolumeStore {
    fn get(&self, _ctx: &RequestContext, volume_id: &str) -> Result<Volume> {
        self.volumes
            .get(volume_id)
            .cloned()
            .context(LioError::VolumeNotFound(volume_id.to_string()))
    }
}
