use std::fmt;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::executor::{command_to_string, output_to_exec_error, BoxedExecutor};
use crate::{Config, ExecutionError};

static RTSTOOL_VERIFY: &str = "verify";
static RTSTOOL_GET_TARGETS: &str = "get-targets";
static RTSTOOL_CREATE: &str = "create";
static RTSTOOL_DELETE: &str = "delete";
static RTSTOOL_ADD_INITIATOR: &str = "add-initiator";
static RTSTOOL_DELETE_INITIATOR: &str = "delete-initiator";

/// Identifier of a target as reported by `get-targets`: the listing line
/// that carries its IQN.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetId(String);

impl TargetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Picks the first listing line containing `iqn`.
pub fn find_target_line<'a, I>(lines: I, iqn: &str) -> Option<TargetId>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .find(|line| line.contains(iqn))
        .map(|line| TargetId(line.trim().to_string()))
}

/// Driver for the `cinder-rtstool` command line.
///
/// Every read and write of LIO target state goes through here. Mutating
/// subcommands run behind the configured root helper.
pub struct RtsTool {
    path: String,
    root_helper: Vec<String>,
    executor: BoxedExecutor,
}

impl RtsTool {
    pub fn new(config: &Config, executor: BoxedExecutor) -> Self {
        RtsTool {
            path: config.rtstool_path().to_string(),
            root_helper: config.root_helper().to_vec(),
            executor,
        }
    }

    fn command(&self, elevated: bool) -> Command {
        match self.root_helper.split_first() {
            Some((helper, rest)) if elevated => {
                let mut cmd = Command::new(helper);
                cmd.args(rest).arg(&self.path);
                cmd
            }
            _ => Command::new(&self.path),
        }
    }

    /// Runs one subcommand and returns `(stdout, stderr)`.
    ///
    /// With `check_exit_code` unset a non-zero exit is logged and the output
    /// returned anyway; only a failure to start the tool is an error then.
    pub fn run(
        &self,
        subcommand: &str,
        args: &[&str],
        elevated: bool,
        check_exit_code: bool,
    ) -> Result<(String, String), ExecutionError> {
        let mut cmd = self.command(elevated);
        cmd.arg(subcommand).args(args);

        let output = self.executor.execute(&mut cmd)?;
        if !output.is_success() {
            if check_exit_code {
                return Err(output_to_exec_error(command_to_string(&cmd), &output));
            }
            log::warn!(
                "{} {} exited with {:?}, ignoring: {}",
                self.path,
                subcommand,
                output.exit_code,
                output.stderr.trim()
            );
        }

        Ok((output.stdout, output.stderr))
    }

    pub fn verify(&self) -> Result<(), ExecutionError> {
        self.run(RTSTOOL_VERIFY, &[], false, true)?;
        Ok(())
    }

    pub fn list_targets(&self) -> Result<Vec<String>, ExecutionError> {
        let (out, _) = self.run(RTSTOOL_GET_TARGETS, &[], false, true)?;
        let lines = out
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.to_string())
            .collect();

        Ok(lines)
    }

    pub fn find_target_by_iqn(&self, iqn: &str) -> Result<Option<TargetId>, ExecutionError> {
        let lines = self.list_targets()?;
        Ok(find_target_line(lines.iter().map(|l| l.as_str()), iqn))
    }

    pub fn create(
        &self,
        path: &str,
        name: &str,
        chap_user: &str,
        chap_pass: &str,
        check_exit_code: bool,
    ) -> Result<(), ExecutionError> {
        self.run(
            RTSTOOL_CREATE,
            &[path, name, chap_user, chap_pass],
            true,
            check_exit_code,
        )?;
        Ok(())
    }

    pub fn delete(&self, iqn: &str) -> Result<(), ExecutionError> {
        self.run(RTSTOOL_DELETE, &[iqn], true, true)?;
        Ok(())
    }

    pub fn add_initiator(
        &self,
        iqn: &str,
        chap_user: &str,
        chap_pass: &str,
        initiator: &str,
    ) -> Result<(), ExecutionError> {
        self.run(
            RTSTOOL_ADD_INITIATOR,
            &[iqn, chap_user, chap_pass, initiator],
            true,
            true,
        )?;
        Ok(())
    }

    pub fn delete_initiator(&self, iqn: &str, initiator: &str) -> Result<(), ExecutionError> {
        self.run(RTSTOOL_DELETE_INITIATOR, &[iqn, initiator], true, true)?;
        Ok(())
    }
}
