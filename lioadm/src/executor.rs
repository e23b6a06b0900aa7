use std::process::Command;
use std::sync::Arc;

use crate::ExecutionError;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success() -> Self {
        Output {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Output {
            exit_code: Some(code),
            stdout: "".to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub type BoxedExecutor = Arc<dyn Executor>;

/// Runs [Command]s to completion.
///
/// - In production this is a [HostExecutor].
/// - Under test a [crate::fakes::FakeExecutor] stands in and records every
///   invocation.
///
/// The exit status is returned as-is; deciding whether a non-zero exit is an
/// error is left to the caller.
pub trait Executor: Send + Sync {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError>;
}

pub fn command_to_string(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|s| s.to_string_lossy().to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn output_to_exec_error(command: String, output: &Output) -> ExecutionError {
    ExecutionError::CommandFailure {
        command,
        exit_code: output.exit_code,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    }
}

#[derive(Debug, Default)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Arc<HostExecutor> {
        Arc::new(HostExecutor)
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

impl Executor for HostExecutor {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let cmdline = command_to_string(command);
        log::debug!("running command: {}", cmdline);

        let output = command
            .output()
            .map_err(|err| ExecutionError::ExecutionStart {
                command: cmdline.clone(),
                err,
            })?;

        let output = Output {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        log::debug!(
            "finished command: {} status={:?} stdout={:?} stderr={:?}",
            cmdline,
            output.exit_code,
            output.stdout,
            output.stderr
        );

        Ok(output)
    }
}
