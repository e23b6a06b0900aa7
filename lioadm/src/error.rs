use thiserror::Error;

#[derive(Error, Debug)]
pub enum LioError {
    #[error("{0} is not installed correctly.")]
    ToolUnavailable(String),

    #[error("Failed to create iscsi target for volume id:{0}.")]
    TargetCreateFailed(String),
    #[error("Failed to remove iscsi target for volume id:{0}.")]
    TargetRemoveFailed(String),
    #[error("No such iscsi target '{0}' exists.")]
    TargetNotFound(String),

    #[error("Failed to attach iSCSI target for volume {0}.")]
    InitiatorAttachFailed(String),
    #[error("Failed to detach iSCSI target for volume {0}.")]
    InitiatorDetachFailed(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Malformed provider_auth for volume {0}, expected '<method> <username> <password>'.")]
    InvalidProviderAuth(String),
    #[error("Malformed provider_location for volume {0}, expected '<portal>,<tid> <iqn> [<lun>]'.")]
    InvalidProviderLocation(String),

    #[error("Volume {0} could not be found.")]
    VolumeNotFound(String),
    #[error("No iscsi target provisioned for volume {0}.")]
    TargetNumNotFound(String),

    #[error("Target helper '{0}' is not supported.")]
    UnsupportedTargetHelper(String),
}

impl LioError {
    /// Reports whether `err` carries one of the store's not-found kinds.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<LioError>(),
            Some(LioError::VolumeNotFound(_)) | Some(LioError::TargetNumNotFound(_))
        )
    }
}

/// Outcome of running an external command that did not succeed.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error(
        "Command [{command}] executed and failed with status: {}  stdout: {stdout}  stderr: {stderr}",
        status_string(.exit_code)
    )]
    CommandFailure {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn status_string(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ExecutionError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::CommandFailure { exit_code, .. } => *exit_code,
            ExecutionError::ExecutionStart { .. } => None,
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            ExecutionError::CommandFailure { stderr, .. } => stderr,
            ExecutionError::ExecutionStart { .. } => "",
        }
    }
}
