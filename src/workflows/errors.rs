use thiserror::Error;

use crate::external::CommandError;

use super::state_machine::{StepKind, WorkflowState};
use super::store::StoreError;

/// Process exit codes reported by the CLI.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const EXECUTION_FAILURE: i32 = 1;
    pub const BLOCKED: i32 = 2;
    pub const INVALID_INVOCATION: i32 = 3;
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Step {step} failed: {source}")]
    Execution {
        step: StepKind,
        #[source]
        source: CommandError,
    },

    #[error("Precondition failed for {step}: {reason}")]
    Precondition { step: StepKind, reason: String },

    #[error("Verification mismatch for {step}: expected {expected}, got {actual:?}")]
    VerificationMismatch {
        step: StepKind,
        expected: String,
        actual: String,
    },

    #[error("Workspace {workspace} is blocked: {reason}. Resolve it by hand, then run `unblock`")]
    Blocked { workspace: String, reason: String },

    #[error("Step {step} requires state {required}, but {workspace} is at {current}")]
    OutOfOrder {
        workspace: String,
        step: StepKind,
        required: WorkflowState,
        current: WorkflowState,
    },

    #[error("Step {step} is destructive and needs explicit confirmation (--confirm)")]
    ConfirmationRequired { step: StepKind },

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Step {step} was interrupted; state left at {state}")]
    Interrupted { step: StepKind, state: WorkflowState },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cannot render output: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkflowError::Execution { .. } | WorkflowError::Interrupted { .. } => {
                exit_code::EXECUTION_FAILURE
            }
            WorkflowError::Precondition { .. }
            | WorkflowError::VerificationMismatch { .. }
            | WorkflowError::Blocked { .. } => exit_code::BLOCKED,
            WorkflowError::OutOfOrder { .. }
            | WorkflowError::ConfirmationRequired { .. }
            | WorkflowError::InvalidInvocation(_) => exit_code::INVALID_INVOCATION,
            WorkflowError::Store(StoreError::NotFound { .. }) => exit_code::INVALID_INVOCATION,
            WorkflowError::Store(_) | WorkflowError::Serialization(_) => {
                exit_code::EXECUTION_FAILURE
            }
        }
    }

    /// Captured output of the failed command, printed verbatim by the CLI.
    pub fn command_output(&self) -> Option<(&str, &str)> {
        match self {
            WorkflowError::Execution {
                source: CommandError::NonZeroExit { stdout, stderr, .. },
                ..
            } => Some((stdout.as_str(), stderr.as_str())),
            _ => None,
        }
    }
}
