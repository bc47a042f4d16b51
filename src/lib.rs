// infra-cutover library
// Exposes the workflow engine, external tool wrappers and CLI pieces for the
// binary and the integration tests.

pub mod cli;
pub mod config;
pub mod external;
pub mod shutdown;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::CutoverConfig;
pub use external::{CommandExecutor, CommandInvocation, CommandOutput, ProcessCommandExecutor, TerraformClient};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use telemetry::{create_workflow_span, init_telemetry};
pub use workflows::{
    Confirmation, Sequencer, StateStore, StepKind, StepReport, WorkflowError, WorkflowRun,
    WorkflowState,
};
