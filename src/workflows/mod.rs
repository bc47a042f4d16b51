// Provision → verify → cutover → destroy workflow: state machine, persisted
// runs, step planning, checks and the sequencer that ties them together.

pub mod errors;
pub mod run;
pub mod sequencer;
pub mod state_machine;
pub mod steps;
pub mod store;
pub mod verification;

pub use errors::{exit_code, WorkflowError};
pub use run::{AttemptOutcome, StepAttempt, Workspace, WorkspaceLifecycle, WorkflowRun};
pub use sequencer::{Sequencer, StepDisposition, StepReport};
pub use state_machine::{StepKind, StepReadiness, WorkflowState};
pub use steps::{CommandTemplate, Confirmation, Step, StepInputs};
pub use store::{StateStore, StoreError, WorkspaceLock};
pub use verification::{compare, Check, CheckOutcome, Expectation};
