// Provision/cutover lifecycle. Every persisted state change goes through
// `WorkflowRun::advance`, which only accepts the single legal successor.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    NotStarted,
    Initialized,
    WorkspaceCreated,
    Provisioned,
    Verified,
    CutoverConfirmed,
    OldDestroyed,
    /// A live check failed; nothing proceeds until an operator unblocks.
    Blocked {
        from: Box<WorkflowState>,
        reason: String,
    },
}

impl WorkflowState {
    /// Position in the linear sequence. `Blocked` has none.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            WorkflowState::NotStarted => Some(0),
            WorkflowState::Initialized => Some(1),
            WorkflowState::WorkspaceCreated => Some(2),
            WorkflowState::Provisioned => Some(3),
            WorkflowState::Verified => Some(4),
            WorkflowState::CutoverConfirmed => Some(5),
            WorkflowState::OldDestroyed => Some(6),
            WorkflowState::Blocked { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::OldDestroyed | WorkflowState::Blocked { .. }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, WorkflowState::Blocked { .. })
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::NotStarted => write!(f, "NotStarted"),
            WorkflowState::Initialized => write!(f, "Initialized"),
            WorkflowState::WorkspaceCreated => write!(f, "WorkspaceCreated"),
            WorkflowState::Provisioned => write!(f, "Provisioned"),
            WorkflowState::Verified => write!(f, "Verified"),
            WorkflowState::CutoverConfirmed => write!(f, "CutoverConfirmed"),
            WorkflowState::OldDestroyed => write!(f, "OldDestroyed"),
            WorkflowState::Blocked { from, .. } => write!(f, "Blocked (from {from})"),
        }
    }
}

/// The ordered units of work. Each moves the run exactly one state forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Init,
    CreateWorkspace,
    Provision,
    Verify,
    Cutover,
    DestroyOld,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Init,
        StepKind::CreateWorkspace,
        StepKind::Provision,
        StepKind::Verify,
        StepKind::Cutover,
        StepKind::DestroyOld,
    ];

    /// Stable name used in config keys, logs and attempt records.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Init => "init",
            StepKind::CreateWorkspace => "create-workspace",
            StepKind::Provision => "provision",
            StepKind::Verify => "verify",
            StepKind::Cutover => "cutover",
            StepKind::DestroyOld => "destroy-old",
        }
    }

    pub fn from_state(&self) -> WorkflowState {
        match self {
            StepKind::Init => WorkflowState::NotStarted,
            StepKind::CreateWorkspace => WorkflowState::Initialized,
            StepKind::Provision => WorkflowState::WorkspaceCreated,
            StepKind::Verify => WorkflowState::Provisioned,
            StepKind::Cutover => WorkflowState::Verified,
            StepKind::DestroyOld => WorkflowState::CutoverConfirmed,
        }
    }

    pub fn to_state(&self) -> WorkflowState {
        match self {
            StepKind::Init => WorkflowState::Initialized,
            StepKind::CreateWorkspace => WorkflowState::WorkspaceCreated,
            StepKind::Provision => WorkflowState::Provisioned,
            StepKind::Verify => WorkflowState::Verified,
            StepKind::Cutover => WorkflowState::CutoverConfirmed,
            StepKind::DestroyOld => WorkflowState::OldDestroyed,
        }
    }

    /// Destructive steps need an explicit confirmation input.
    pub fn is_destructive(&self) -> bool {
        matches!(self, StepKind::DestroyOld)
    }

    /// Whether `state` allows this step to run now.
    pub fn readiness(&self, state: &WorkflowState) -> StepReadiness {
        let Some(current) = state.ordinal() else {
            return StepReadiness::Blocked;
        };
        let from = self.from_state().ordinal().unwrap_or_default();
        if current == from {
            StepReadiness::Ready
        } else if current > from {
            StepReadiness::AlreadyDone
        } else {
            StepReadiness::NotReady {
                required: self.from_state(),
            }
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReadiness {
    Ready,
    AlreadyDone,
    NotReady { required: WorkflowState },
    Blocked,
}
