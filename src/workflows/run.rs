use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::state_machine::{StepKind, WorkflowState};

/// Schema version written into every state file.
pub const STATE_SCHEMA_VERSION: &str = "1";

const MAX_WORKSPACE_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceLifecycle {
    Created,
    Provisioned,
    Verified,
    /// Serving traffic.
    Cutover,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub elastic_ip: Option<String>,
    pub lifecycle: Option<WorkspaceLifecycle>,
}

impl Workspace {
    /// A workspace this tool has not created yet.
    pub fn planned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            elastic_ip: None,
            lifecycle: None,
        }
    }

    /// The existing deployment being replaced; it serves traffic until cutover.
    pub fn serving(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            elastic_ip: None,
            lifecycle: Some(WorkspaceLifecycle::Cutover),
        }
    }
}

/// Checks a workspace name is usable both as a Terraform workspace and as a
/// state file key.
pub fn validate_workspace_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("workspace name must not be empty".to_string());
    }
    if name.len() > MAX_WORKSPACE_NAME_LEN {
        return Err(format!(
            "workspace name must be at most {MAX_WORKSPACE_NAME_LEN} characters"
        ));
    }
    if name.starts_with('.') {
        return Err("workspace name must not start with '.'".to_string());
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("workspace name contains invalid character {bad:?}"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Postcondition already held, commands were not run.
    Skipped,
    Failed { error: String },
    Interrupted,
    /// Refused before anything ran; state untouched.
    Rejected { reason: String },
    /// A live check failed and the run was moved to `Blocked`.
    Blocked { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub step: StepKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub commands: Vec<String>,
    pub exit_code: Option<i32>,
    pub outcome: AttemptOutcome,
    pub hostname: String,
    pub pid: u32,
}

impl StepAttempt {
    pub fn begin(step: StepKind) -> Self {
        let now = Utc::now();
        Self {
            step,
            started_at: now,
            finished_at: now,
            commands: Vec::new(),
            exit_code: None,
            outcome: AttemptOutcome::Succeeded,
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            pid: std::process::id(),
        }
    }

    pub fn finish(mut self, outcome: AttemptOutcome) -> Self {
        self.finished_at = Utc::now();
        self.outcome = outcome;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub from_state: WorkflowState,
    pub to_state: WorkflowState,
    pub step: Option<StepKind>,
    pub timestamp: DateTime<Utc>,
}

/// One execution of the procedure against one new workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub version: String,
    pub run_id: Uuid,
    pub workspace: Workspace,
    pub previous_workspace: Option<Workspace>,
    /// The workspace currently serving traffic.
    pub active_workspace: Option<String>,
    pub state: WorkflowState,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: Vec<StepAttempt>,
    #[serde(default)]
    pub transitions: Vec<StateTransitionRecord>,
}

impl WorkflowRun {
    pub fn new(workspace: impl Into<String>, replaces: Option<String>) -> Self {
        let now = Utc::now();
        let previous_workspace = replaces.map(Workspace::serving);
        let active_workspace = previous_workspace.as_ref().map(|w| w.name.clone());
        Self {
            version: STATE_SCHEMA_VERSION.to_string(),
            run_id: Uuid::new_v4(),
            workspace: Workspace::planned(workspace),
            previous_workspace,
            active_workspace,
            state: WorkflowState::NotStarted,
            last_command: None,
            last_exit_code: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
            attempts: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.workspace.name
    }

    pub fn previous_name(&self) -> Option<&str> {
        self.previous_workspace.as_ref().map(|w| w.name.as_str())
    }

    pub fn is_active(&self, workspace: &str) -> bool {
        self.active_workspace.as_deref() == Some(workspace)
    }

    /// Moves one step forward. Callers check readiness first; a mismatch here
    /// is a programming error and leaves the run untouched.
    pub fn advance(&mut self, step: StepKind) -> bool {
        if self.state != step.from_state() {
            return false;
        }
        let to = step.to_state();
        let now = Utc::now();
        match step {
            StepKind::CreateWorkspace => {
                self.workspace.created_at = Some(now);
                self.workspace.lifecycle = Some(WorkspaceLifecycle::Created);
            }
            StepKind::Provision => {
                self.workspace.lifecycle = Some(WorkspaceLifecycle::Provisioned);
            }
            StepKind::Verify => {
                self.workspace.lifecycle = Some(WorkspaceLifecycle::Verified);
            }
            StepKind::Cutover => {
                self.workspace.lifecycle = Some(WorkspaceLifecycle::Cutover);
                self.active_workspace = Some(self.workspace.name.clone());
            }
            StepKind::DestroyOld => {
                if let Some(previous) = self.previous_workspace.as_mut() {
                    previous.lifecycle = Some(WorkspaceLifecycle::Destroyed);
                }
                self.finished_at = Some(now);
            }
            StepKind::Init => {}
        }
        self.record_transition(to, Some(step));
        true
    }

    /// Parks the run in `Blocked`, remembering where it was.
    pub fn block(&mut self, reason: impl Into<String>) {
        if self.state.is_blocked() {
            return;
        }
        let blocked = WorkflowState::Blocked {
            from: Box::new(self.state.clone()),
            reason: reason.into(),
        };
        self.record_transition(blocked, None);
    }

    /// Returns a blocked run to the state it was blocked from.
    pub fn unblock(&mut self) -> Option<WorkflowState> {
        let WorkflowState::Blocked { from, .. } = &self.state else {
            return None;
        };
        let restored = (**from).clone();
        self.record_transition(restored.clone(), None);
        Some(restored)
    }

    /// Records that a later run has cut traffic over to `active`.
    pub fn hand_over(&mut self, active: &str) {
        info!(
            workspace = %self.workspace.name,
            run_id = %self.run_id,
            active = %active,
            "Active workspace handed over to a newer run"
        );
        self.active_workspace = Some(active.to_string());
        self.updated_at = Utc::now();
    }

    fn record_transition(&mut self, to: WorkflowState, step: Option<StepKind>) {
        let now = Utc::now();
        let from = std::mem::replace(&mut self.state, to.clone());
        info!(
            workspace = %self.workspace.name,
            run_id = %self.run_id,
            from = %from,
            to = %to,
            step = ?step,
            "Workflow state transition"
        );
        self.transitions.push(StateTransitionRecord {
            from_state: from,
            to_state: to,
            step,
            timestamp: now,
        });
        self.updated_at = now;
    }

    pub fn record_attempt(&mut self, attempt: StepAttempt) {
        self.updated_at = attempt.finished_at;
        self.attempts.push(attempt);
    }

    pub fn record_command(&mut self, command_line: String, exit_code: Option<i32>) {
        self.last_command = Some(command_line);
        self.last_exit_code = exit_code;
    }

    /// Prune histories to stay within limits
    pub fn prune_history(&mut self, max_entries: usize) {
        if self.attempts.len() > max_entries {
            let excess = self.attempts.len() - max_entries;
            self.attempts.drain(0..excess);
        }
        if self.transitions.len() > max_entries {
            let excess = self.transitions.len() - max_entries;
            self.transitions.drain(0..excess);
        }
    }
}
