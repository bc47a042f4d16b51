//! Step sequencer
//!
//! Drives a `WorkflowRun` through its steps one at a time under an exclusive
//! workspace lock. Persisted state only moves forward after a step's commands
//! and checks have all passed; every other outcome is recorded as an attempt
//! and leaves the state where it was (or parks it in `Blocked`).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

use crate::config::CutoverConfig;
use crate::external::{CommandError, CommandExecutor, CommandInvocation, CommandOutput, TerraformClient};
use crate::shutdown::ShutdownSignal;
use crate::telemetry::create_workflow_span;

use super::errors::WorkflowError;
use super::run::{validate_workspace_name, AttemptOutcome, StepAttempt, WorkflowRun};
use super::state_machine::{StepKind, StepReadiness, WorkflowState};
use super::steps::{Confirmation, Step, StepInputs};
use super::store::StateStore;
use super::verification::{check_destroy_target, Check, CheckOutcome, CheckReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    Ran,
    /// Postcondition already held, so the commands were not re-run.
    Skipped,
    /// The run was already past this step.
    AlreadyDone,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub run: WorkflowRun,
    pub steps: Vec<(StepKind, StepDisposition)>,
}

impl StepReport {
    pub fn state(&self) -> &WorkflowState {
        &self.run.state
    }
}

/// Why a step stopped, and what to record about it.
struct StepFailure {
    outcome: AttemptOutcome,
    error: WorkflowError,
    block: Option<String>,
}

impl StepFailure {
    fn failed(error: WorkflowError) -> Self {
        Self {
            outcome: AttemptOutcome::Failed {
                error: error.to_string(),
            },
            error,
            block: None,
        }
    }

    fn blocked(reason: String, error: WorkflowError) -> Self {
        Self {
            outcome: AttemptOutcome::Blocked {
                reason: reason.clone(),
            },
            error,
            block: Some(reason),
        }
    }
}

pub struct Sequencer {
    executor: Arc<dyn CommandExecutor>,
    store: StateStore,
    config: CutoverConfig,
    shutdown: ShutdownSignal,
    timeout_override: Option<Duration>,
}

impl Sequencer {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: CutoverConfig) -> Self {
        let store = StateStore::new(config.state.directory.clone())
            .with_max_history_entries(config.state.max_history_entries);
        Self {
            executor,
            store,
            config,
            shutdown: ShutdownSignal::never(),
            timeout_override: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Timeout applied to every step, overriding config.
    pub fn with_timeout_override(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// `terraform init` then `terraform workspace new`.
    pub async fn init(
        &self,
        workspace: &str,
        replaces: Option<&str>,
    ) -> Result<StepReport, WorkflowError> {
        validate_name(workspace)?;
        if let Some(previous) = replaces {
            validate_name(previous)?;
            if previous == workspace {
                return Err(WorkflowError::InvalidInvocation(format!(
                    "{workspace} cannot replace itself"
                )));
            }
        }

        let mut lock = self.store.open_lock(workspace)?;
        let _guard = lock.acquire()?;

        let mut run = match self.store.try_load(workspace).await? {
            Some(run) => {
                if let Some(previous) = replaces {
                    if run.previous_name() != Some(previous) {
                        return Err(WorkflowError::InvalidInvocation(format!(
                            "run for {workspace} already exists and replaces {}",
                            run.previous_name().unwrap_or("nothing")
                        )));
                    }
                }
                info!(workspace = %workspace, state = %run.state, "Resuming existing workflow run");
                run
            }
            None => {
                let run = WorkflowRun::new(workspace, replaces.map(str::to_string));
                info!(
                    workspace = %workspace,
                    run_id = %run.run_id,
                    replaces = ?replaces,
                    "Starting new workflow run"
                );
                self.store.save(&run).await?;
                run
            }
        };

        self.run_steps(
            &mut run,
            &[StepKind::Init, StepKind::CreateWorkspace],
            &StepInputs::default(),
        )
        .await
    }

    /// Runs the provisioning commands against the new workspace.
    pub async fn provision(&self, workspace: &str) -> Result<StepReport, WorkflowError> {
        self.run_locked(workspace, StepKind::Provision, StepInputs::default())
            .await
    }

    /// Checks the selected workspace and the IP output.
    pub async fn verify(
        &self,
        workspace: &str,
        expected_ip: Option<&str>,
    ) -> Result<StepReport, WorkflowError> {
        if let Some(ip) = expected_ip {
            if ip.trim().parse::<IpAddr>().is_err() {
                return Err(WorkflowError::InvalidInvocation(format!(
                    "expected IP {ip:?} is not an IP address"
                )));
            }
        }
        let inputs = StepInputs {
            expected_ip: expected_ip.map(|ip| ip.trim().to_string()),
            ..Default::default()
        };
        self.run_locked(workspace, StepKind::Verify, inputs).await
    }

    /// Records that DNS now points at the new workspace.
    pub async fn cutover(&self, workspace: &str) -> Result<StepReport, WorkflowError> {
        let report = self
            .run_locked(workspace, StepKind::Cutover, StepInputs::default())
            .await?;
        if let Some(previous) = report.run.previous_name() {
            if let Err(error) = self.hand_over(previous, workspace).await {
                warn!(
                    workspace = %previous,
                    active = %workspace,
                    error = %error,
                    "Could not record the new active workspace on the replaced run"
                );
            }
        }
        Ok(report)
    }

    /// Points the run that created `previous` at the workspace now serving
    /// traffic. Runs that never recorded `previous` are left alone.
    async fn hand_over(&self, previous: &str, active: &str) -> Result<(), WorkflowError> {
        if self.store.try_load(previous).await?.is_none() {
            return Ok(());
        }
        let mut lock = self.store.open_lock(previous)?;
        let _guard = lock.acquire()?;
        if let Some(mut run) = self.store.try_load(previous).await? {
            if !run.is_active(active) {
                run.hand_over(active);
                self.store.save(&run).await?;
            }
        }
        Ok(())
    }

    /// Destroys the workspace replaced by a cut-over run.
    pub async fn destroy(
        &self,
        target: &str,
        confirmation: Confirmation,
    ) -> Result<StepReport, WorkflowError> {
        validate_name(target)?;
        require_confirmation(StepKind::DestroyOld, confirmation)?;

        // The newest run replacing `target` owns its destruction. A run keyed
        // by `target` is only consulted so that destroying it can be refused.
        let owner = match self.store.find_replacing(target).await? {
            Some(run) => run,
            None => self.store.load(target).await?,
        };
        let key = owner.name().to_string();
        let mut lock = self.store.open_lock(&key)?;
        let _guard = lock.acquire()?;
        // Reload under the lock; the unlocked read only found the key.
        let mut run = self.store.load(&key).await?;

        if let Err(reason) = check_destroy_target(&run, target) {
            warn!(
                workspace = %key,
                target = %target,
                active = ?run.active_workspace,
                reason = %reason,
                "Refusing destructive step"
            );
            let attempt = StepAttempt::begin(StepKind::DestroyOld).finish(AttemptOutcome::Rejected {
                reason: reason.clone(),
            });
            run.record_attempt(attempt);
            self.store.save(&run).await?;
            return Err(WorkflowError::Precondition {
                step: StepKind::DestroyOld,
                reason,
            });
        }

        let inputs = StepInputs {
            target: Some(target.to_string()),
            confirmation,
            ..Default::default()
        };
        self.run_steps(&mut run, &[StepKind::DestroyOld], &inputs)
            .await
    }

    /// Releases a blocked run back to the state it was blocked from.
    pub async fn unblock(&self, workspace: &str) -> Result<WorkflowRun, WorkflowError> {
        validate_name(workspace)?;
        let mut lock = self.store.open_lock(workspace)?;
        let _guard = lock.acquire()?;
        let mut run = self.store.load(workspace).await?;

        let Some(restored) = run.unblock() else {
            return Err(WorkflowError::InvalidInvocation(format!(
                "{workspace} is not blocked (state {})",
                run.state
            )));
        };
        info!(workspace = %workspace, restored = %restored, "Workflow run unblocked by operator");
        self.store.save(&run).await?;
        Ok(run)
    }

    /// Reads one run, or all runs. Takes no lock.
    pub async fn status(&self, workspace: Option<&str>) -> Result<Vec<WorkflowRun>, WorkflowError> {
        match workspace {
            Some(name) => {
                validate_name(name)?;
                Ok(vec![self.store.find_for_target(name).await?])
            }
            None => Ok(self.store.list().await?),
        }
    }

    async fn run_locked(
        &self,
        workspace: &str,
        step: StepKind,
        inputs: StepInputs,
    ) -> Result<StepReport, WorkflowError> {
        validate_name(workspace)?;
        let mut lock = self.store.open_lock(workspace)?;
        let _guard = lock.acquire()?;
        let mut run = self.store.load(workspace).await?;
        self.run_steps(&mut run, &[step], &inputs).await
    }

    fn ensure_ready(&self, run: &WorkflowRun, step: StepKind) -> Result<bool, WorkflowError> {
        match step.readiness(&run.state) {
            StepReadiness::Ready => Ok(true),
            StepReadiness::AlreadyDone => Ok(false),
            StepReadiness::Blocked => {
                let reason = match &run.state {
                    WorkflowState::Blocked { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                Err(WorkflowError::Blocked {
                    workspace: run.name().to_string(),
                    reason,
                })
            }
            StepReadiness::NotReady { required } => Err(WorkflowError::OutOfOrder {
                workspace: run.name().to_string(),
                step,
                required,
                current: run.state.clone(),
            }),
        }
    }

    async fn run_steps(
        &self,
        run: &mut WorkflowRun,
        steps: &[StepKind],
        inputs: &StepInputs,
    ) -> Result<StepReport, WorkflowError> {
        let mut dispositions = Vec::with_capacity(steps.len());
        for &step in steps {
            if !self.ensure_ready(run, step)? {
                info!(workspace = %run.name(), step = %step, "Step already completed, skipping");
                dispositions.push((step, StepDisposition::AlreadyDone));
                continue;
            }
            let disposition = self.execute_step(run, step, inputs).await?;
            dispositions.push((step, disposition));
        }
        Ok(StepReport {
            run: run.clone(),
            steps: dispositions,
        })
    }

    async fn execute_step(
        &self,
        run: &mut WorkflowRun,
        kind: StepKind,
        inputs: &StepInputs,
    ) -> Result<StepDisposition, WorkflowError> {
        let mut inputs = inputs.clone();
        if inputs.timeout_override.is_none() {
            inputs.timeout_override = self.timeout_override;
        }
        let step = Step::plan(kind, run.name(), &self.config, &inputs);
        if step.destructive && inputs.confirmation != Confirmation::Confirmed {
            return Err(WorkflowError::ConfirmationRequired { step: kind });
        }
        let terraform = self.terraform(step.timeout);
        let span = create_workflow_span(kind.name(), run.name(), &run.run_id.to_string());

        let mut attempt = StepAttempt::begin(kind);
        let result = self
            .perform(run, &step, &terraform, &mut attempt)
            .instrument(span)
            .await;

        match result {
            Ok(disposition) => {
                if !run.advance(kind) {
                    let error = WorkflowError::OutOfOrder {
                        workspace: run.name().to_string(),
                        step: kind,
                        required: kind.from_state(),
                        current: run.state.clone(),
                    };
                    run.record_attempt(attempt.finish(AttemptOutcome::Failed {
                        error: error.to_string(),
                    }));
                    self.store.save(run).await?;
                    error!(workspace = %run.name(), step = %kind, error = %error, "Step finished but the run cannot advance");
                    return Err(error);
                }
                let outcome = match disposition {
                    StepDisposition::Skipped => AttemptOutcome::Skipped,
                    _ => AttemptOutcome::Succeeded,
                };
                run.record_attempt(attempt.finish(outcome));
                self.store.save(run).await?;
                info!(workspace = %run.name(), step = %kind, state = %run.state, "Step completed");
                Ok(disposition)
            }
            Err(failure) => {
                if let Some(reason) = &failure.block {
                    run.block(reason.clone());
                }
                run.record_attempt(attempt.finish(failure.outcome));
                if let Err(save_error) = self.store.save(run).await {
                    error!(
                        workspace = %run.name(),
                        step = %kind,
                        error = %save_error,
                        "Failed to record step attempt"
                    );
                }
                error!(workspace = %run.name(), step = %kind, error = %failure.error, "Step failed");
                Err(failure.error)
            }
        }
    }

    async fn perform(
        &self,
        run: &mut WorkflowRun,
        step: &Step,
        terraform: &TerraformClient,
        attempt: &mut StepAttempt,
    ) -> Result<StepDisposition, StepFailure> {
        if let Some(workspace) = &step.select {
            let invocation = terraform.select_invocation(workspace);
            self.run_command(run, step.kind, attempt, &invocation).await?;
        }

        if let Some(check) = &step.precondition {
            let report = self.evaluate(run, step.kind, check, terraform).await?;
            if let CheckOutcome::Mismatch { expected, actual } = report.outcome {
                let reason = format!("precondition `{check}` failed: expected {expected}, got {actual:?}");
                return Err(StepFailure::blocked(
                    reason.clone(),
                    WorkflowError::Precondition {
                        step: step.kind,
                        reason,
                    },
                ));
            }
        }

        if step.skip_if_satisfied {
            if let Some(check) = &step.postcondition {
                let report = self.evaluate(run, step.kind, check, terraform).await?;
                if report.outcome.is_match() {
                    info!(step = %step.kind, check = %check, "Postcondition already satisfied");
                    return Ok(StepDisposition::Skipped);
                }
            }
        }

        for invocation in &step.commands {
            self.run_command(run, step.kind, attempt, invocation).await?;
        }

        if let Some(check) = &step.postcondition {
            let report = self.evaluate(run, step.kind, check, terraform).await?;
            match report.outcome {
                CheckOutcome::Match => {
                    if step.kind == StepKind::Verify {
                        run.workspace.elastic_ip = Some(report.actual);
                    }
                }
                CheckOutcome::Mismatch { expected, actual } => {
                    let reason = format!("`{check}` failed: expected {expected}, got {actual:?}");
                    return Err(StepFailure::blocked(
                        reason,
                        WorkflowError::VerificationMismatch {
                            step: step.kind,
                            expected,
                            actual,
                        },
                    ));
                }
            }
        }

        Ok(StepDisposition::Ran)
    }

    async fn run_command(
        &self,
        run: &mut WorkflowRun,
        kind: StepKind,
        attempt: &mut StepAttempt,
        invocation: &CommandInvocation,
    ) -> Result<CommandOutput, StepFailure> {
        if self.shutdown.is_triggered() {
            return Err(self.interrupted(run, kind));
        }
        let command_line = invocation.command_line();
        attempt.commands.push(command_line.clone());
        info!(step = %kind, command = %command_line, "Running command");

        let result = tokio::select! {
            result = self.executor.execute(invocation) => result,
            _ = self.shutdown.wait() => {
                run.record_command(command_line, None);
                return Err(self.interrupted(run, kind));
            }
        };

        let exit_code = match &result {
            Ok(output) => Some(output.status_code),
            Err(_) => None,
        };
        attempt.exit_code = exit_code;
        run.record_command(command_line, exit_code);

        result
            .and_then(|output| output.ensure_success(invocation))
            .map_err(|source| {
                StepFailure::failed(WorkflowError::Execution { step: kind, source })
            })
    }

    async fn evaluate(
        &self,
        run: &WorkflowRun,
        kind: StepKind,
        check: &Check,
        terraform: &TerraformClient,
    ) -> Result<CheckReport, StepFailure> {
        let result: Result<CheckReport, CommandError> = tokio::select! {
            result = check.evaluate(terraform) => result,
            _ = self.shutdown.wait() => return Err(self.interrupted(run, kind)),
        };
        let report = result.map_err(|source| {
            StepFailure::failed(WorkflowError::Execution { step: kind, source })
        })?;
        info!(
            step = %kind,
            check = %check,
            actual = %report.actual,
            matched = report.outcome.is_match(),
            "Check evaluated"
        );
        Ok(report)
    }

    fn interrupted(&self, run: &WorkflowRun, kind: StepKind) -> StepFailure {
        warn!(workspace = %run.name(), step = %kind, "Step interrupted");
        StepFailure {
            outcome: AttemptOutcome::Interrupted,
            error: WorkflowError::Interrupted {
                step: kind,
                state: run.state.clone(),
            },
            block: None,
        }
    }

    fn terraform(&self, timeout: Option<Duration>) -> TerraformClient {
        TerraformClient::new(self.executor.clone(), self.config.terraform.binary.clone())
            .with_working_dir(self.config.terraform.working_dir.clone())
            .with_read_only_retries(self.config.execution.read_only_retries)
            .with_timeout(timeout)
    }
}

fn require_confirmation(step: StepKind, confirmation: Confirmation) -> Result<(), WorkflowError> {
    if step.is_destructive() && confirmation != Confirmation::Confirmed {
        return Err(WorkflowError::ConfirmationRequired { step });
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), WorkflowError> {
    validate_workspace_name(name)
        .map_err(|reason| WorkflowError::InvalidInvocation(format!("{name:?}: {reason}")))
}
