mod common;

use common::{Harness, IP, NEW, OLD};
use infra_cutover::workflows::{
    exit_code, AttemptOutcome, StepDisposition, StoreError, WorkspaceLifecycle,
};
use infra_cutover::{Confirmation, ShutdownSignal, StateStore, StepKind, WorkflowError, WorkflowState};

#[tokio::test]
async fn test_full_replacement_reaches_old_destroyed() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();

    let report = sequencer.init(NEW, Some(OLD)).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::WorkspaceCreated);
    assert_eq!(
        report.steps,
        vec![
            (StepKind::Init, StepDisposition::Ran),
            (StepKind::CreateWorkspace, StepDisposition::Ran)
        ]
    );

    let report = sequencer.provision(NEW).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::Provisioned);

    let report = sequencer.verify(NEW, Some(IP)).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::Verified);
    assert_eq!(report.run.workspace.elastic_ip.as_deref(), Some(IP));

    let report = sequencer.cutover(NEW).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::CutoverConfirmed);
    assert_eq!(report.run.active_workspace.as_deref(), Some(NEW));

    let report = sequencer.destroy(OLD, Confirmation::Confirmed).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::OldDestroyed);
    assert!(report.run.finished_at.is_some());
    assert_eq!(
        report.run.previous_workspace.as_ref().and_then(|w| w.lifecycle),
        Some(WorkspaceLifecycle::Destroyed)
    );

    assert_eq!(harness.fake.destroyed(), vec![OLD.to_string()]);
    assert!(!harness.fake.workspaces().contains(&OLD.to_string()));
    assert!(harness.fake.workspaces().contains(&NEW.to_string()));
    assert_eq!(harness.fake.selected(), NEW);

    let persisted = sequencer.store().load(NEW).await.unwrap();
    assert_eq!(persisted.state, WorkflowState::OldDestroyed);
    assert_eq!(persisted.transitions.len(), 6);
}

#[tokio::test]
async fn test_destroying_active_workspace_is_refused_without_state_change() {
    let harness = Harness::new();
    let sequencer = harness.cut_over().await;

    let error = sequencer
        .destroy(NEW, Confirmation::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(error, WorkflowError::Precondition { step: StepKind::DestroyOld, .. }));
    assert_eq!(error.exit_code(), exit_code::BLOCKED);

    let run = sequencer.store().load(NEW).await.unwrap();
    assert_eq!(run.state, WorkflowState::CutoverConfirmed);
    let last = run.attempts.last().unwrap();
    assert_eq!(last.step, StepKind::DestroyOld);
    assert!(matches!(last.outcome, AttemptOutcome::Rejected { .. }));
    assert!(last.commands.is_empty());
    assert_eq!(harness.fake.count("destroy"), 0);
}

#[tokio::test]
async fn test_destroy_requires_confirmation() {
    let harness = Harness::new();
    let sequencer = harness.cut_over().await;
    let attempts_before = sequencer.store().load(NEW).await.unwrap().attempts.len();

    let error = sequencer
        .destroy(OLD, Confirmation::NotConfirmed)
        .await
        .unwrap_err();
    assert!(matches!(error, WorkflowError::ConfirmationRequired { .. }));
    assert_eq!(error.exit_code(), exit_code::INVALID_INVOCATION);

    let run = sequencer.store().load(NEW).await.unwrap();
    assert_eq!(run.state, WorkflowState::CutoverConfirmed);
    assert_eq!(run.attempts.len(), attempts_before);
    assert!(harness.fake.destroyed().is_empty());
}

#[tokio::test]
async fn test_destroy_before_cutover_refuses_still_active_workspace() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    sequencer.provision(NEW).await.unwrap();
    sequencer.verify(NEW, None).await.unwrap();

    let error = sequencer
        .destroy(OLD, Confirmation::Confirmed)
        .await
        .unwrap_err();
    match &error {
        WorkflowError::Precondition { step, reason } => {
            assert_eq!(*step, StepKind::DestroyOld);
            assert!(reason.contains("active"), "{reason}");
        }
        other => panic!("expected precondition failure, got {other}"),
    }
    assert_eq!(error.exit_code(), exit_code::BLOCKED);

    let run = sequencer.store().load(NEW).await.unwrap();
    assert_eq!(run.state, WorkflowState::Verified);
    assert!(matches!(
        run.attempts.last().map(|a| &a.outcome),
        Some(AttemptOutcome::Rejected { .. })
    ));
    assert!(harness.fake.destroyed().is_empty());
}

#[tokio::test]
async fn test_second_replacement_cycle_destroys_previous_generation() {
    const NEXT: &str = "web-2027-04";
    let harness = Harness::new();
    let sequencer = harness.cut_over().await;
    sequencer.destroy(OLD, Confirmation::Confirmed).await.unwrap();

    sequencer.init(NEXT, Some(NEW)).await.unwrap();
    sequencer.provision(NEXT).await.unwrap();
    sequencer.verify(NEXT, Some(IP)).await.unwrap();

    // NEW still serves traffic until the next cutover.
    let error = sequencer
        .destroy(NEW, Confirmation::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(error, WorkflowError::Precondition { .. }), "{error}");

    sequencer.cutover(NEXT).await.unwrap();
    let first = sequencer.store().load(NEW).await.unwrap();
    assert_eq!(first.state, WorkflowState::OldDestroyed);
    assert_eq!(first.active_workspace.as_deref(), Some(NEXT));

    let report = sequencer.destroy(NEW, Confirmation::Confirmed).await.unwrap();
    assert_eq!(report.run.name(), NEXT);
    assert_eq!(report.state(), &WorkflowState::OldDestroyed);
    assert_eq!(
        harness.fake.destroyed(),
        vec![OLD.to_string(), NEW.to_string()]
    );
    assert!(!harness.fake.workspaces().contains(&NEW.to_string()));
    assert_eq!(harness.fake.selected(), NEXT);

    // The newest generation is now the one serving traffic.
    let error = sequencer
        .destroy(NEXT, Confirmation::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(error, WorkflowError::Precondition { .. }), "{error}");
}

#[tokio::test]
async fn test_repeated_destroy_is_a_no_op() {
    let harness = Harness::new();
    let sequencer = harness.cut_over().await;
    sequencer.destroy(OLD, Confirmation::Confirmed).await.unwrap();
    let commands_before = harness.fake.log().len();

    let report = sequencer.destroy(OLD, Confirmation::Confirmed).await.unwrap();
    assert_eq!(
        report.steps,
        vec![(StepKind::DestroyOld, StepDisposition::AlreadyDone)]
    );
    assert_eq!(harness.fake.log().len(), commands_before);
}

#[tokio::test]
async fn test_empty_ip_blocks_until_unblocked() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    sequencer.provision(NEW).await.unwrap();

    harness.fake.set_ip("");
    let error = sequencer.verify(NEW, None).await.unwrap_err();
    assert!(matches!(error, WorkflowError::VerificationMismatch { step: StepKind::Verify, .. }));
    assert_eq!(error.exit_code(), exit_code::BLOCKED);

    let run = sequencer.store().load(NEW).await.unwrap();
    match &run.state {
        WorkflowState::Blocked { from, .. } => assert_eq!(**from, WorkflowState::Provisioned),
        other => panic!("expected blocked run, got {other}"),
    }
    assert!(matches!(
        run.attempts.last().map(|a| &a.outcome),
        Some(AttemptOutcome::Blocked { .. })
    ));

    // Blocked runs refuse every step, including the one that failed.
    harness.fake.set_ip(IP);
    let error = sequencer.verify(NEW, None).await.unwrap_err();
    assert!(matches!(error, WorkflowError::Blocked { .. }));
    let error = sequencer.cutover(NEW).await.unwrap_err();
    assert!(matches!(error, WorkflowError::Blocked { .. }));

    let run = sequencer.unblock(NEW).await.unwrap();
    assert_eq!(run.state, WorkflowState::Provisioned);

    let report = sequencer.verify(NEW, None).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::Verified);
    assert_eq!(report.run.workspace.elastic_ip.as_deref(), Some(IP));
}

#[tokio::test]
async fn test_unblock_rejects_runs_that_are_not_blocked() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();

    let error = sequencer.unblock(NEW).await.unwrap_err();
    assert!(matches!(error, WorkflowError::InvalidInvocation(_)));
}

#[tokio::test]
async fn test_unexpected_ip_is_a_verification_mismatch() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    sequencer.provision(NEW).await.unwrap();

    let error = sequencer
        .verify(NEW, Some("198.51.100.7"))
        .await
        .unwrap_err();
    match error {
        WorkflowError::VerificationMismatch { expected, actual, .. } => {
            assert!(expected.contains("198.51.100.7"));
            assert_eq!(actual, IP);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(sequencer.store().load(NEW).await.unwrap().state.is_blocked());
}

#[tokio::test]
async fn test_malformed_expected_ip_is_invalid_invocation() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    sequencer.provision(NEW).await.unwrap();

    let error = sequencer.verify(NEW, Some("not-an-ip")).await.unwrap_err();
    assert_eq!(error.exit_code(), exit_code::INVALID_INVOCATION);
    assert_eq!(
        sequencer.store().load(NEW).await.unwrap().state,
        WorkflowState::Provisioned
    );
}

#[tokio::test]
async fn test_selection_mismatch_during_destroy_blocks() {
    let harness = Harness::new();
    let sequencer = harness.cut_over().await;
    harness.fake.ignore_select(true);

    let error = sequencer
        .destroy(OLD, Confirmation::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(error, WorkflowError::Precondition { step: StepKind::DestroyOld, .. }));
    assert_eq!(error.exit_code(), exit_code::BLOCKED);

    let run = sequencer.store().load(NEW).await.unwrap();
    match &run.state {
        WorkflowState::Blocked { from, .. } => assert_eq!(**from, WorkflowState::CutoverConfirmed),
        other => panic!("expected blocked run, got {other}"),
    }
    assert!(harness.fake.destroyed().is_empty());
    assert_eq!(harness.fake.count("terraform destroy"), 0);
}

#[tokio::test]
async fn test_provision_failure_keeps_state_and_surfaces_output() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    harness.fake.fail_on(
        "terraform apply",
        1,
        "Plan: 3 to add",
        "Error: creating EC2 Instance: InstanceLimitExceeded",
    );

    let error = sequencer.provision(NEW).await.unwrap_err();
    assert_eq!(error.exit_code(), exit_code::EXECUTION_FAILURE);
    let (stdout, stderr) = error.command_output().unwrap();
    assert_eq!(stdout, "Plan: 3 to add");
    assert!(stderr.contains("InstanceLimitExceeded"));

    let run = sequencer.store().load(NEW).await.unwrap();
    assert_eq!(run.state, WorkflowState::WorkspaceCreated);
    assert_eq!(run.last_exit_code, Some(1));
    assert!(run.last_command.as_deref().unwrap().contains("apply"));
    assert!(matches!(
        run.attempts.last().map(|a| &a.outcome),
        Some(AttemptOutcome::Failed { .. })
    ));
    // The playbook never ran after apply failed.
    assert_eq!(harness.fake.count("ansible-playbook"), 0);

    let report = sequencer.provision(NEW).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::Provisioned);
}

#[tokio::test]
async fn test_read_only_queries_are_retried_but_apply_is_not() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();

    harness
        .fake
        .fail_on("workspace show", 1, "", "Error: backend temporarily unavailable");
    sequencer.provision(NEW).await.unwrap();
    assert_eq!(harness.fake.count("workspace show"), 2);
    assert_eq!(harness.fake.count("terraform apply"), 1);

    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    harness.fake.fail_on("terraform apply", 1, "", "Error: state lock");
    sequencer.provision(NEW).await.unwrap_err();
    assert_eq!(harness.fake.count("terraform apply"), 1);
}

#[tokio::test]
async fn test_init_skips_workspace_that_already_exists() {
    let harness = Harness::new();
    harness.fake.add_workspace(NEW);
    let sequencer = harness.sequencer();

    let report = sequencer.init(NEW, Some(OLD)).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::WorkspaceCreated);
    assert_eq!(
        report.steps[1],
        (StepKind::CreateWorkspace, StepDisposition::Skipped)
    );
    assert_eq!(harness.fake.count("workspace new"), 0);
    assert!(matches!(
        report.run.attempts.last().map(|a| &a.outcome),
        Some(AttemptOutcome::Skipped)
    ));
}

#[tokio::test]
async fn test_rerunning_completed_steps_is_a_no_op() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    sequencer.provision(NEW).await.unwrap();
    let commands_before = harness.fake.log().len();

    let report = sequencer.init(NEW, Some(OLD)).await.unwrap();
    assert!(report
        .steps
        .iter()
        .all(|(_, disposition)| *disposition == StepDisposition::AlreadyDone));
    let report = sequencer.provision(NEW).await.unwrap();
    assert_eq!(report.steps, vec![(StepKind::Provision, StepDisposition::AlreadyDone)]);
    assert_eq!(harness.fake.log().len(), commands_before);
}

#[tokio::test]
async fn test_init_with_different_replacement_is_rejected() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();

    let error = sequencer.init(NEW, Some("web-2025-07")).await.unwrap_err();
    assert!(matches!(error, WorkflowError::InvalidInvocation(_)));
}

#[tokio::test]
async fn test_out_of_order_step_is_refused() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    let commands_before = harness.fake.log().len();

    let error = sequencer.cutover(NEW).await.unwrap_err();
    assert!(matches!(
        error,
        WorkflowError::OutOfOrder {
            step: StepKind::Cutover,
            required: WorkflowState::Verified,
            current: WorkflowState::WorkspaceCreated,
            ..
        }
    ));
    assert_eq!(error.exit_code(), exit_code::INVALID_INVOCATION);
    assert_eq!(harness.fake.log().len(), commands_before);
}

#[tokio::test]
async fn test_unknown_workspace_is_invalid_invocation() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();

    let error = sequencer.provision("never-initialized").await.unwrap_err();
    assert!(matches!(
        error,
        WorkflowError::Store(StoreError::NotFound { .. })
    ));
    assert_eq!(error.exit_code(), exit_code::INVALID_INVOCATION);

    let error = sequencer.provision("../escape").await.unwrap_err();
    assert!(matches!(error, WorkflowError::InvalidInvocation(_)));
}

#[tokio::test]
async fn test_interrupted_provision_resumes() {
    let harness = Harness::new();
    harness.sequencer().init(NEW, Some(OLD)).await.unwrap();

    let (trigger, signal) = ShutdownSignal::channel();
    harness.fake.interrupt_on("terraform apply", trigger);
    let error = harness
        .sequencer_with_shutdown(signal)
        .provision(NEW)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        WorkflowError::Interrupted {
            step: StepKind::Provision,
            state: WorkflowState::WorkspaceCreated
        }
    ));
    assert_eq!(error.exit_code(), exit_code::EXECUTION_FAILURE);

    let run = harness.sequencer().store().load(NEW).await.unwrap();
    assert_eq!(run.state, WorkflowState::WorkspaceCreated);
    assert_eq!(run.last_exit_code, None);
    assert!(matches!(
        run.attempts.last().map(|a| &a.outcome),
        Some(AttemptOutcome::Interrupted)
    ));

    // A fresh invocation picks up where the interrupted one stopped.
    let report = harness.sequencer().provision(NEW).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::Provisioned);
}

#[tokio::test]
async fn test_interrupt_at_every_step_never_advances_state() {
    let cases = [
        ("terraform init", WorkflowState::NotStarted),
        ("workspace new", WorkflowState::Initialized),
        ("ansible-playbook", WorkflowState::WorkspaceCreated),
        ("output -raw", WorkflowState::Provisioned),
        ("terraform destroy", WorkflowState::CutoverConfirmed),
    ];

    for (pattern, expected) in cases {
        let harness = Harness::new();
        let (trigger, signal) = ShutdownSignal::channel();
        harness.fake.interrupt_on(pattern, trigger);
        let sequencer = harness.sequencer_with_shutdown(signal);

        let error = async {
            sequencer.init(NEW, Some(OLD)).await?;
            sequencer.provision(NEW).await?;
            sequencer.verify(NEW, None).await?;
            sequencer.cutover(NEW).await?;
            sequencer.destroy(OLD, Confirmation::Confirmed).await
        }
        .await
        .unwrap_err();
        assert!(
            matches!(error, WorkflowError::Interrupted { .. }),
            "{pattern}: {error}"
        );

        let run = sequencer.store().load(NEW).await.unwrap();
        assert_eq!(run.state, expected, "interrupted at {pattern}");

        // Resuming with an uninterrupted invocation finishes the run.
        let resumed = harness.sequencer();
        resumed.init(NEW, Some(OLD)).await.unwrap();
        resumed.provision(NEW).await.unwrap();
        resumed.verify(NEW, None).await.unwrap();
        resumed.cutover(NEW).await.unwrap();
        let report = resumed.destroy(OLD, Confirmation::Confirmed).await.unwrap();
        assert_eq!(report.state(), &WorkflowState::OldDestroyed, "resumed after {pattern}");
        assert_eq!(harness.fake.destroyed(), vec![OLD.to_string()]);
    }
}

#[tokio::test]
async fn test_held_lock_rejects_second_invocation() {
    let harness = Harness::new();
    let sequencer = harness.sequencer();
    sequencer.init(NEW, Some(OLD)).await.unwrap();
    let commands_before = harness.fake.log().len();

    let other = StateStore::new(harness.config.state.directory.clone());
    let mut lock = other.open_lock(NEW).unwrap();
    let guard = lock.acquire().unwrap();

    let error = sequencer.provision(NEW).await.unwrap_err();
    match &error {
        WorkflowError::Store(StoreError::LockContention { workspace, holder }) => {
            assert_eq!(workspace, NEW);
            assert!(holder.contains(&format!("pid {}", std::process::id())));
        }
        other => panic!("expected lock contention, got {other}"),
    }
    assert_eq!(error.exit_code(), exit_code::EXECUTION_FAILURE);
    assert_eq!(harness.fake.log().len(), commands_before);

    drop(guard);
    let report = sequencer.provision(NEW).await.unwrap();
    assert_eq!(report.state(), &WorkflowState::Provisioned);
}

#[tokio::test]
async fn test_status_resolves_run_by_either_workspace() {
    let harness = Harness::new();
    let sequencer = harness.cut_over().await;

    let by_new = sequencer.status(Some(NEW)).await.unwrap();
    let by_old = sequencer.status(Some(OLD)).await.unwrap();
    assert_eq!(by_new, by_old);
    assert_eq!(by_new[0].state, WorkflowState::CutoverConfirmed);

    let all = sequencer.status(None).await.unwrap();
    assert_eq!(all.len(), 1);

    let error = sequencer.status(Some("unknown-ws")).await.unwrap_err();
    assert_eq!(error.exit_code(), exit_code::INVALID_INVOCATION);
}
