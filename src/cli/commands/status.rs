use super::Command;
use crate::workflows::{AttemptOutcome, Sequencer, StepKind, WorkflowError, WorkflowRun};

pub struct StatusCommand {
    pub workspace: Option<String>,
    pub json: bool,
}

impl Command for StatusCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        let runs = sequencer.status(self.workspace.as_deref()).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&runs)?);
            return Ok(());
        }

        if runs.is_empty() {
            println!("📋 No workflow runs recorded in {}", sequencer.store().directory().display());
            println!("   → Start one: infra-cutover init --workspace <name> --replaces <old>");
            return Ok(());
        }

        for run in &runs {
            print_run(run);
        }
        Ok(())
    }
}

fn print_run(run: &WorkflowRun) {
    println!("📦 {} ({})", run.name(), run.state);
    println!("   run id:     {}", run.run_id);
    if let Some(previous) = run.previous_name() {
        println!("   replaces:   {previous}");
    }
    println!(
        "   active:     {}",
        run.active_workspace.as_deref().unwrap_or("none")
    );
    if let Some(ip) = &run.workspace.elastic_ip {
        println!("   elastic ip: {ip}");
    }
    println!("   started:    {}", run.started_at.to_rfc3339());
    println!("   updated:    {}", run.updated_at.to_rfc3339());
    if let Some(command) = &run.last_command {
        let code = run
            .last_exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("   last cmd:   {command} (exit {code})");
    }
    if let Some(attempt) = run.attempts.last() {
        let outcome = match &attempt.outcome {
            AttemptOutcome::Succeeded => "succeeded".to_string(),
            AttemptOutcome::Skipped => "skipped".to_string(),
            AttemptOutcome::Interrupted => "interrupted".to_string(),
            AttemptOutcome::Failed { error } => format!("failed: {error}"),
            AttemptOutcome::Rejected { reason } => format!("rejected: {reason}"),
            AttemptOutcome::Blocked { reason } => format!("blocked: {reason}"),
        };
        println!("   last step:  {} {outcome}", attempt.step);
    }
    if let Some(hint) = next_hint(run) {
        println!("   next:       {hint}");
    }
    println!();
}

/// What the operator should do next, or `None` once the run is finished.
fn next_hint(run: &WorkflowRun) -> Option<String> {
    if run.state.is_terminal() {
        return run.state.is_blocked().then(|| {
            format!(
                "fix the problem by hand, then infra-cutover unblock --workspace {}",
                run.name()
            )
        });
    }
    let step = StepKind::ALL
        .into_iter()
        .find(|step| step.from_state() == run.state)?;
    let name = run.name();
    Some(match step {
        StepKind::Init | StepKind::CreateWorkspace => match run.previous_name() {
            Some(previous) => format!("infra-cutover init --workspace {name} --replaces {previous}"),
            None => format!("infra-cutover init --workspace {name}"),
        },
        StepKind::Provision => format!("infra-cutover provision --workspace {name}"),
        StepKind::Verify => format!("infra-cutover verify --workspace {name}"),
        StepKind::Cutover => format!("point DNS at the new IP, then infra-cutover cutover --workspace {name}"),
        StepKind::DestroyOld => format!(
            "infra-cutover destroy --workspace {} --confirm",
            run.previous_name().unwrap_or("<old>")
        ),
    })
}
