use crate::workflows::{Sequencer, StepDisposition, StepReport, WorkflowError};

pub mod config;
pub mod cutover;
pub mod destroy;
pub mod init;
pub mod provision;
pub mod status;
pub mod unblock;
pub mod verify;

pub use config::ConfigCommand;
pub use cutover::CutoverCommand;
pub use destroy::DestroyCommand;
pub use init::InitCommand;
pub use provision::ProvisionCommand;
pub use status::StatusCommand;
pub use unblock::UnblockCommand;
pub use verify::VerifyCommand;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError>;
}

/// Prints what each step did and where the run ended up.
pub fn print_report(report: &StepReport) {
    for (step, disposition) in &report.steps {
        match disposition {
            StepDisposition::Ran => println!("✅ {step}"),
            StepDisposition::Skipped => println!("⏭️  {step} (already satisfied, nothing run)"),
            StepDisposition::AlreadyDone => println!("✔️  {step} (already completed)"),
        }
    }
    println!("📍 {} is now at {}", report.run.name(), report.run.state);
}

/// Prints an error, including captured command output verbatim.
pub fn print_error(error: &WorkflowError) {
    eprintln!("❌ {error}");
    if let Some((stdout, stderr)) = error.command_output() {
        for (label, text) in [("stdout", stdout), ("stderr", stderr)] {
            if text.is_empty() {
                continue;
            }
            eprintln!("--- {label} ---");
            eprint!("{text}");
            if !text.ends_with('\n') {
                eprintln!();
            }
        }
    }
}
