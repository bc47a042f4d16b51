use super::{print_report, Command};
use crate::workflows::{Sequencer, WorkflowError};

pub struct CutoverCommand {
    pub workspace: String,
}

impl Command for CutoverCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        let report = sequencer.cutover(&self.workspace).await?;
        print_report(&report);
        if let Some(old) = report.run.previous_name() {
            println!();
            println!("👉 Once traffic has drained: infra-cutover destroy --workspace {old} --confirm");
        }
        Ok(())
    }
}
