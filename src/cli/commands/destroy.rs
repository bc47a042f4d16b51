use super::{print_report, Command};
use crate::workflows::{Confirmation, Sequencer, WorkflowError};

pub struct DestroyCommand {
    pub workspace: String,
    pub confirmation: Confirmation,
}

impl Command for DestroyCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        println!("🔥 Destroying old workspace {}", self.workspace);
        let report = sequencer
            .destroy(&self.workspace, self.confirmation)
            .await?;
        print_report(&report);
        Ok(())
    }
}
