use super::Command;
use crate::workflows::{Sequencer, WorkflowError};

pub struct UnblockCommand {
    pub workspace: String,
}

impl Command for UnblockCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        let run = sequencer.unblock(&self.workspace).await?;
        println!("🔓 {} released, back at {}", run.name(), run.state);
        Ok(())
    }
}
