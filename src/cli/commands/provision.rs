use super::{print_report, Command};
use crate::workflows::{Sequencer, WorkflowError};

pub struct ProvisionCommand {
    pub workspace: String,
}

impl Command for ProvisionCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        println!("🚀 Provisioning {}", self.workspace);
        let report = sequencer.provision(&self.workspace).await?;
        print_report(&report);
        println!();
        println!("👉 Next: infra-cutover verify --workspace {}", self.workspace);
        Ok(())
    }
}
