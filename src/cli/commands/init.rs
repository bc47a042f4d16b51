use super::{print_report, Command};
use crate::workflows::{Sequencer, WorkflowError};

pub struct InitCommand {
    pub workspace: String,
    pub replaces: Option<String>,
}

impl InitCommand {
    pub fn new(workspace: String) -> Self {
        Self {
            workspace,
            replaces: None,
        }
    }

    pub fn with_replaces(mut self, replaces: Option<String>) -> Self {
        self.replaces = replaces;
        self
    }
}

impl Command for InitCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        match &self.replaces {
            Some(old) => println!("🏗️  Initializing {} (replacing {old})", self.workspace),
            None => println!("🏗️  Initializing {}", self.workspace),
        }
        let report = sequencer
            .init(&self.workspace, self.replaces.as_deref())
            .await?;
        print_report(&report);
        println!();
        println!("👉 Next: infra-cutover provision --workspace {}", self.workspace);
        Ok(())
    }
}
