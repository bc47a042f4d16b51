use super::{print_report, Command};
use crate::workflows::{Sequencer, WorkflowError};

pub struct VerifyCommand {
    pub workspace: String,
    pub expected_ip: Option<String>,
}

impl Command for VerifyCommand {
    async fn execute(&self, sequencer: &Sequencer) -> Result<(), WorkflowError> {
        println!("🔍 Verifying {}", self.workspace);
        let report = sequencer
            .verify(&self.workspace, self.expected_ip.as_deref())
            .await?;
        print_report(&report);
        if let Some(ip) = &report.run.workspace.elastic_ip {
            println!("🌐 Elastic IP: {ip}");
            println!();
            println!(
                "👉 Point DNS at {ip}, then: infra-cutover cutover --workspace {}",
                self.workspace
            );
        }
        Ok(())
    }
}
