//! Terraform CLI wrapper for the queries the workflow checks rely on.
//!
//! Mutating commands (init, apply, destroy, ...) are rendered from the step
//! templates in config; this client only covers workspace selection and the
//! read-only lookups used by pre/postconditions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::command::{execute_read_only, CommandError, CommandExecutor, CommandInvocation};

#[derive(Clone)]
pub struct TerraformClient {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    working_dir: Option<PathBuf>,
    read_only_retries: u32,
    timeout: Option<Duration>,
}

impl TerraformClient {
    pub fn new(executor: Arc<dyn CommandExecutor>, binary: impl Into<String>) -> Self {
        Self {
            executor,
            binary: binary.into(),
            working_dir: None,
            read_only_retries: 1,
            timeout: None,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_read_only_retries(mut self, retries: u32) -> Self {
        self.read_only_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn invocation<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> CommandInvocation {
        CommandInvocation::new(self.binary.clone())
            .args(args)
            .working_dir(self.working_dir.clone())
            .timeout(self.timeout)
    }

    /// `terraform workspace select <name>`. Changes local selection only, so it
    /// runs before checks but is not retried.
    pub fn select_invocation(&self, workspace: &str) -> CommandInvocation {
        self.invocation(["workspace", "select", workspace])
    }

    /// Name of the currently selected workspace.
    pub async fn selected_workspace(&self) -> Result<String, CommandError> {
        let invocation = self.invocation(["workspace", "show"]);
        let output =
            execute_read_only(self.executor.as_ref(), &invocation, self.read_only_retries).await?;
        let selected = output.stdout.trim().to_string();
        debug!(selected = %selected, "Resolved selected terraform workspace");
        Ok(selected)
    }

    /// All workspace names known to the backend, selection marker stripped.
    pub async fn list_workspaces(&self) -> Result<Vec<String>, CommandError> {
        let invocation = self.invocation(["workspace", "list"]);
        let output =
            execute_read_only(self.executor.as_ref(), &invocation, self.read_only_retries).await?;
        Ok(parse_workspace_list(&output.stdout))
    }

    /// Raw value of a root module output, e.g. the elastic IP.
    pub async fn output_raw(&self, name: &str) -> Result<String, CommandError> {
        let invocation = self.invocation(["output", "-raw", name]);
        let output =
            execute_read_only(self.executor.as_ref(), &invocation, self.read_only_retries).await?;
        Ok(output.stdout.trim().to_string())
    }
}

fn parse_workspace_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
