use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::CutoverConfig;
use crate::external::CommandInvocation;

use super::state_machine::StepKind;
use super::verification::{Check, Expectation};

/// Operator confirmation for destructive steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    #[default]
    NotConfirmed,
}

impl Confirmation {
    pub fn from_flag(confirmed: bool) -> Self {
        if confirmed {
            Confirmation::Confirmed
        } else {
            Confirmation::NotConfirmed
        }
    }
}

/// One argv with `{terraform}`, `{workspace}` and `{target}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(pub Vec<String>);

impl CommandTemplate {
    pub fn from_slice(parts: &[&str]) -> Self {
        Self(parts.iter().map(|s| s.to_string()).collect())
    }

    /// Renders the template. An empty template renders to `None`.
    pub fn render(&self, vars: &TemplateVars<'_>) -> Option<CommandInvocation> {
        let mut parts = self.0.iter().map(|part| vars.substitute(part));
        let program = parts.next()?;
        Some(CommandInvocation::new(program).args(parts))
    }
}

pub struct TemplateVars<'a> {
    pub terraform: &'a str,
    pub workspace: &'a str,
    pub target: Option<&'a str>,
}

impl TemplateVars<'_> {
    fn substitute(&self, part: &str) -> String {
        let rendered = part
            .replace("{terraform}", self.terraform)
            .replace("{workspace}", self.workspace);
        match self.target {
            Some(target) => rendered.replace("{target}", target),
            None => rendered,
        }
    }
}

/// A step ready to execute: rendered commands plus the checks around them.
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    /// Workspace to `terraform workspace select` before the precondition.
    pub select: Option<String>,
    pub precondition: Option<Check>,
    pub commands: Vec<CommandInvocation>,
    pub postcondition: Option<Check>,
    /// Treat an already-satisfied postcondition as done without running.
    pub skip_if_satisfied: bool,
    /// Refused unless the invocation carries `Confirmation::Confirmed`.
    pub destructive: bool,
    pub timeout: Option<Duration>,
}

/// Inputs that vary per invocation.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    pub target: Option<String>,
    pub expected_ip: Option<String>,
    pub timeout_override: Option<Duration>,
    pub confirmation: Confirmation,
}

impl Step {
    pub fn plan(kind: StepKind, workspace: &str, config: &CutoverConfig, inputs: &StepInputs) -> Self {
        let timeout = inputs
            .timeout_override
            .or_else(|| config.execution.timeout_for(kind));
        let vars = TemplateVars {
            terraform: &config.terraform.binary,
            workspace,
            target: inputs.target.as_deref(),
        };
        let working_dir: Option<PathBuf> = config.terraform.working_dir.clone();
        let commands = config
            .templates_for(kind)
            .iter()
            .filter_map(|template| template.render(&vars))
            .map(|invocation| {
                invocation
                    .working_dir(working_dir.clone())
                    .timeout(timeout)
            })
            .collect();

        let mut step = Step {
            kind,
            select: None,
            precondition: None,
            commands,
            postcondition: None,
            skip_if_satisfied: false,
            destructive: kind.is_destructive(),
            timeout,
        };

        match kind {
            StepKind::Init | StepKind::Cutover => {}
            StepKind::CreateWorkspace => {
                step.postcondition = Some(Check::WorkspaceExists(workspace.to_string()));
                step.skip_if_satisfied = true;
            }
            StepKind::Provision => {
                step.select = Some(workspace.to_string());
                step.precondition = Some(Check::SelectedWorkspace(workspace.to_string()));
            }
            StepKind::Verify => {
                step.select = Some(workspace.to_string());
                step.precondition = Some(Check::SelectedWorkspace(workspace.to_string()));
                let expectation = match &inputs.expected_ip {
                    Some(ip) => Expectation::Equals(ip.clone()),
                    None => Expectation::IpAddress,
                };
                step.postcondition = Some(Check::Output {
                    name: config.terraform.ip_output.clone(),
                    expectation,
                });
            }
            StepKind::DestroyOld => {
                if let Some(target) = &inputs.target {
                    step.select = Some(target.clone());
                    step.precondition = Some(Check::SelectedWorkspace(target.clone()));
                }
            }
        }
        step
    }
}
