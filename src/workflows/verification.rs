//! Expected-vs-actual checks gating steps.
//!
//! A check never repairs anything: a mismatch is reported and the sequencer
//! decides whether the run is rejected or blocked.

use std::fmt;
use std::net::IpAddr;

use crate::external::{CommandError, TerraformClient};

use super::run::WorkflowRun;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Equals(String),
    NonEmpty,
    IpAddress,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Equals(value) => write!(f, "{value:?}"),
            Expectation::NonEmpty => write!(f, "a non-empty value"),
            Expectation::IpAddress => write!(f, "an IP address"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Match,
    Mismatch { expected: String, actual: String },
}

impl CheckOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, CheckOutcome::Match)
    }
}

/// Compares trimmed `actual` output against an expectation.
pub fn compare(expectation: &Expectation, actual: &str) -> CheckOutcome {
    let actual = actual.trim();
    let matched = match expectation {
        Expectation::Equals(expected) => actual == expected.trim(),
        Expectation::NonEmpty => !actual.is_empty(),
        Expectation::IpAddress => actual.parse::<IpAddr>().is_ok(),
    };
    if matched {
        CheckOutcome::Match
    } else {
        CheckOutcome::Mismatch {
            expected: expectation.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// A live check against Terraform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// `terraform workspace show` must print this name.
    SelectedWorkspace(String),
    /// `terraform workspace list` must include this name.
    WorkspaceExists(String),
    /// `terraform output -raw <name>` must satisfy the expectation.
    Output {
        name: String,
        expectation: Expectation,
    },
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::SelectedWorkspace(name) => write!(f, "selected workspace is {name}"),
            Check::WorkspaceExists(name) => write!(f, "workspace {name} exists"),
            Check::Output { name, expectation } => write!(f, "output {name} is {expectation}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub check: Check,
    pub actual: String,
    pub outcome: CheckOutcome,
}

impl Check {
    pub async fn evaluate(&self, terraform: &TerraformClient) -> Result<CheckReport, CommandError> {
        let (actual, outcome) = match self {
            Check::SelectedWorkspace(expected) => {
                let actual = terraform.selected_workspace().await?;
                let outcome = compare(&Expectation::Equals(expected.clone()), &actual);
                (actual, outcome)
            }
            Check::WorkspaceExists(expected) => {
                let listed = terraform.list_workspaces().await?;
                let outcome = if listed.iter().any(|name| name == expected) {
                    CheckOutcome::Match
                } else {
                    CheckOutcome::Mismatch {
                        expected: format!("{expected} in workspace list"),
                        actual: listed.join(", "),
                    }
                };
                (listed.join(", "), outcome)
            }
            Check::Output { name, expectation } => {
                let actual = terraform.output_raw(name).await?;
                let outcome = compare(expectation, &actual);
                (actual, outcome)
            }
        };
        Ok(CheckReport {
            check: self.clone(),
            actual,
            outcome,
        })
    }
}

/// Static destroy gate, evaluated before anything runs: the target must be
/// the run's previous workspace and must not be the one serving traffic.
pub fn check_destroy_target(run: &WorkflowRun, target: &str) -> Result<(), String> {
    if run.is_active(target) {
        return Err(format!(
            "{target} is the active workspace; refusing to destroy it"
        ));
    }
    match run.previous_name() {
        Some(previous) if previous == target => Ok(()),
        Some(previous) => Err(format!(
            "{target} is not the workspace being replaced by {} (expected {previous})",
            run.name()
        )),
        None => Err(format!(
            "run {} does not replace any workspace; nothing to destroy",
            run.name()
        )),
    }
}
