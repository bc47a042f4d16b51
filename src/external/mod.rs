//! External tool abstractions
//!
//! Trait-based wrappers around the CLIs the workflow drives (Terraform, and
//! whatever playbook runner the step templates name), so the sequencer can be
//! tested with scripted executors instead of real infrastructure.

pub mod command;
pub mod terraform;

pub use command::{
    execute_read_only, CommandError, CommandExecutor, CommandInvocation, CommandOutput,
    ProcessCommandExecutor,
};
pub use terraform::TerraformClient;
