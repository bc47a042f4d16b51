use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "infra-cutover")]
#[command(about = "Resumable provision, verify, cutover and destroy workflow for Terraform workspaces")]
#[command(long_about = "infra-cutover sequences terraform and playbook runs for replacing a production \
                       server: create a new workspace, provision and verify it, record the DNS cutover, \
                       then destroy the old workspace. Progress is saved after every step so re-running \
                       a command resumes instead of repeating work.")]
pub struct Cli {
    /// Config file (default: ./infra-cutover.toml when present)
    #[arg(long, global = true, help = "Path to a TOML config file")]
    pub config: Option<PathBuf>,

    /// Directory for run state and lock files
    #[arg(long, global = true, help = "Override state.directory from config")]
    pub state_dir: Option<PathBuf>,

    /// Per-step timeout in seconds
    #[arg(
        long,
        global = true,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Timeout for each step's commands, in seconds"
    )]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run terraform init and create the new workspace
    Init {
        /// New workspace name, e.g. web-2026-10-19
        #[arg(long, help = "Name of the workspace to create")]
        workspace: String,
        /// Workspace this deployment replaces
        #[arg(long, help = "Existing workspace to decommission after cutover")]
        replaces: Option<String>,
    },
    /// Run the provisioning commands (terraform apply, playbook) in the workspace
    Provision {
        #[arg(long, help = "Workspace created by `init`")]
        workspace: String,
    },
    /// Check the selected workspace and its IP output
    Verify {
        #[arg(long, help = "Workspace to verify")]
        workspace: String,
        /// Expected elastic IP; without it any valid IP passes
        #[arg(long, help = "IP address the ip output must equal")]
        expected_ip: Option<String>,
    },
    /// Record that DNS now points at the new workspace
    Cutover {
        #[arg(long, help = "Workspace now serving traffic")]
        workspace: String,
    },
    /// Destroy the old workspace after cutover
    Destroy {
        /// Old workspace to destroy
        #[arg(long, help = "Workspace to destroy (the one replaced at cutover)")]
        workspace: String,
        /// Required: confirms the destructive step
        #[arg(long, help = "Confirm destruction; the command refuses without it")]
        confirm: bool,
    },
    /// Show recorded workflow runs
    Status {
        #[arg(long, help = "Only show the run owning this workspace")]
        workspace: Option<String>,
        #[arg(long, help = "Print runs as JSON")]
        json: bool,
    },
    /// Release a blocked run after fixing the problem by hand
    Unblock {
        #[arg(long, help = "Blocked workspace to release")]
        workspace: String,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this path, e.g. to start an infra-cutover.toml
        #[arg(long, help = "Write the effective configuration to a file")]
        write: Option<PathBuf>,
    },
}
