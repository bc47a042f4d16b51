use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use infra_cutover::cli::commands::{
    print_error, Command, ConfigCommand, CutoverCommand, DestroyCommand, InitCommand, ProvisionCommand,
    StatusCommand, UnblockCommand, VerifyCommand,
};
use infra_cutover::cli::{Cli, Commands};
use infra_cutover::external::ProcessCommandExecutor;
use infra_cutover::workflows::{exit_code, Confirmation, Sequencer};
use infra_cutover::{init_telemetry, CutoverConfig, ShutdownSignal};
use tracing::info;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => exit(exit_code::INVALID_INVOCATION),
            };
        }
    };

    match run(cli) {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("❌ {e:#}");
            exit(exit_code::INVALID_INVOCATION)
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> Result<i32> {
    let Cli {
        config: config_path,
        state_dir,
        timeout,
        command,
    } = cli;

    let env_file_loaded = CutoverConfig::load_env_file()?;
    let mut config = CutoverConfig::load(config_path.as_deref())?;
    if let Some(dir) = state_dir {
        config.state.directory = dir;
    }
    init_telemetry(&config.observability)?;
    if env_file_loaded {
        info!("Loaded environment variables from .env file");
    }

    if let Commands::Config { write } = &command {
        ConfigCommand {
            write: write.clone(),
        }
        .execute(&config)?;
        return Ok(exit_code::SUCCESS);
    }

    // One run, one step at a time: a single-threaded runtime is all we need.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let sequencer = Sequencer::new(Arc::new(ProcessCommandExecutor), config)
            .with_shutdown(ShutdownSignal::install_ctrl_c())
            .with_timeout_override(timeout.map(Duration::from_secs));

        let result = match command {
            Commands::Init {
                workspace,
                replaces,
            } => {
                InitCommand::new(workspace)
                    .with_replaces(replaces)
                    .execute(&sequencer)
                    .await
            }
            Commands::Provision { workspace } => {
                ProvisionCommand { workspace }.execute(&sequencer).await
            }
            Commands::Verify {
                workspace,
                expected_ip,
            } => {
                VerifyCommand {
                    workspace,
                    expected_ip,
                }
                .execute(&sequencer)
                .await
            }
            Commands::Cutover { workspace } => {
                CutoverCommand { workspace }.execute(&sequencer).await
            }
            Commands::Destroy { workspace, confirm } => {
                DestroyCommand {
                    workspace,
                    confirmation: Confirmation::from_flag(confirm),
                }
                .execute(&sequencer)
                .await
            }
            Commands::Status { workspace, json } => {
                StatusCommand { workspace, json }.execute(&sequencer).await
            }
            Commands::Unblock { workspace } => {
                UnblockCommand { workspace }.execute(&sequencer).await
            }
            Commands::Config { .. } => Ok(()),
        };

        Ok(match result {
            Ok(()) => exit_code::SUCCESS,
            Err(error) => {
                print_error(&error);
                error.exit_code()
            }
        })
    })
}
