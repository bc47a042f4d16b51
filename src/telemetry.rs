use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize structured logging on stderr.
///
/// `RUST_LOG` wins over the configured level; stdout is left to the
/// operator-facing command output.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::debug!("infra-cutover telemetry initialized");
    Ok(())
}

/// Create a span carrying the run's correlation id for one step
pub fn create_workflow_span(step: &str, workspace: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow_step",
        step = step,
        workspace = workspace,
        run.id = run_id,
    )
}
