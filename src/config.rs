use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::workflows::state_machine::StepKind;
use crate::workflows::steps::CommandTemplate;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "infra-cutover.toml";

/// Main configuration structure for infra-cutover
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CutoverConfig {
    /// Terraform binary and root module location
    pub terraform: TerraformConfig,
    /// Command templates for each workflow step
    pub steps: StepCommandsConfig,
    /// Where run state and lock files live
    pub state: StateConfig,
    /// Timeouts and retry policy
    pub execution: ExecutionConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TerraformConfig {
    /// Binary name or path, substituted for `{terraform}` in templates
    pub binary: String,
    /// Root module directory; commands run here
    pub working_dir: Option<PathBuf>,
    /// Name of the output holding the server's elastic IP
    pub ip_output: String,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            working_dir: None,
            ip_output: "elastic_ip".to_string(),
        }
    }
}

/// Per-step command templates. Each entry is one argv; `{terraform}`,
/// `{workspace}` and `{target}` are substituted when the step runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StepCommandsConfig {
    pub init: Vec<CommandTemplate>,
    pub create_workspace: Vec<CommandTemplate>,
    pub provision: Vec<CommandTemplate>,
    pub destroy: Vec<CommandTemplate>,
}

impl Default for StepCommandsConfig {
    fn default() -> Self {
        Self {
            init: vec![CommandTemplate::from_slice(&["{terraform}", "init", "-input=false"])],
            create_workspace: vec![CommandTemplate::from_slice(&[
                "{terraform}",
                "workspace",
                "new",
                "{workspace}",
            ])],
            provision: vec![
                CommandTemplate::from_slice(&[
                    "{terraform}",
                    "apply",
                    "-auto-approve",
                    "-input=false",
                ]),
                CommandTemplate::from_slice(&[
                    "ansible-playbook",
                    "-i",
                    "inventory/{workspace}.ini",
                    "site.yml",
                ]),
            ],
            destroy: vec![
                CommandTemplate::from_slice(&[
                    "{terraform}",
                    "destroy",
                    "-auto-approve",
                    "-input=false",
                ]),
                CommandTemplate::from_slice(&["{terraform}", "workspace", "select", "{workspace}"]),
                CommandTemplate::from_slice(&["{terraform}", "workspace", "delete", "{target}"]),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `<workspace>.state.json` and `<workspace>.lock`
    pub directory: PathBuf,
    /// Attempt/transition records kept per run
    pub max_history_entries: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".infra-cutover"),
            max_history_entries: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout applied to every step's commands; unset means wait forever
    pub step_timeout_seconds: Option<u64>,
    /// Per-step overrides keyed by step name (`provision`, `destroy-old`, ...)
    pub step_timeouts: HashMap<String, u64>,
    /// Extra attempts for read-only terraform queries
    pub read_only_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_seconds: None,
            step_timeouts: HashMap::new(),
            read_only_retries: 1,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout_for(&self, step: StepKind) -> Option<Duration> {
        self.step_timeouts
            .get(step.name())
            .copied()
            .or(self.step_timeout_seconds)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json_logs: false,
        }
    }
}

impl CutoverConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`infra-cutover.toml`, or the explicit path)
    /// 3. Environment variables (prefixed with INFRA_CUTOVER__)
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match explicit_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {} does not exist", path.display());
                }
                builder = builder.add_source(File::from(path));
            }
            None => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("INFRA_CUTOVER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: CutoverConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Load `.env` from the working directory if it exists.
    ///
    /// Runs before logging is set up (it feeds the config that configures
    /// logging), so it reports whether a file was loaded instead of logging.
    pub fn load_env_file() -> Result<bool> {
        Self::load_env_file_from(Path::new(".env"))
    }

    pub fn load_env_file_from(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        dotenvy::from_path(path)?;
        Ok(true)
    }

    pub fn templates_for(&self, step: StepKind) -> &[CommandTemplate] {
        match step {
            StepKind::Init => &self.steps.init,
            StepKind::CreateWorkspace => &self.steps.create_workspace,
            StepKind::Provision => &self.steps.provision,
            StepKind::DestroyOld => &self.steps.destroy,
            StepKind::Verify | StepKind::Cutover => &[],
        }
    }
}
