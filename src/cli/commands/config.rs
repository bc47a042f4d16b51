use anyhow::Result;
use std::path::PathBuf;

use crate::config::CutoverConfig;

/// Shows the configuration after file, environment and flag layering.
pub struct ConfigCommand {
    pub write: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn execute(&self, config: &CutoverConfig) -> Result<()> {
        print!("{}", config.to_toml_string()?);
        if let Some(path) = &self.write {
            config.save_to_file(path)?;
            eprintln!("💾 Wrote configuration to {}", path.display());
        }
        Ok(())
    }
}
