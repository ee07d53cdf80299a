//! Configuration shared by every command.

use std::path::PathBuf;

use clap::Args;
use patchup::config::default_config_path;
use patchup::UpdaterConfig;

use crate::error::CliError;

/// Options accepted by every command.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory to update, overriding the configuration
    #[arg(short = 'd', long, global = true)]
    pub update_dir: Option<PathBuf>,

    /// Server base URL; repeat for failover, replaces configured servers
    #[arg(short, long = "server", global = true)]
    pub servers: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl GlobalArgs {
    /// Resolve the configuration: explicit file > default file > defaults,
    /// then command-line overrides.
    pub fn resolve_config(&self) -> Result<UpdaterConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => UpdaterConfig::load(path)?,
            None => {
                let path = default_config_path();
                if path.is_file() {
                    UpdaterConfig::load(&path)?
                } else {
                    UpdaterConfig::default()
                }
            }
        };

        if let Some(dir) = &self.update_dir {
            config.update_dir = dir.clone();
            config.program_dir = dir.clone();
        }
        if !self.servers.is_empty() {
            config.servers = self.servers.clone();
        }

        if config.servers.is_empty() {
            return Err(CliError::Config(
                "no servers configured. Set urls in [servers] or use --server".to_string(),
            ));
        }
        Ok(config)
    }
}
