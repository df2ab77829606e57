//! Configuration management CLI commands.

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use plexus_core::error::AppError;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (file plus environment)
    Show,
    /// Validate the configuration file
    Validate,
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config/generated.toml")]
        output: String,
    },
}

/// Execute config commands
pub async fn execute(
    args: &ConfigArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        ConfigCommand::Show => {
            let config = super::load_config(config_path)?;
            output::print_item(&config, format);
        }
        ConfigCommand::Validate => match super::load_config(config_path) {
            Ok(config) => {
                output::print_success(&format!("Configuration '{config_path}' is valid"));
                output::print_kv("Framework version", &config.runtime.framework_version);
                output::print_kv("Plugin directory", &config.plugins.directory);
                output::print_kv(
                    "Denied capabilities",
                    &config
                        .plugins
                        .denied_capabilities
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                output::print_kv("Storage backend", &format!("{:?}", config.storage.backend));
                output::print_kv(
                    "Async topics",
                    &config
                        .events
                        .async_topics
                        .iter()
                        .map(|t| t.topic.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
            Err(e) => {
                output::print_error(&format!("Configuration invalid: {e}"));
                return Err(e);
            }
        },
        ConfigCommand::Generate { output: out_path } => {
            let default_config = include_str!("../../../../config/default.toml");

            if let Some(parent) = std::path::Path::new(out_path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AppError::internal(format!("Failed to create dir: {e}")))?;
            }

            tokio::fs::write(out_path, default_config)
                .await
                .map_err(|e| AppError::internal(format!("Failed to write config: {e}")))?;

            output::print_success(&format!("Default config written to '{out_path}'"));
        }
    }

    Ok(())
}
