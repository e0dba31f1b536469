use crate::output::{self, OutputFormat};
use crate::ConfigCommands;
use anyhow::{Context, Result};
use clusterops_engine::config::EngineConfig;
use std::path::Path;

pub fn handle_config_command(
    command: ConfigCommands,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Sample => {
            print!("{}", EngineConfig::generate_sample());
        }
        ConfigCommands::Show => {
            let config = EngineConfig::load_from(config_path).context("failed to load configuration")?;
            if format == OutputFormat::Table {
                print!("{}", toml::to_string_pretty(&config)?);
            } else {
                output::print_single(&config, format)?;
            }
        }
        ConfigCommands::Validate => {
            let config = EngineConfig::load_from(config_path).context("failed to load configuration")?;
            config.validate().context("invalid configuration")?;
            output::print_success("Configuration is valid");
        }
    }
    Ok(())
}
