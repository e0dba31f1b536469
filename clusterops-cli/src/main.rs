//! Clusterops CLI
//!
//! Command-line interface for scaling and upgrading Kubernetes clusters

mod commands;
mod config;
mod engine;
mod output;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use clusterops_engine::config::EngineConfig;
use std::path::PathBuf;

use output::OutputFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long)]
    output: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scale an agent pool to a node count
    Scale {
        /// Cluster name
        cluster: String,
        /// Agent pool name
        #[arg(short, long)]
        pool: String,
        /// Desired node count
        #[arg(short = 'n', long)]
        count: u32,
    },
    /// Upgrade every node of a cluster to a Kubernetes version
    Upgrade {
        /// Cluster name
        cluster: String,
        /// Target Kubernetes version
        #[arg(short, long)]
        to: String,
        /// Upper bound on each node replacement, in minutes
        #[arg(long)]
        step_timeout: Option<u64>,
        /// Validate and print the plan without touching the cluster
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List the versions a cluster can be upgraded to
    Upgrades {
        /// Cluster name
        cluster: String,
    },
    /// Show the deployed state of every pool and any drift from the specification
    Status {
        /// Cluster name
        cluster: String,
    },
    /// List stored clusters
    List,
    /// Engine configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print a sample configuration file
    Sample,
    /// Print the effective configuration
    Show,
    /// Check the effective configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load CLI preferences
    let cli_config = config::Config::load().unwrap_or_default();
    let format = OutputFormat::from_str(
        cli.output
            .as_deref()
            .unwrap_or(cli_config.default_output.as_str()),
    );

    let config_path = cli.config.clone().or(cli_config.engine_config.clone());

    match cli.command {
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
        Commands::Config { command } => {
            commands::config::handle_config_command(command, config_path.as_deref(), format)?
        }
        command => {
            let engine_config = EngineConfig::load_from(config_path.as_deref())
                .context("failed to load configuration")?;
            engine_config
                .validate()
                .context("invalid configuration")?;

            let _log_guard = engine_config
                .logging
                .init()
                .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

            tracing::debug!(config = ?config_path, "Engine configuration loaded");

            let engine = engine::Engine::new(engine_config).await?;
            run(command, &engine, format).await?;
        }
    }

    Ok(())
}

async fn run(command: Commands, engine: &engine::Engine, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Scale {
            cluster,
            pool,
            count,
        } => commands::scale::handle_scale_command(engine, &cluster, &pool, count, format).await,
        Commands::Upgrade {
            cluster,
            to,
            step_timeout,
            dry_run,
            yes,
        } => {
            let options = commands::upgrade::UpgradeArgs {
                target: to,
                step_timeout,
                dry_run,
                assume_yes: yes,
            };
            commands::upgrade::handle_upgrade_command(engine, &cluster, options, format).await
        }
        Commands::Upgrades { cluster } => {
            commands::upgrade::handle_upgrades_command(engine, &cluster, format).await
        }
        Commands::Status { cluster } => {
            commands::status::handle_status_command(engine, &cluster, format).await
        }
        Commands::List => commands::status::handle_list_command(engine, format).await,
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scale() {
        let cli = Cli::parse_from(["clusterops", "scale", "prod", "--pool", "agentpool1", "-n", "5"]);
        match cli.command {
            Commands::Scale { cluster, pool, count } => {
                assert_eq!(cluster, "prod");
                assert_eq!(pool, "agentpool1");
                assert_eq!(count, 5);
            }
            _ => panic!("expected scale"),
        }
    }

    #[test]
    fn test_parse_upgrade() {
        let cli = Cli::parse_from([
            "clusterops",
            "-o",
            "json",
            "upgrade",
            "prod",
            "--to",
            "1.11.0",
            "--step-timeout",
            "30",
            "--dry-run",
        ]);
        assert_eq!(cli.output.as_deref(), Some("json"));
        match cli.command {
            Commands::Upgrade {
                to,
                step_timeout,
                dry_run,
                yes,
                ..
            } => {
                assert_eq!(to, "1.11.0");
                assert_eq!(step_timeout, Some(30));
                assert!(dry_run);
                assert!(!yes);
            }
            _ => panic!("expected upgrade"),
        }
    }
}
