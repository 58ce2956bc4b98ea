//! Medallion CLI: run the bronze/silver/gold batch pipeline stage by stage.
//!
//! Every stage is a standalone subcommand with no required arguments;
//! `run` executes them all in order.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Medallion: bronze/silver/gold batch data pipeline
#[derive(Parser, Debug)]
#[command(name = "medallion", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (config file, data and logs live here)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path (defaults to <workspace>/medallion.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Command-line values applied on top of the layered configuration.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Data directory holding incoming/, bronze/, silver/ and gold/
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// Number of batches to generate
    #[arg(long, global = true)]
    pub batches: Option<usize>,

    /// Seed for generation and the train/test split
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Fraction of gold rows assigned to the test partition
    #[arg(long, global = true)]
    pub test_size: Option<f64>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Write synthetic batch files into incoming/
    Generate,
    /// Ingest new incoming batches into the bronze table
    Ingest,
    /// Validate bronze rows into silver accepted/rejected tables
    Validate,
    /// Derive feature columns from the silver table
    Transform,
    /// Build the gold table and its train/test split
    Gold,
    /// Run every stage in order
    Run {
        /// Skip the generate stage and use whatever is in incoming/
        #[arg(long)]
        no_generate: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default medallion.toml into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = workspace.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "medallion.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    tracing::debug!(workspace = %workspace.display(), "Resolved workspace");

    commands::handle_command(
        cli.command,
        &workspace,
        cli.config.as_deref(),
        &cli.overrides,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stage_subcommands_need_no_arguments() {
        for stage in ["generate", "ingest", "validate", "transform", "gold", "run"] {
            let cli = Cli::try_parse_from(["medallion", stage]).unwrap();
            assert_eq!(cli.workspace, PathBuf::from("."));
            assert!(cli.overrides.seed.is_none());
        }
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "medallion",
            "gold",
            "--test-size",
            "0.3",
            "--seed",
            "7",
            "--data-root",
            "/tmp/data",
            "-vv",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Gold));
        assert_eq!(cli.overrides.test_size, Some(0.3));
        assert_eq!(cli.overrides.seed, Some(7));
        assert_eq!(cli.overrides.data_root, Some(PathBuf::from("/tmp/data")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["medallion", "config", "init"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init
            }
        ));
        let cli = Cli::try_parse_from(["medallion", "run", "--no-generate"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { no_generate: true }));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["medallion"]).is_err());
    }
}
