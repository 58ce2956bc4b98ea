//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::Overrides;
use medallion_core::config::{CONFIG_FILE_NAME, PipelineConfig, config_exists, load_config};
use medallion_core::{bronze, generate, gold, silver};
use std::path::Path;

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_file, overrides),
        stage => {
            let config = resolve_config(workspace, config_file, overrides)?;
            handle_stage(stage, &config)
        }
    }
}

fn handle_stage(command: Commands, config: &PipelineConfig) -> anyhow::Result<()> {
    match command {
        Commands::Generate => run_generate(config),
        Commands::Ingest => run_ingest(config),
        Commands::Validate => run_validate(config),
        Commands::Transform => run_transform(config),
        Commands::Gold => run_gold(config),
        Commands::Run { no_generate } => {
            if !no_generate {
                run_generate(config)?;
            }
            run_ingest(config)?;
            run_validate(config)?;
            run_transform(config)?;
            run_gold(config)
        }
        Commands::Config { .. } => Ok(()),
    }
}

/// Load the layered configuration, apply CLI overrides and validate the result.
pub fn resolve_config(
    workspace: &Path,
    config_file: Option<&Path>,
    overrides: &Overrides,
) -> anyhow::Result<PipelineConfig> {
    let mut config = load_config(workspace, config_file)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    apply_overrides(&mut config, workspace, overrides);
    config.ensure_valid()?;
    Ok(config)
}

fn apply_overrides(config: &mut PipelineConfig, workspace: &Path, overrides: &Overrides) {
    if let Some(root) = &overrides.data_root {
        config.paths.data_root = if root.is_relative() {
            workspace.join(root)
        } else {
            root.clone()
        };
    }
    if let Some(batches) = overrides.batches {
        config.generate.batches = batches;
    }
    if let Some(seed) = overrides.seed {
        config.generate.seed = seed;
        config.gold.seed = seed;
    }
    if let Some(test_size) = overrides.test_size {
        config.gold.test_size = test_size;
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(CONFIG_FILE_NAME);
            if config_exists(workspace) {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = PipelineConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all(workspace)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = resolve_config(workspace, config_file, overrides)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn run_generate(config: &PipelineConfig) -> anyhow::Result<()> {
    let report = generate::run(config)?;
    println!(
        "Generated {} batch file(s) ({} rows) in {}",
        report.files.len(),
        report.total_rows,
        config.paths.incoming_dir().display()
    );
    Ok(())
}

fn run_ingest(config: &PipelineConfig) -> anyhow::Result<()> {
    let report = bronze::ingest::run(config)?;
    if report.ingested.is_empty() {
        println!(
            "No new batches ({} already ingested); bronze has {} rows",
            report.skipped.len(),
            report.total_rows
        );
    } else {
        println!(
            "Ingested {} batch(es), {} rows appended; bronze has {} rows",
            report.ingested.len(),
            report.rows_appended,
            report.total_rows
        );
    }
    Ok(())
}

fn run_validate(config: &PipelineConfig) -> anyhow::Result<()> {
    let summary = silver::validate::run(config)?;
    println!(
        "Validated {} rows: {} accepted, {} rejected",
        summary.total_rows, summary.accepted, summary.rejected
    );
    for (reason, count) in &summary.by_reason {
        println!("  {reason}: {count}");
    }
    Ok(())
}

fn run_transform(config: &PipelineConfig) -> anyhow::Result<()> {
    let report = silver::transform::run(config)?;
    println!(
        "Transformed {} rows, added [{}]",
        report.rows,
        report.columns_added.join(", ")
    );
    Ok(())
}

fn run_gold(config: &PipelineConfig) -> anyhow::Result<()> {
    let report = gold::build::run(config)?;
    println!(
        "Gold: {} rows ({} train / {} test), version {}",
        report.rows, report.train_rows, report.test_rows, report.version_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_core::Table;
    use medallion_core::error::Stage;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn run(command: Commands, workspace: &Path) -> anyhow::Result<()> {
        handle_command(command, workspace, None, &Overrides::default())
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        run(command, workspace).unwrap();

        let config_path = workspace.join(CONFIG_FILE_NAME);
        assert!(config_exists(workspace));

        // Verify it's valid TOML
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: PipelineConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.generate.batches, 5);
        assert_eq!(parsed.gold.test_size, 0.2);
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        run(command, workspace).unwrap();
        let config_path = workspace.join(CONFIG_FILE_NAME);
        let content_first = std::fs::read_to_string(&config_path).unwrap();

        // Second init should not overwrite
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        run(command, workspace).unwrap();
        let content_second = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content_first, content_second);
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(run(command, dir.path()).is_ok());
    }

    #[test]
    fn test_overrides_applied() {
        let dir = TempDir::new().unwrap();
        let overrides = Overrides {
            data_root: Some("elsewhere".into()),
            batches: Some(2),
            seed: Some(9),
            test_size: Some(0.5),
        };
        let config = resolve_config(dir.path(), None, &overrides).unwrap();
        assert_eq!(config.paths.data_root, dir.path().join("elsewhere"));
        assert_eq!(config.generate.batches, 2);
        assert_eq!(config.gold.seed, 9);
        assert_eq!(config.gold.test_size, 0.5);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let dir = TempDir::new().unwrap();
        let overrides = Overrides {
            test_size: Some(1.5),
            ..Overrides::default()
        };
        let err = handle_command(Commands::Gold, dir.path(), None, &overrides).unwrap_err();
        assert!(err.to_string().contains("test_size"));
    }

    #[test]
    fn test_stage_without_input_fails() {
        let dir = TempDir::new().unwrap();
        let err = run(Commands::Validate, dir.path()).unwrap_err();
        assert!(err.to_string().contains("validate-silver"));
    }

    #[test]
    fn test_run_all_stages() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        run(Commands::Run { no_generate: false }, workspace).unwrap();

        let data = workspace.join("data");
        let gold = Table::read_csv(Stage::BuildGold, &data.join("gold").join("gold.csv")).unwrap();
        let train = Table::read_csv(Stage::BuildGold, &data.join("gold").join("train.csv")).unwrap();
        let test = Table::read_csv(Stage::BuildGold, &data.join("gold").join("test.csv")).unwrap();
        assert_eq!(gold.row_count(), 500);
        assert_eq!(train.row_count() + test.row_count(), 500);

        // A second run regenerates the same batch names and ingests nothing new.
        run(Commands::Run { no_generate: false }, workspace).unwrap();
        let bronze =
            Table::read_csv(Stage::IngestBronze, &data.join("bronze").join("bronze_all.csv"))
                .unwrap();
        assert_eq!(bronze.row_count(), 500);
    }
}
