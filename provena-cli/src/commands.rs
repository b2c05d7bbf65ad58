//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use provena_core::{GenerationBackend, ProvenaConfig, RunStatus};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            out,
            backend,
            model,
            one_hop_only,
        } => {
            let mut config = load(workspace, config_path)?;
            apply_overrides(&mut config, backend.as_deref(), model, one_hop_only)?;
            handle_run(config, workspace, out.as_deref()).await
        }
        Commands::RootHash { snapshot, stream } => {
            let config = load(workspace, config_path)?;
            let profile = config.stream(&stream)?;
            let (root, count) = provena_core::snapshot_root_hash(profile, &snapshot).await?;
            println!("{root}  {stream} ({count} records)");
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<ProvenaConfig> {
    provena_core::load_config(Some(workspace), config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn apply_overrides(
    config: &mut ProvenaConfig,
    backend: Option<&str>,
    model: Option<String>,
    one_hop_only: bool,
) -> anyhow::Result<()> {
    if let Some(backend) = backend {
        config.generation.backend = match backend {
            "template" => GenerationBackend::Template,
            "ollama" => GenerationBackend::Ollama,
            other => anyhow::bail!("Unknown backend: '{}'. Use 'template' or 'ollama'.", other),
        };
    }
    if let Some(model) = model {
        config.generation.model = model;
    }
    if one_hop_only {
        config.run.two_hop = false;
    }
    config.validate()?;
    Ok(())
}

async fn handle_run(config: ProvenaConfig, workspace: &Path, out: Option<&Path>) -> anyhow::Result<()> {
    let report = provena_core::run_workspace(config, workspace).await;
    let json = report.to_json_pretty()?;

    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!("Wrote result artifact to {}", path.display());
        }
        None => println!("{json}"),
    }

    match &report.status {
        RunStatus::Ok => Ok(()),
        RunStatus::Partial => {
            tracing::warn!("Run deadline reached; artifact is partial");
            Ok(())
        }
        RunStatus::Failed { kind, message } => anyhow::bail!("Run failed ({kind}): {message}"),
    }
}

fn handle_config(action: ConfigAction, workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".provena");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = ProvenaConfig::default().to_toml()?;
            std::fs::write(&config_path, &toml_str)?;
            println!("Created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_path)?;
            let toml_str = config.to_toml()?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
