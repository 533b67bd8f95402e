//! Configuration view and validation commands: `patchforge config`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use patchforge::config::{CONFIG_DIR, Settings};

use crate::ConfigCommands;
use super::env_lookup;

pub fn cmd_config(workdir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = Settings::config_path(workdir);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file at {}; showing defaults", config_path.display());
            }
            println!("# Environment overrides (PATCHFORGE_*) are applied.");
            println!();

            let mut settings = Settings::load_or_default(workdir)?;
            settings.apply_env(env_lookup)?;
            let rendered =
                toml::to_string_pretty(&settings).context("Failed to render settings")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let mut settings = Settings::load_or_default(workdir)?;
            settings.apply_env(env_lookup)?;
            let problems = settings.validate();

            let key_present = env_lookup(&settings.llm.api_key_env)
                .is_some_and(|k| !k.trim().is_empty());
            if !key_present {
                println!(
                    "{} {} is not set; `run` and `serve` will fail",
                    style("warning:").yellow().bold(),
                    settings.llm.api_key_env
                );
            }

            if problems.is_empty() {
                println!("{} configuration is valid", style("ok:").green().bold());
            } else {
                for problem in &problems {
                    println!("{} {}", style("error:").red().bold(), problem);
                }
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                anyhow::bail!("Config file already exists: {}", config_path.display());
            }
            std::fs::create_dir_all(workdir.join(CONFIG_DIR))
                .with_context(|| format!("Failed to create {}", CONFIG_DIR))?;
            let rendered = toml::to_string_pretty(&Settings::default())
                .context("Failed to render default settings")?;
            std::fs::write(&config_path, rendered)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Created {}", config_path.display());
        }
    }
    Ok(())
}
