use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use patchforge::config::Settings;
use patchforge::logging::init_tracing;

mod cmd;

#[derive(Parser)]
#[command(name = "patchforge")]
#[command(
    version,
    about = "Apply a natural-language change request to a code archive through a validated agent pipeline"
)]
pub struct Cli {
    /// Debug logging and full validation logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Working tree that artifacts are written into (defaults to the current directory)
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline once and print the recap
    Run {
        /// Zip archive of the code base
        #[arg(long)]
        zip: PathBuf,

        /// The change request
        #[arg(long)]
        prompt: String,

        /// Generate/validate attempts before giving up (1-10)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// No progress output on stderr
        #[arg(short, long)]
        quiet: bool,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and report problems
    Validate,
    /// Write a default patchforge.toml
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let workdir = match cli.workdir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&workdir, command.clone());
    }

    let mut settings = Settings::resolve(&workdir, cmd::env_lookup)?;
    if let Commands::Run {
        max_attempts: Some(n),
        ..
    } = &cli.command
    {
        settings.pipeline.max_attempts = *n;
        settings.ensure_valid()?;
    }

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        settings.log_level.clone()
    };
    if let Err(e) = init_tracing(&level, settings.log_format) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match cli.command {
        Commands::Run {
            zip,
            prompt,
            quiet,
            ..
        } => cmd::cmd_run(settings, workdir, &zip, &prompt, quiet, cli.verbose).await,
        Commands::Serve { host, port } => cmd::cmd_serve(settings, workdir, host, port).await,
        Commands::Config { .. } => Ok(()),
    }
}
