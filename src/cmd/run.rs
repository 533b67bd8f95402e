//! Pipeline entry points: `patchforge run` and `patchforge serve`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use patchforge::config::Settings;
use patchforge::orchestrator::Pipeline;
use patchforge::phase::PIPELINE;
use patchforge::server::start_server;
use patchforge::ui::PipelineProgress;

use super::env_lookup;

/// Run the pipeline once and print the recap on stdout.
pub async fn cmd_run(
    settings: Settings,
    workdir: PathBuf,
    zip: &Path,
    prompt: &str,
    quiet: bool,
    verbose: bool,
) -> Result<()> {
    if !zip.is_file() {
        anyhow::bail!("Archive not found: {}", zip.display());
    }
    if prompt.trim().is_empty() {
        anyhow::bail!("--prompt must not be empty");
    }

    let mut pipeline = Pipeline::from_settings(&workdir, settings, env_lookup)
        .context("Failed to configure the text generator")?;
    if !quiet {
        pipeline = pipeline.with_observer(Arc::new(PipelineProgress::new(
            PIPELINE.len() as u64,
            verbose,
        )));
    }

    let recap = pipeline.run(zip, prompt).await.context("Pipeline failed")?;
    println!("{}", recap);
    Ok(())
}

/// Serve the HTTP API until interrupted.
pub async fn cmd_serve(
    mut settings: Settings,
    workdir: PathBuf,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    let server = settings.server.clone();

    let pipeline = Pipeline::from_settings(&workdir, settings, env_lookup)
        .context("Failed to configure the text generator")?;
    start_server(pipeline, &server).await
}
