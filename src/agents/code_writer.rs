//! P5: produce or revise the artifact, gate it, write it, diff it.
//!
//! Text generation is delegated to a [`CodeWriter`] strategy chosen once at
//! start-up. Whatever the strategy returns goes through the safety gate and
//! a CPython compile check before anything touches the disk.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{PhaseContext, manifest};
use crate::blackboard::{Baseline, Blackboard, require};
use crate::errors::PipelineError;
use crate::gates::{check_artifact, compile_artifact};
use crate::llm::{GenerateOptions, Message, TextGenerator};
use crate::model::{ArtifactSpec, Constraints, FeatureSpec, TaskList};
use crate::patch::{changed_lines, create_patch};
use crate::phase::PhaseId;
use crate::util::extract_code_block;

const PHASE: PhaseId = PhaseId::WriteArtifact;

pub const DECLINED_SUMMARY: &str = "No new agent was requested; no files were written.";

/// Inputs shared by both strategy calls.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub spec: &'a ArtifactSpec,
    pub constraints: &'a Constraints,
    pub tasks: &'a TaskList,
    /// Failure log of the previous attempt, if any.
    pub lint_error: Option<&'a str>,
}

#[async_trait]
pub trait CodeWriter: Send + Sync {
    /// Source for a file that does not exist yet.
    async fn create(&self, request: &WriteRequest<'_>) -> Result<String, PipelineError>;

    /// Edited version of `current`.
    async fn revise(
        &self,
        request: &WriteRequest<'_>,
        current: &str,
    ) -> Result<String, PipelineError>;
}

/// Deterministic class skeleton. Needs no text generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateWriter;

impl TemplateWriter {
    pub fn render(spec: &ArtifactSpec) -> String {
        let purpose = spec.purpose.replace('\\', "\\\\").replace('"', "\\\"");
        format!(
            "import logging\n\
             import typing\n\
             import asyncio\n\
             \n\
             \n\
             class {class}:\n\
             \x20   \"\"\"{purpose}\"\"\"\n\
             \n\
             \x20   {signature}\n\
             \x20       \"\"\"Entry point for the {class}.\"\"\"\n\
             \x20       logging.info(\"%s: starting\", self.__class__.__name__)\n\
             \x20       return []\n",
            class = spec.class_name,
            purpose = purpose,
            signature = spec.run_signature,
        )
    }

    /// `current` with the task list appended as a comment block.
    pub fn annotate(current: &str, tasks: &TaskList) -> String {
        let pending: String = tasks.iter().map(|t| format!("#  - {}\n", t)).collect();
        format!(
            "{}\n\n# Pending tasks (auto-generated):\n{}",
            current.trim_end(),
            pending
        )
    }
}

#[async_trait]
impl CodeWriter for TemplateWriter {
    async fn create(&self, request: &WriteRequest<'_>) -> Result<String, PipelineError> {
        Ok(Self::render(request.spec))
    }

    async fn revise(
        &self,
        request: &WriteRequest<'_>,
        current: &str,
    ) -> Result<String, PipelineError> {
        Ok(Self::annotate(current, request.tasks))
    }
}

const WRITER_SYSTEM: &str = "You are a senior Python engineer. \
Reply with one complete Python module inside a ```python fenced block. \
At module level use only imports, class and function definitions, constant assignments \
and docstrings: importing the module must not execute anything.";

/// Asks the text generator for the whole file.
pub struct LlmWriter {
    generator: Arc<dyn TextGenerator>,
    options: GenerateOptions,
}

impl LlmWriter {
    pub fn new(generator: Arc<dyn TextGenerator>, temperature: f32) -> Self {
        Self {
            generator,
            options: GenerateOptions::with_temperature(temperature),
        }
    }

    fn context_block(request: &WriteRequest<'_>) -> String {
        let spec = request.spec;
        let mut prompt = format!(
            "## Feature spec\n\
             * class: {}\n* run signature: {}\n* purpose: {}\n* file: {}\n\n\
             ## Tasks\n{}\n\n## Constraints\n{}\n",
            spec.class_name,
            spec.run_signature,
            spec.purpose,
            spec.display_path(),
            request.tasks.to_bullets(),
            request.constraints.to_prompt_json()
        );
        if let Some(log) = request.lint_error {
            prompt.push_str(&format!(
                "\n## Previous attempt failed static checks\n```\n{}\n```\n",
                log.trim_end()
            ));
        }
        prompt
    }

    async fn complete(&self, prompt: String) -> Result<String, PipelineError> {
        let messages = [Message::system(WRITER_SYSTEM), Message::user(prompt)];
        let reply = self
            .generator
            .generate(&messages, &self.options)
            .await
            .map_err(|source| PipelineError::Llm {
                phase: PHASE,
                source,
            })?;
        Ok(extract_code_block(&reply))
    }
}

#[async_trait]
impl CodeWriter for LlmWriter {
    async fn create(&self, request: &WriteRequest<'_>) -> Result<String, PipelineError> {
        let prompt = format!(
            "{}\n---\nWrite the complete new file.",
            Self::context_block(request)
        );
        self.complete(prompt).await
    }

    async fn revise(
        &self,
        request: &WriteRequest<'_>,
        current: &str,
    ) -> Result<String, PipelineError> {
        let prompt = format!(
            "{}\n## Current file content\n```python\n{}\n```\n\n---\n\
             Apply the tasks and return the complete edited file.",
            Self::context_block(request),
            current.trim_end()
        );
        self.complete(prompt).await
    }
}

fn read_baseline(path: &Path) -> Result<Baseline, PipelineError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Baseline::Existing(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Baseline::Absent),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

pub async fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let constraints = require(&bb.constraints, PHASE, "constraints")?.clone();
    let feature = require(&bb.feature_spec, PHASE, "feature_spec")?.clone();
    let tasks = require(&bb.tasks, PHASE, "tasks")?.clone();

    let spec = match feature {
        FeatureSpec::Declined => {
            info!(phase = %PHASE, "nothing to write");
            bb.latest_diff = Some(String::new());
            bb.patch_summary = Some(DECLINED_SUMMARY.to_string());
            return Ok(());
        }
        FeatureSpec::NewArtifact(spec) => spec,
    };

    let target = ctx.workdir.join(&spec.file);
    let baseline = match bb.artifact_baseline.clone() {
        Some(baseline) => baseline,
        None => {
            let baseline = read_baseline(&target)?;
            bb.artifact_baseline = Some(baseline.clone());
            baseline
        }
    };
    if constraints.non_destructive && baseline.existed() {
        return Err(PipelineError::RefusedOverwrite { path: spec.file });
    }

    let request = WriteRequest {
        spec: &spec,
        constraints: &constraints,
        tasks: &tasks,
        lint_error: bb.lint_error.as_deref(),
    };
    let content = match &baseline {
        Baseline::Absent => ctx.writer.create(&request).await?,
        Baseline::Existing(current) => ctx.writer.revise(&request, current).await?,
    };

    check_artifact(&content, spec.class_name.as_str())?;
    compile_artifact(&content, spec.class_name.as_str(), &ctx.settings.check).await?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    std::fs::write(&target, &content).map_err(|e| PipelineError::io(&target, e))?;

    let shown = spec.display_path();
    let diff = create_patch(baseline.text(), &content, &shown);
    let added = manifest::update_requirements(
        &ctx.workdir,
        &ctx.source_root(),
        baseline.text(),
        &content,
    )?;

    let verb = if baseline.existed() { "Patched" } else { "Created" };
    let mut summary = format!(
        "{} {}\nLines changed: {}",
        verb,
        shown,
        changed_lines(baseline.text(), &content)
    );
    if !added.is_empty() {
        summary.push_str(&format!(
            "\nAdded to {}: {}",
            manifest::MANIFEST_FILE,
            added.join(", ")
        ));
    }

    info!(phase = %PHASE, file = %shown, created = !baseline.existed(), "artifact written");
    bb.latest_diff = Some(diff);
    bb.patch_summary = Some(summary);
    Ok(())
}
