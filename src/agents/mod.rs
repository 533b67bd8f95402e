//! Phase functions.
//!
//! Each phase reads its prerequisites from the [`Blackboard`], does its one
//! job and writes its output field back. Phases never call each other; the
//! orchestrator decides the order.
//!
//! | Module           | Code | Kind          |
//! |------------------|------|---------------|
//! | `intake`         | Z,P0 | deterministic |
//! | `request_parser` | P1   | LLM, t=0.0    |
//! | `architecture`   | P2   | ranking       |
//! | `planner`        | P3   | LLM, t=cfg    |
//! | `feature`        | P4   | LLM, t=cfg    |
//! | `code_writer`    | P5   | strategy      |
//! | `static_check`   | D1   | subprocess    |
//! | `self_refine`    | R    | LLM, t=0.0    |
//! | `recap`          | P6   | deterministic |
//!
//! [`Blackboard`]: crate::blackboard::Blackboard

pub mod architecture;
pub mod code_writer;
pub mod feature;
pub mod intake;
pub mod manifest;
pub mod planner;
pub mod recap;
pub mod request_parser;
pub mod self_refine;
pub mod static_check;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::Settings;
use crate::errors::PipelineError;
use crate::llm::{GenerateOptions, Message, TextGenerator};
use crate::phase::PhaseId;
use crate::ranking::SnippetRanker;

pub use code_writer::{CodeWriter, LlmWriter, TemplateWriter, WriteRequest};

/// Everything a phase needs besides the blackboard.
#[derive(Clone)]
pub struct PhaseContext {
    /// Working tree that artifacts are written into.
    pub workdir: PathBuf,
    pub settings: Settings,
    pub generator: Arc<dyn TextGenerator>,
    pub ranker: Arc<dyn SnippetRanker>,
    pub writer: Arc<dyn CodeWriter>,
}

impl PhaseContext {
    /// Artifact directory relative to the working tree.
    pub fn artifact_dir(&self) -> &Path {
        Path::new(&self.settings.pipeline.artifact_dir)
    }

    pub fn source_root(&self) -> PathBuf {
        self.workdir.join(&self.settings.pipeline.source_root)
    }

    /// Options for open-ended phases.
    pub fn creative_options(&self) -> GenerateOptions {
        GenerateOptions::with_temperature(self.settings.llm.temperature)
    }

    /// Options for structured extraction.
    pub fn extraction_options(&self) -> GenerateOptions {
        GenerateOptions::with_temperature(0.0)
    }

    /// One system + user exchange with the generator, attributed to `phase`.
    pub(crate) async fn ask(
        &self,
        phase: PhaseId,
        system: &str,
        user: String,
        options: &GenerateOptions,
    ) -> Result<String, PipelineError> {
        debug!(phase = %phase, prompt_chars = user.len(), "sending prompt");
        let messages = [Message::system(system), Message::user(user)];
        self.generator
            .generate(&messages, options)
            .await
            .map_err(|source| PipelineError::Llm { phase, source })
    }
}

impl std::fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("workdir", &self.workdir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for phase tests.

    use std::sync::Arc;

    use super::*;
    use crate::blackboard::Blackboard;
    use crate::llm::ScriptedGenerator;
    use crate::model::{ArtifactSpec, ClassName, Constraints, FeatureSpec, TaskList};
    use crate::ranking::LexicalRanker;

    pub fn context(workdir: &Path, generator: Arc<ScriptedGenerator>) -> PhaseContext {
        let mut settings = Settings::default();
        settings.check.smoke_command = vec!["true".into()];
        PhaseContext {
            workdir: workdir.to_path_buf(),
            settings,
            generator,
            ranker: Arc::new(LexicalRanker),
            writer: Arc::new(TemplateWriter),
        }
    }

    pub fn constraints(wants_new_agent: bool, non_destructive: bool) -> Constraints {
        Constraints {
            project_name: "demo".into(),
            non_destructive,
            wants_new_agent,
            brief: Some("add a helper agent".into()),
            extra: Default::default(),
        }
    }

    pub fn sample_spec() -> ArtifactSpec {
        ArtifactSpec::new(
            ClassName::parse("SampleAgent").unwrap(),
            "async def run(self, payload: dict) -> list",
            "Collects sample data.",
            Path::new("src/agents"),
        )
        .unwrap()
    }

    /// Blackboard with everything the write phase needs.
    pub fn ready_board(non_destructive: bool) -> Blackboard {
        let mut bb = Blackboard::new();
        bb.constraints = Some(constraints(true, non_destructive));
        bb.tasks = Some(TaskList::new(vec!["Create the agent module".into()], 25).unwrap());
        bb.feature_spec = Some(FeatureSpec::NewArtifact(sample_spec()));
        bb
    }
}
