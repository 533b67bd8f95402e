use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info};

use super::retry::{AttemptSteps, RetryPolicy, run_loop};
use super::{NoopObserver, PipelineObserver};
use crate::agents::{
    CodeWriter, LlmWriter, PhaseContext, TemplateWriter, architecture, code_writer, feature,
    intake, planner, recap, request_parser, self_refine, static_check,
};
use crate::blackboard::Blackboard;
use crate::config::{CodegenMode, Settings};
use crate::errors::{LlmError, PipelineError, ValidationFailure};
use crate::llm::{HttpGenerator, TextGenerator};
use crate::phase::{PIPELINE, PhaseId, Step};
use crate::ranking::{EmbeddingRanker, LexicalRanker, SnippetRanker};

/// Runs the fixed phase table for one archive and prompt at a time.
///
/// A `Pipeline` holds no per-run state; every call to [`Pipeline::run`]
/// starts from an empty blackboard. Runs on the same working tree must not
/// overlap.
pub struct Pipeline {
    ctx: PhaseContext,
    observer: Arc<dyn PipelineObserver>,
}

/// Per-run inputs consumed by the first two phases.
struct RunInputs<'a> {
    archive: &'a Path,
    prompt: &'a str,
}

/// The write and static-check phases as seen by the retry loop.
struct WriteAndCheck<'a> {
    ctx: &'a PhaseContext,
}

#[async_trait]
impl AttemptSteps for WriteAndCheck<'_> {
    async fn refine(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        self_refine::run(bb, self.ctx).await
    }

    async fn generate(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        code_writer::run(bb, self.ctx).await
    }

    async fn validate(&self, _bb: &Blackboard) -> Result<(), ValidationFailure> {
        static_check::run(self.ctx).await
    }
}

fn writer_for(settings: &Settings, generator: &Arc<dyn TextGenerator>) -> Arc<dyn CodeWriter> {
    match settings.llm.codegen {
        CodegenMode::Template => Arc::new(TemplateWriter),
        CodegenMode::Llm => Arc::new(LlmWriter::new(generator.clone(), settings.llm.temperature)),
    }
}

impl Pipeline {
    pub fn new(ctx: PhaseContext) -> Self {
        Self {
            ctx,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Lexical ranking and the configured code writer around `generator`.
    pub fn with_generator(
        workdir: impl Into<PathBuf>,
        settings: Settings,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let writer = writer_for(&settings, &generator);
        Self::new(PhaseContext {
            workdir: workdir.into(),
            settings,
            generator,
            ranker: Arc::new(LexicalRanker),
            writer,
        })
    }

    /// Production wiring: the HTTP generator, plus embedding ranking when an
    /// embedding model is configured.
    pub fn from_settings<F>(
        workdir: impl Into<PathBuf>,
        settings: Settings,
        lookup: F,
    ) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http = Arc::new(HttpGenerator::from_settings(&settings.llm, lookup)?);
        let ranker: Arc<dyn SnippetRanker> = if settings.llm.embedding_model.is_some() {
            Arc::new(EmbeddingRanker::new(http.clone()))
        } else {
            Arc::new(LexicalRanker)
        };
        let mut pipeline = Self::with_generator(workdir, settings, http);
        pipeline.ctx.ranker = ranker;
        Ok(pipeline)
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    /// Execute every step on a fresh blackboard and return the recap.
    pub async fn run(&self, archive: &Path, prompt: &str) -> Result<String, PipelineError> {
        let mut bb = Blackboard::new();
        self.run_on(&mut bb, archive, prompt).await
    }

    /// Like [`Pipeline::run`] but on a caller-owned blackboard, which is left
    /// in its final state for inspection.
    pub async fn run_on(
        &self,
        bb: &mut Blackboard,
        archive: &Path,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        let inputs = RunInputs { archive, prompt };
        let started = Instant::now();
        let total = PIPELINE.len();

        for (index, step) in PIPELINE.iter().copied().enumerate() {
            self.observer.step_started(step, index, total);
            if let Err(e) = self.execute(step, bb, &inputs).await {
                error!(step = %step.label(), error = %e, "pipeline aborted");
                self.observer.run_finished(false);
                return Err(e);
            }
            self.observer.step_finished(step);
        }

        let answer = bb
            .final_answer
            .clone()
            .ok_or(PipelineError::MissingFinalAnswer);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            attempts = bb.attempts_used.unwrap_or(0),
            ok = answer.is_ok(),
            "pipeline finished"
        );
        self.observer.run_finished(answer.is_ok());
        answer
    }

    async fn execute(
        &self,
        step: Step,
        bb: &mut Blackboard,
        inputs: &RunInputs<'_>,
    ) -> Result<(), PipelineError> {
        match step {
            Step::Phase(phase) => self.execute_phase(phase, bb, Some(inputs)).await,
            Step::WriteAndCheck => {
                let policy = RetryPolicy {
                    max_attempts: self.ctx.settings.pipeline.max_attempts,
                    refine_on_failure: self.ctx.settings.pipeline.refine_on_failure,
                };
                let steps = WriteAndCheck { ctx: &self.ctx };
                run_loop(bb, &steps, policy, self.observer.as_ref())
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Run one phase by itself against `bb`, outside the phase table.
    ///
    /// Only phases that read nothing but the blackboard can run this way;
    /// [`PhaseId::ScanArchive`] and [`PhaseId::AttachPrompt`] are rejected.
    /// A standalone [`PhaseId::StaticCheck`] records its verdict in
    /// `lint_error` (cleared on success) instead of failing, so a following
    /// [`PhaseId::SelfRefine`] can act on it.
    pub async fn run_phase(&self, phase: PhaseId, bb: &mut Blackboard) -> Result<(), PipelineError> {
        info!(phase = %phase, "running phase on its own");
        self.execute_phase(phase, bb, None).await
    }

    async fn execute_phase(
        &self,
        phase: PhaseId,
        bb: &mut Blackboard,
        inputs: Option<&RunInputs<'_>>,
    ) -> Result<(), PipelineError> {
        let ctx = &self.ctx;
        match phase {
            PhaseId::ScanArchive => {
                let inputs = inputs.ok_or(PipelineError::NeedsRunInputs { phase })?;
                intake::scan(bb, ctx, inputs.archive)
            }
            PhaseId::AttachPrompt => {
                let inputs = inputs.ok_or(PipelineError::NeedsRunInputs { phase })?;
                intake::attach_prompt(bb, inputs.prompt);
                Ok(())
            }
            PhaseId::ParseRequest => request_parser::run(bb, ctx).await,
            PhaseId::ArchitectureLookup => architecture::run(bb, ctx).await,
            PhaseId::PlanTasks => planner::run(bb, ctx).await,
            PhaseId::DesignFeature => feature::run(bb, ctx).await,
            PhaseId::WriteArtifact => code_writer::run(bb, ctx).await,
            PhaseId::StaticCheck => {
                bb.lint_error = static_check::run(ctx).await.err().map(|f| f.log);
                Ok(())
            }
            PhaseId::SelfRefine => self_refine::run(bb, ctx).await,
            PhaseId::AssembleRecap => recap::run(bb, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::tempdir;

    use super::*;
    use crate::llm::ScriptedGenerator;
    use crate::model::TaskList;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for Recorder {
        fn step_started(&self, step: Step, _index: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("start {}", step.label()));
        }

        fn run_finished(&self, success: bool) {
            self.events.lock().unwrap().push(format!("finished {}", success));
        }
    }

    #[test]
    fn from_settings_requires_api_key() {
        let result = Pipeline::from_settings("/tmp", Settings::default(), |_| None);
        assert!(matches!(result, Err(LlmError::Misconfiguration(_))));
    }

    #[test]
    fn from_settings_picks_writer_from_codegen_mode() {
        let mut settings = Settings::default();
        settings.llm.codegen = CodegenMode::Llm;
        settings.llm.embedding_model = Some("embed".into());
        let pipeline =
            Pipeline::from_settings("/tmp", settings, |_| Some("secret".to_string())).unwrap();
        assert_eq!(pipeline.context().settings.llm.codegen, CodegenMode::Llm);
    }

    #[tokio::test]
    async fn missing_archive_aborts_before_any_model_call() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::with_generator(dir.path(), Settings::default(), generator.clone())
            .with_observer(recorder.clone());

        let mut bb = Blackboard::new();
        let err = pipeline
            .run_on(&mut bb, &dir.path().join("missing.zip"), "Add an agent")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Archive { .. }));
        assert!(bb.user_prompt.is_none());
        assert!(generator.calls().is_empty());
        assert_eq!(
            *recorder.events.lock().unwrap(),
            ["start Z (scan-archive)", "finished false"]
        );
    }

    #[tokio::test]
    async fn standalone_static_check_records_verdict() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.check.smoke_command = vec!["patchforge-no-such-program".into()];
        let pipeline =
            Pipeline::with_generator(dir.path(), settings, Arc::new(ScriptedGenerator::default()));

        let mut bb = Blackboard::new();
        pipeline.run_phase(PhaseId::StaticCheck, &mut bb).await.unwrap();
        assert!(bb.lint_error.as_deref().unwrap().contains("failed to start"));
    }

    #[tokio::test]
    async fn standalone_check_then_refine_rewrites_tasks() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.check.smoke_command = vec![
            "sh".into(),
            "-c".into(),
            "echo 'ImportError: no module named httpx' >&2; exit 1".into(),
        ];
        let generator = Arc::new(ScriptedGenerator::new([
            "- Create the agent module\n- Drop the httpx import",
        ]));
        let pipeline = Pipeline::with_generator(dir.path(), settings, generator.clone());

        let mut bb = Blackboard::new();
        bb.tasks = Some(TaskList::new(vec!["Create the agent module".into()], 25).unwrap());
        pipeline.run_phase(PhaseId::StaticCheck, &mut bb).await.unwrap();
        pipeline.run_phase(PhaseId::SelfRefine, &mut bb).await.unwrap();

        let tasks = bb.tasks.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().any(|t| t.contains("httpx")));
        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert!(
            calls[0]
                .messages
                .iter()
                .any(|m| m.content.contains("ImportError: no module named httpx"))
        );
    }

    #[tokio::test]
    async fn standalone_refine_without_failure_is_a_no_op() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let pipeline = Pipeline::with_generator(dir.path(), Settings::default(), generator.clone());

        let mut bb = Blackboard::new();
        pipeline.run_phase(PhaseId::SelfRefine, &mut bb).await.unwrap();
        assert!(bb.tasks.is_none());
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn intake_phases_need_run_inputs() {
        let dir = tempdir().unwrap();
        let pipeline =
            Pipeline::with_generator(dir.path(), Settings::default(), Arc::new(ScriptedGenerator::default()));

        let mut bb = Blackboard::new();
        for phase in [PhaseId::ScanArchive, PhaseId::AttachPrompt] {
            let err = pipeline.run_phase(phase, &mut bb).await.unwrap_err();
            assert!(matches!(err, PipelineError::NeedsRunInputs { phase: p } if p == phase));
        }
        assert!(bb.user_prompt.is_none());
    }
}
