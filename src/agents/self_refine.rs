//! R: rewrite the task list from the last validation failure.

use tracing::{debug, info};

use super::PhaseContext;
use crate::blackboard::{Blackboard, require};
use crate::errors::PipelineError;
use crate::model::TaskList;
use crate::phase::PhaseId;
use crate::util::extract_bullets;

const PHASE: PhaseId = PhaseId::SelfRefine;

const SYSTEM: &str = "You are a code-fix assistant. \
Propose a revised set of tasks that fixes the reported error while still satisfying the \
original goal. Return ONLY the bullet list.";

fn build_prompt(tasks: &TaskList, lint_error: &str, diff: &str) -> String {
    let numbered: Vec<String> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect();
    format!(
        "## Previously attempted tasks\n{}\n\n\
         ## Lint error from static checker\n```\n{}\n```\n\n\
         ## Last patch diff\n```diff\n{}\n```\n\n\
         ---\nProduce an ordered bullet list of revised tasks.",
        numbered.join("\n"),
        lint_error.trim_end(),
        diff.trim_end()
    )
}

/// No-op unless a failure log is recorded.
pub async fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let Some(lint_error) = bb.lint_error.as_deref() else {
        debug!(phase = %PHASE, "no failure recorded; nothing to refine");
        return Ok(());
    };
    let tasks = require(&bb.tasks, PHASE, "tasks")?;
    let diff = bb.latest_diff.as_deref().unwrap_or("");

    let reply = ctx
        .ask(
            PHASE,
            SYSTEM,
            build_prompt(tasks, lint_error, diff),
            &ctx.extraction_options(),
        )
        .await?;
    let revised = TaskList::new(extract_bullets(&reply), ctx.settings.pipeline.max_tasks)
        .map_err(|e| e.in_phase(PHASE))?;

    info!(phase = %PHASE, before = tasks.len(), after = revised.len(), "tasks refined");
    bb.tasks = Some(revised);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::agents::testing;
    use crate::llm::ScriptedGenerator;

    fn board() -> Blackboard {
        let mut bb = Blackboard::new();
        bb.tasks = Some(TaskList::new(vec!["Create module".into(), "Add class".into()], 25).unwrap());
        bb.lint_error = Some("ModuleNotFoundError: No module named 'httpx'".into());
        bb.latest_diff = Some("+import httpx\n".into());
        bb
    }

    #[tokio::test]
    async fn without_failure_log_does_nothing() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let ctx = testing::context(dir.path(), generator.clone());
        let mut bb = board();
        bb.lint_error = None;

        run(&mut bb, &ctx).await.unwrap();

        assert!(generator.calls().is_empty());
        assert_eq!(bb.tasks.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replaces_tasks_from_bullets() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new([
            "- Drop the httpx import\n- Use urllib.request instead",
        ]));
        let ctx = testing::context(dir.path(), generator.clone());
        let mut bb = board();

        run(&mut bb, &ctx).await.unwrap();

        assert_eq!(
            bb.tasks.unwrap().as_slice(),
            ["Drop the httpx import", "Use urllib.request instead"]
        );
        let call = &generator.calls()[0];
        assert_eq!(call.options.temperature, Some(0.0));
        let prompt = &call.messages[1].content;
        assert!(prompt.contains("1. Create module\n2. Add class"));
        assert!(prompt.contains("No module named 'httpx'"));
        assert!(prompt.contains("+import httpx"));
    }

    #[tokio::test]
    async fn empty_revision_is_fatal() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(
            dir.path(),
            Arc::new(ScriptedGenerator::new(["I am not sure what to change."])),
        );
        let mut bb = board();
        let err = run(&mut bb, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MalformedOutput { phase: PhaseId::SelfRefine, .. }
        ));
        assert_eq!(bb.tasks.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn oversized_revision_is_fatal() {
        let dir = tempdir().unwrap();
        let reply: String = (0..30).map(|i| format!("- step {}\n", i)).collect();
        let ctx = testing::context(dir.path(), Arc::new(ScriptedGenerator::new([reply])));
        let mut bb = board();
        let err = run(&mut bb, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("30"));
    }
}
