//! P3: derive the ordered list of edit steps.

use tracing::info;

use super::PhaseContext;
use crate::blackboard::{Blackboard, require};
use crate::errors::PipelineError;
use crate::model::{Constraints, TaskList};
use crate::phase::PhaseId;
use crate::util::extract_bullets;

const PHASE: PhaseId = PhaseId::PlanTasks;

const SYSTEM: &str = "You are a senior software architect. \
Given a codebase tree and user constraints, list the minimal numbered steps needed \
to apply those changes without breaking existing architecture. Return ONLY the bullet list.";

fn build_prompt(constraints: &Constraints, tree: &str, snippets: Option<&[String]>) -> String {
    let mut lines = vec![
        "## Current directory tree".to_string(),
        tree.to_string(),
        "\n## Constraints JSON".to_string(),
        constraints.to_prompt_json(),
    ];
    if let Some(snippets) = snippets
        && !snippets.is_empty()
    {
        lines.push("\n## Relevant design notes".to_string());
        lines.extend(snippets.iter().map(|s| format!("- {}", s)));
    }
    lines.push(
        "\n---\nProduce an ordered bullet list (use '-' or '1.' prefixes) of the actions \
         a code-modifier agent should perform. Be concise; one sentence per bullet."
            .to_string(),
    );
    lines.join("\n")
}

pub async fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let constraints = require(&bb.constraints, PHASE, "constraints")?;
    let tree = require(&bb.tree, PHASE, "tree")?;
    let prompt = build_prompt(constraints, tree, bb.architecture_snippets.as_deref());

    let reply = ctx
        .ask(PHASE, SYSTEM, prompt, &ctx.creative_options())
        .await?;
    let tasks = TaskList::new(extract_bullets(&reply), ctx.settings.pipeline.max_tasks)
        .map_err(|e| e.in_phase(PHASE))?;

    info!(phase = %PHASE, tasks = tasks.len(), "tasks planned");
    bb.tasks = Some(tasks);
    Ok(())
}
