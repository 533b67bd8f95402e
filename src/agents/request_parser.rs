//! P1: turn the free-form request into [`Constraints`].

use tracing::info;

use super::PhaseContext;
use crate::blackboard::{Blackboard, require};
use crate::errors::PipelineError;
use crate::model::Constraints;
use crate::phase::PhaseId;
use crate::util::parse_json_object;

const PHASE: PhaseId = PhaseId::ParseRequest;

const SYSTEM: &str = "You are a JSON-only extraction engine. \
Read the user's request and the repository listing, then return a single JSON object. \
No prose, no code fences.";

fn build_prompt(prompt: &str, tree: &str) -> String {
    format!(
        "## User prompt\n{prompt}\n\n\
         ## Directory tree (truncated markdown)\n{tree}\n\n\
         ----\n\
         Extract a JSON object with keys projectName (string), nonDestructive (boolean), \
         wantsNewAgent (boolean) and optionally brief (string). Return ONLY the JSON."
    )
}

pub async fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let prompt = require(&bb.user_prompt, PHASE, "user_prompt")?;
    let tree = require(&bb.tree, PHASE, "tree")?;

    let reply = ctx
        .ask(PHASE, SYSTEM, build_prompt(prompt, tree), &ctx.extraction_options())
        .await?;
    let constraints = parse_json_object(&reply)
        .and_then(|value| Constraints::from_value(&value))
        .map_err(|e| e.in_phase(PHASE))?;

    info!(
        phase = %PHASE,
        project = %constraints.project_name,
        wants_new_agent = constraints.wants_new_agent,
        non_destructive = constraints.non_destructive,
        "request parsed"
    );
    bb.constraints = Some(constraints);
    Ok(())
}
