//! P4: design the one new artifact, or record that none was asked for.

use tracing::info;

use super::PhaseContext;
use crate::blackboard::{Blackboard, require};
use crate::errors::PipelineError;
use crate::model::{ArtifactSpec, FeatureSpec};
use crate::phase::PhaseId;
use crate::util::parse_json_object;

const PHASE: PhaseId = PhaseId::DesignFeature;

const SYSTEM: &str = "You are a senior Python architect. \
Produce a JSON spec for ONE new agent class. Output ONLY JSON.";

pub async fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let constraints = require(&bb.constraints, PHASE, "constraints")?;
    let tasks = require(&bb.tasks, PHASE, "tasks")?;

    if !constraints.wants_new_agent {
        info!(phase = %PHASE, "no new artifact requested");
        bb.feature_spec = Some(FeatureSpec::Declined);
        return Ok(());
    }

    let prompt = format!(
        "## Constraints\n{}\n\n## Derived tasks\n{}\n\n---\n\
         Provide keys className (PascalCase), runSignature (an async def header) and purpose \
         (one sentence).",
        constraints.to_prompt_json(),
        tasks.to_bullets()
    );
    let reply = ctx
        .ask(PHASE, SYSTEM, prompt, &ctx.creative_options())
        .await?;
    let spec = parse_json_object(&reply)
        .and_then(|value| ArtifactSpec::from_value(&value, ctx.artifact_dir()))
        .map_err(|e| e.in_phase(PHASE))?;

    info!(
        phase = %PHASE,
        class_name = %spec.class_name,
        file = %spec.display_path(),
        "feature designed"
    );
    bb.feature_spec = Some(FeatureSpec::NewArtifact(spec));
    Ok(())
}
