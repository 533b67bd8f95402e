//! Phases Z and P0: load the run inputs onto the blackboard.

use std::path::Path;

use tracing::info;

use super::PhaseContext;
use crate::archive::scan_archive;
use crate::blackboard::Blackboard;
use crate::errors::PipelineError;
use crate::phase::PhaseId;

/// Z: render the archive listing into `tree`.
pub fn scan(bb: &mut Blackboard, ctx: &PhaseContext, archive: &Path) -> Result<(), PipelineError> {
    let tree = scan_archive(archive, ctx.settings.pipeline.preview_bytes)?;
    info!(
        phase = %PhaseId::ScanArchive,
        entries = tree.lines().filter(|l| l.starts_with("├── ")).count(),
        "archive scanned"
    );
    bb.tree = Some(tree);
    Ok(())
}

/// P0: store the user's instruction verbatim (surrounding whitespace trimmed).
pub fn attach_prompt(bb: &mut Blackboard, prompt: &str) {
    let prompt = prompt.trim();
    info!(phase = %PhaseId::AttachPrompt, chars = prompt.len(), "prompt attached");
    bb.user_prompt = Some(prompt.to_string());
}
