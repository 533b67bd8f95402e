//! P6: assemble the Markdown recap, the only user-facing output of a run.

use std::path::Path;

use tracing::info;
use walkdir::WalkDir;

use super::PhaseContext;
use crate::blackboard::{Blackboard, require};
use crate::errors::PipelineError;
use crate::model::FeatureSpec;
use crate::phase::PhaseId;

const PHASE: PhaseId = PhaseId::AssembleRecap;

pub const TREE_DEPTH: usize = 3;

/// Sorted listing of `root` up to [`TREE_DEPTH`] levels, `.git` skipped.
/// Directories end in `/`; nesting is two spaces per level.
pub fn directory_tree(root: &Path) -> String {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(TREE_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
        .map(|e| {
            let indent = "  ".repeat(e.depth() - 1);
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() {
                format!("{}{}/", indent, name)
            } else {
                format!("{}{}", indent, name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let constraints = require(&bb.constraints, PHASE, "constraints")?;
    let feature = require(&bb.feature_spec, PHASE, "feature_spec")?;
    let summary = require(&bb.patch_summary, PHASE, "patch_summary")?;

    let mut out = String::new();
    match feature {
        FeatureSpec::NewArtifact(spec) => {
            out.push_str("## New agent added\n");
            out.push_str(&format!("* **Class**: `{}`\n", spec.class_name));
            out.push_str(&format!("* **Purpose**: {}\n", spec.purpose));
            out.push_str(&format!("* **File**: `{}`\n", spec.display_path()));
        }
        FeatureSpec::Declined => {
            out.push_str("## No new agent requested\n");
            out.push_str("The request did not ask for a new agent class.\n");
        }
    }

    out.push_str("\n## Request\n");
    out.push_str(&format!("* **Project**: {}\n", constraints.project_name));
    out.push_str(&format!(
        "* **Non-destructive**: {}\n",
        if constraints.non_destructive { "yes" } else { "no" }
    ));
    if let Some(brief) = &constraints.brief {
        out.push_str(&format!("* **Brief**: {}\n", brief));
    }

    out.push_str("\n## What was changed\n");
    out.push_str(summary.trim_end());
    out.push('\n');
    if let Some(attempts) = bb.attempts_used {
        out.push_str(&format!("\nValidation passed after {} attempt(s).\n", attempts));
    }

    out.push_str(&format!(
        "\n## Updated directory tree (depth ≤{})\n```\n{}\n```\n",
        TREE_DEPTH,
        directory_tree(&ctx.workdir)
    ));

    info!(phase = %PHASE, chars = out.len(), "recap assembled");
    bb.final_answer = Some(out);
    Ok(())
}
