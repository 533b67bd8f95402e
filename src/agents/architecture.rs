//! P2: pull the design notes most relevant to the request out of the
//! working tree's documentation.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::PhaseContext;
use crate::blackboard::{Blackboard, require};
use crate::errors::PipelineError;
use crate::phase::PhaseId;

const PHASE: PhaseId = PhaseId::ArchitectureLookup;

/// Paragraphs this short are headings or link lines, not design notes.
const MIN_SNIPPET_CHARS: usize = 40;

const DOC_PATTERNS: [&str; 2] = ["docs/*.md", "docs/*.rst"];

/// Documentation files in a stable order: `docs/` matches sorted, then `README.md`.
fn doc_files(workdir: &Path) -> Vec<PathBuf> {
    let root = glob::Pattern::escape(&workdir.to_string_lossy());
    let mut files: Vec<PathBuf> = DOC_PATTERNS
        .iter()
        .filter_map(|pattern| glob::glob(&format!("{}/{}", root, pattern)).ok())
        .flat_map(|paths| paths.filter_map(Result::ok))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    let readme = workdir.join("README.md");
    if readme.is_file() {
        files.push(readme);
    }
    files
}

/// Blank-line separated paragraphs longer than [`MIN_SNIPPET_CHARS`].
pub fn split_snippets(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.chars().count() > MIN_SNIPPET_CHARS)
        .map(str::to_string)
        .collect()
}

fn collect_snippets(workdir: &Path) -> Result<Vec<String>, PipelineError> {
    let mut snippets = Vec::new();
    for path in doc_files(workdir) {
        let text = std::fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
        let found = split_snippets(&String::from_utf8_lossy(&text));
        debug!(file = %path.display(), snippets = found.len(), "read design notes");
        snippets.extend(found);
    }
    Ok(snippets)
}

pub async fn run(bb: &mut Blackboard, ctx: &PhaseContext) -> Result<(), PipelineError> {
    let prompt = require(&bb.user_prompt, PHASE, "user_prompt")?;
    require(&bb.tree, PHASE, "tree")?;

    let snippets = collect_snippets(&ctx.workdir)?;
    let ranked = if snippets.is_empty() {
        Vec::new()
    } else {
        ctx.ranker
            .rank(prompt, &snippets, ctx.settings.pipeline.top_k)
            .await
            .map_err(|source| PipelineError::Llm {
                phase: PHASE,
                source,
            })?
    };

    info!(phase = %PHASE, candidates = snippets.len(), kept = ranked.len(), "design notes ranked");
    bb.architecture_snippets = Some(ranked);
    Ok(())
}
