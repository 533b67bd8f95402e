//! Read-only listing of a zip archive, rendered as a Markdown-ish tree.
//!
//! Entries are never extracted; each file contributes one size line and a
//! one-line preview taken from its first few bytes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::errors::PipelineError;

const PREVIEW_WIDTH: usize = 100;
const PLACEHOLDER: &str = " [...]";

/// List every non-directory entry of the archive at `path` in sorted order.
///
/// ```text
/// ├── README.md  (42 B)
///       # Demo project
/// ```
pub fn scan_archive(path: &Path, preview_bytes: usize) -> Result<String, PipelineError> {
    let archive_err = |reason: String| PipelineError::Archive {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| archive_err(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut lines = Vec::with_capacity(names.len() * 2);
    for name in &names {
        let mut entry = archive
            .by_name(name)
            .map_err(|e| archive_err(format!("{}: {}", name, e)))?;
        if entry.is_dir() {
            continue;
        }
        lines.push(format!("├── {}  ({} B)", name, entry.size()));

        let mut raw = Vec::with_capacity(preview_bytes);
        entry
            .by_ref()
            .take(preview_bytes as u64)
            .read_to_end(&mut raw)
            .map_err(|e| archive_err(format!("{}: {}", name, e)))?;
        if let Some(preview) = preview_line(&raw) {
            lines.push(format!("      {}", preview));
        }
    }

    debug!(archive = %path.display(), entries = names.len(), "Scanned archive");
    Ok(lines.join("\n"))
}

/// First line of `raw`, undecodable bytes dropped, whitespace collapsed and
/// shortened to [`PREVIEW_WIDTH`] columns at a word boundary.
fn preview_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw).replace('\u{FFFD}', "");
    let first = text.lines().next()?;
    let collapsed = first.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(shorten(&collapsed, PREVIEW_WIDTH))
}

fn shorten(text: &str, width: usize) -> String {
    if textwrap::core::display_width(text) <= width {
        return text.to_string();
    }
    let head = textwrap::wrap(text, width - PLACEHOLDER.len())
        .into_iter()
        .next()
        .map(|line| line.into_owned())
        .unwrap_or_default();
    format!("{}{}", head, PLACEHOLDER)
}
