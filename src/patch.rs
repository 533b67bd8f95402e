//! Unified diffs between two versions of one artifact.

use similar::{ChangeTag, TextDiff};

/// Unified diff of `old` against `new` with git-style `a/` and `b/` headers.
/// Identical inputs produce an empty string.
pub fn create_patch(old: &str, new: &str, path: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

/// Number of inserted plus deleted lines between `old` and `new`.
pub fn changed_lines(old: &str, new: &str) -> usize {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter(|c| c.tag() != ChangeTag::Equal)
        .count()
}
