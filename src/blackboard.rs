//! Per-run shared context between phases.
//!
//! One typed `Option` field per key. Writes overwrite unconditionally; an
//! absent value is `None`, which is distinct from a stored empty value.
//! Access is strictly sequential, so there is no locking.

use crate::errors::PipelineError;
use crate::model::{Constraints, FeatureSpec, TaskList};
use crate::phase::PhaseId;

/// Content of the target artifact before this run touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// The file did not exist.
    Absent,
    Existing(String),
}

impl Baseline {
    pub fn text(&self) -> &str {
        match self {
            Baseline::Absent => "",
            Baseline::Existing(text) => text,
        }
    }

    pub fn existed(&self) -> bool {
        matches!(self, Baseline::Existing(_))
    }
}

#[derive(Debug, Default)]
pub struct Blackboard {
    pub tree: Option<String>,
    pub user_prompt: Option<String>,
    pub constraints: Option<Constraints>,
    pub architecture_snippets: Option<Vec<String>>,
    pub tasks: Option<TaskList>,
    pub feature_spec: Option<FeatureSpec>,
    pub artifact_baseline: Option<Baseline>,
    pub patch_summary: Option<String>,
    pub latest_diff: Option<String>,
    pub lint_error: Option<String>,
    pub attempts_used: Option<u32>,
    pub final_answer: Option<String>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every key to absent.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Turn an absent prerequisite into `MissingPrerequisite` for `phase`.
pub fn require<'a, T>(
    value: &'a Option<T>,
    phase: PhaseId,
    key: &'static str,
) -> Result<&'a T, PipelineError> {
    value
        .as_ref()
        .ok_or(PipelineError::MissingPrerequisite { phase, key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_is_distinct_from_empty() {
        let mut bb = Blackboard::new();
        assert!(bb.tree.is_none());
        bb.tree = Some(String::new());
        assert_eq!(bb.tree.as_deref(), Some(""));
    }

    #[test]
    fn require_names_phase_and_key() {
        let bb = Blackboard::new();
        let err = require(&bb.constraints, PhaseId::DesignFeature, "constraints").unwrap_err();
        match err {
            PipelineError::MissingPrerequisite { phase, key } => {
                assert_eq!(phase, PhaseId::DesignFeature);
                assert_eq!(key, "constraints");
            }
            other => panic!("Expected MissingPrerequisite, got {:?}", other),
        }
    }

    #[test]
    fn clear_resets_everything() {
        let mut bb = Blackboard::new();
        bb.user_prompt = Some("hi".into());
        bb.lint_error = Some("boom".into());
        bb.attempts_used = Some(2);
        bb.clear();
        assert!(bb.user_prompt.is_none());
        assert!(bb.lint_error.is_none());
        assert!(bb.attempts_used.is_none());
    }

    #[test]
    fn baseline_text_and_existence() {
        assert_eq!(Baseline::Absent.text(), "");
        assert!(!Baseline::Absent.existed());
        let b = Baseline::Existing("x = 1\n".into());
        assert!(b.existed());
        assert_eq!(b.text(), "x = 1\n");
    }
}
