//! Typed error hierarchy for the patchforge pipeline.
//!
//! - `PipelineError`: fatal; aborts a run with no partial recap
//! - `ValidationFailure`: recoverable; feeds the generate/validate retry loop
//! - `SchemaError`: a model reply that parsed but did not fit its closed type
//! - `LlmError`: transport and provider failures of the text generator
//! - `ConfigError`: settings that could not be loaded or failed validation

use std::path::PathBuf;

use thiserror::Error;

use crate::phase::PhaseId;

/// Fatal pipeline errors. Any of these aborts the run immediately.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Phase {phase} requires '{key}' but it is not on the blackboard")]
    MissingPrerequisite { phase: PhaseId, key: &'static str },

    #[error("Phase {phase} reads the run's archive or prompt and cannot run on its own")]
    NeedsRunInputs { phase: PhaseId },

    #[error("Phase {phase} produced malformed output: {reason}")]
    MalformedOutput { phase: PhaseId, reason: String },

    #[error("Generated artifact for {class_name} has a disallowed top-level {construct} at line {line}")]
    UnsafeTopLevel {
        class_name: String,
        construct: String,
        line: usize,
    },

    #[error("Generated artifact for {class_name} has an executable top-level expression at line {line}: {snippet}")]
    ExecutableExpression {
        class_name: String,
        line: usize,
        snippet: String,
    },

    #[error("Generated artifact for {class_name} is not valid Python (line {line}: {message})")]
    InvalidArtifactSyntax {
        class_name: String,
        line: usize,
        message: String,
    },

    #[error("Python interpreter `{program}` could not check the artifact: {reason}")]
    InterpreterUnavailable { program: String, reason: String },

    #[error("Refusing to overwrite existing file {path} in non-destructive mode")]
    RefusedOverwrite { path: PathBuf },

    #[error("Artifact never passed validation after {attempts} attempts: {last_log}")]
    AttemptsExhausted { attempts: u32, last_log: String },

    #[error("Failed to read archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Phase {phase} text generation failed: {source}")]
    Llm {
        phase: PhaseId,
        #[source]
        source: LlmError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Pipeline finished without producing a recap")]
    MissingFinalAnswer,
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(phase: PhaseId, reason: impl Into<String>) -> Self {
        PipelineError::MalformedOutput {
            phase,
            reason: reason.into(),
        }
    }
}

/// A failed static check. Not fatal on its own: the retry loop records the
/// log and regenerates until the attempt budget runs out.
#[derive(Debug, Clone, Error)]
#[error("validation failed: {log}")]
pub struct ValidationFailure {
    pub log: String,
}

impl ValidationFailure {
    pub fn new(log: impl Into<String>) -> Self {
        Self { log: log.into() }
    }
}

/// A model payload that did not fit the expected closed shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("no JSON object found in reply")]
    NoJsonObject,

    #[error("reply is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}, got {actual}")]
    WrongType {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid class name '{0}': must match [A-Z][A-Za-z0-9]+")]
    InvalidClassName(String),

    #[error("list is empty")]
    EmptyList,

    #[error("list has {count} entries, limit is {max}")]
    TooManyEntries { count: usize, max: usize },
}

impl SchemaError {
    pub(crate) fn in_phase(self, phase: PhaseId) -> PipelineError {
        PipelineError::malformed(phase, self.to_string())
    }
}

/// Errors from the text-generation collaborator.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Text generator misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("Scripted generator has no reply left for call {call}")]
    ScriptExhausted { call: usize },
}

/// Errors from loading and validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid settings: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prerequisite_names_phase_and_key() {
        let err = PipelineError::MissingPrerequisite {
            phase: PhaseId::PlanTasks,
            key: "constraints",
        };
        let msg = err.to_string();
        assert!(msg.contains("P3"));
        assert!(msg.contains("constraints"));
    }

    #[test]
    fn attempts_exhausted_carries_attempt_count() {
        let err = PipelineError::AttemptsExhausted {
            attempts: 4,
            last_log: "ImportError".into(),
        };
        match &err {
            PipelineError::AttemptsExhausted { attempts, .. } => assert_eq!(*attempts, 4),
            _ => panic!("Expected AttemptsExhausted"),
        }
        assert!(err.to_string().contains("4 attempts"));
    }

    #[test]
    fn schema_error_converts_to_malformed_output() {
        let err = SchemaError::MissingField("projectName").in_phase(PhaseId::ParseRequest);
        match &err {
            PipelineError::MalformedOutput { phase, reason } => {
                assert_eq!(*phase, PhaseId::ParseRequest);
                assert!(reason.contains("projectName"));
            }
            _ => panic!("Expected MalformedOutput"),
        }
    }

    #[test]
    fn unsafe_and_executable_variants_are_distinct() {
        let unsafe_err = PipelineError::UnsafeTopLevel {
            class_name: "Foo".into(),
            construct: "if_statement".into(),
            line: 3,
        };
        let exec_err = PipelineError::ExecutableExpression {
            class_name: "Foo".into(),
            line: 3,
            snippet: "main()".into(),
        };
        assert!(matches!(unsafe_err, PipelineError::UnsafeTopLevel { .. }));
        assert!(matches!(exec_err, PipelineError::ExecutableExpression { .. }));
        assert!(!matches!(exec_err, PipelineError::UnsafeTopLevel { .. }));
    }

    #[test]
    fn config_error_lists_every_problem() {
        let err = ConfigError::Invalid(vec!["a is bad".into(), "b is bad".into()]);
        assert_eq!(err.to_string(), "Invalid settings: a is bad; b is bad");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::MissingFinalAnswer);
        assert_std_error(&ValidationFailure::new("x"));
        assert_std_error(&SchemaError::EmptyList);
        assert_std_error(&LlmError::Transport("x".into()));
        assert_std_error(&ConfigError::Invalid(vec![]));
    }
}
