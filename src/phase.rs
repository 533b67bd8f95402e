//! Phase identifiers and the ordered pipeline table.
//!
//! Codes (`Z`, `P0`..`P6`, `D1`, `R`) are what logs and error messages show.

use std::fmt;

/// Identifier of one pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseId {
    ScanArchive,
    AttachPrompt,
    ParseRequest,
    ArchitectureLookup,
    PlanTasks,
    DesignFeature,
    WriteArtifact,
    StaticCheck,
    SelfRefine,
    AssembleRecap,
}

impl PhaseId {
    pub fn code(&self) -> &'static str {
        match self {
            PhaseId::ScanArchive => "Z",
            PhaseId::AttachPrompt => "P0",
            PhaseId::ParseRequest => "P1",
            PhaseId::ArchitectureLookup => "P2",
            PhaseId::PlanTasks => "P3",
            PhaseId::DesignFeature => "P4",
            PhaseId::WriteArtifact => "P5",
            PhaseId::StaticCheck => "D1",
            PhaseId::SelfRefine => "R",
            PhaseId::AssembleRecap => "P6",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhaseId::ScanArchive => "scan-archive",
            PhaseId::AttachPrompt => "attach-prompt",
            PhaseId::ParseRequest => "parse-request",
            PhaseId::ArchitectureLookup => "architecture-lookup",
            PhaseId::PlanTasks => "plan-tasks",
            PhaseId::DesignFeature => "design-feature",
            PhaseId::WriteArtifact => "write-artifact",
            PhaseId::StaticCheck => "static-check",
            PhaseId::SelfRefine => "self-refine",
            PhaseId::AssembleRecap => "assemble-recap",
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.name())
    }
}

/// One step of the top-level pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A single phase run once.
    Phase(PhaseId),
    /// The bounded write-artifact / static-check loop.
    WriteAndCheck,
}

impl Step {
    pub fn label(&self) -> String {
        match self {
            Step::Phase(id) => id.to_string(),
            Step::WriteAndCheck => format!(
                "{} + {} loop",
                PhaseId::WriteArtifact,
                PhaseId::StaticCheck.code()
            ),
        }
    }
}

/// The fixed execution order. Nothing is skipped and nothing runs twice
/// except inside the `WriteAndCheck` loop.
pub const PIPELINE: [Step; 8] = [
    Step::Phase(PhaseId::ScanArchive),
    Step::Phase(PhaseId::AttachPrompt),
    Step::Phase(PhaseId::ParseRequest),
    Step::Phase(PhaseId::ArchitectureLookup),
    Step::Phase(PhaseId::PlanTasks),
    Step::Phase(PhaseId::DesignFeature),
    Step::WriteAndCheck,
    Step::Phase(PhaseId::AssembleRecap),
];
