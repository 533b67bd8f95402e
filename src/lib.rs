//! patchforge: turn a code archive plus a natural-language change request
//! into a validated artifact, a unified diff and a markdown recap.

pub mod agents;
pub mod archive;
pub mod blackboard;
pub mod config;
pub mod errors;
pub mod gates;
pub mod llm;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod patch;
pub mod phase;
pub mod ranking;
pub mod server;
pub mod ui;
pub mod util;
