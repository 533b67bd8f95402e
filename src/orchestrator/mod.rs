//! Pipeline execution: the ordered phase table and the retry loop.

pub mod retry;
pub mod runner;

use crate::phase::Step;

pub use retry::{AttemptSteps, LoopState, RetryPolicy, run_loop};
pub use runner::Pipeline;

/// Progress callbacks. Every method defaults to doing nothing.
pub trait PipelineObserver: Send + Sync {
    fn step_started(&self, _step: Step, _index: usize, _total: usize) {}
    fn step_finished(&self, _step: Step) {}
    fn attempt_started(&self, _attempt: u32, _max_attempts: u32) {}
    fn validation_failed(&self, _attempt: u32, _log: &str) {}
    fn run_finished(&self, _success: bool) {}
}

/// Observer for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
