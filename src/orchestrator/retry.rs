//! Bounded generate/validate loop around the write and static-check phases.
//!
//! ```text
//!   Generate ──► Validate ──pass──► Success
//!      ▲            │
//!      └─ retry ◄───┤ fail, attempt < N
//!                   └─ fail, attempt == N ──► ExhaustedFailure
//! ```
//!
//! Termination is guaranteed by the attempt ceiling.

use async_trait::async_trait;
use tracing::{info, warn};

use super::PipelineObserver;
use crate::blackboard::Blackboard;
use crate::errors::{PipelineError, ValidationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Generate,
    Validate,
    Success,
    ExhaustedFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Run the refine step before each retry that follows a failure.
    pub refine_on_failure: bool,
}

/// The three steps the loop drives. Generation and refinement errors are
/// fatal; validation failures are recorded and retried.
#[async_trait]
pub trait AttemptSteps: Send + Sync {
    async fn refine(&self, bb: &mut Blackboard) -> Result<(), PipelineError>;
    async fn generate(&self, bb: &mut Blackboard) -> Result<(), PipelineError>;
    async fn validate(&self, bb: &Blackboard) -> Result<(), ValidationFailure>;
}

/// Drive `steps` until validation passes or the budget is spent.
///
/// On success `lint_error` is cleared and `attempts_used` recorded. Returns
/// the number of attempts used.
pub async fn run_loop(
    bb: &mut Blackboard,
    steps: &dyn AttemptSteps,
    policy: RetryPolicy,
    observer: &dyn PipelineObserver,
) -> Result<u32, PipelineError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    let mut state = LoopState::Generate;

    loop {
        state = match state {
            LoopState::Generate => {
                observer.attempt_started(attempt, max_attempts);
                if attempt > 1 && policy.refine_on_failure && bb.lint_error.is_some() {
                    steps.refine(bb).await?;
                }
                steps.generate(bb).await?;
                LoopState::Validate
            }
            LoopState::Validate => match steps.validate(bb).await {
                Ok(()) => LoopState::Success,
                Err(failure) => {
                    warn!(attempt, max_attempts, "validation failed");
                    observer.validation_failed(attempt, &failure.log);
                    bb.lint_error = Some(failure.log);
                    if attempt < max_attempts {
                        attempt += 1;
                        LoopState::Generate
                    } else {
                        LoopState::ExhaustedFailure
                    }
                }
            },
            LoopState::Success => {
                info!(attempts = attempt, "validation passed");
                bb.lint_error = None;
                bb.attempts_used = Some(attempt);
                return Ok(attempt);
            }
            LoopState::ExhaustedFailure => {
                bb.attempts_used = Some(attempt);
                return Err(PipelineError::AttemptsExhausted {
                    attempts: attempt,
                    last_log: bb.lint_error.clone().unwrap_or_default(),
                });
            }
        };
    }
}
