use crate::orchestrator::PipelineObserver;
use crate::phase::Step;
use crate::ui::icons::{CHECK, CROSS, RETRY};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal progress for one pipeline run, rendered via `indicatif` on stderr.
///
/// Two bars are stacked vertically:
/// - Step bar: how many pipeline steps have completed
/// - Attempt bar: spinner for the current write/check attempt
///
/// Stdout is left untouched so the recap can be piped.
pub struct PipelineProgress {
    multi: MultiProgress,
    step_bar: ProgressBar,
    attempt_bar: ProgressBar,
    verbose: bool,
    max_attempts: AtomicU32,
}

impl PipelineProgress {
    /// Create the UI sized for `total_steps`.
    ///
    /// When `verbose` is set, validation failure logs are echoed in full.
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("  Steps");

        let attempt_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let attempt_bar = multi.add(ProgressBar::new_spinner());
        attempt_bar.set_style(attempt_style);
        attempt_bar.set_prefix("Attempt");

        Self {
            multi,
            step_bar,
            attempt_bar,
            verbose,
            max_attempts: AtomicU32::new(0),
        }
    }

    /// Print a line above the bars, falling back to `eprintln!` if drawing fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }
}

impl PipelineObserver for PipelineProgress {
    fn step_started(&self, step: Step, index: usize, total: usize) {
        self.step_bar.set_message(format!(
            "{} {}",
            style(format!("[{}/{}]", index + 1, total)).dim(),
            style(step.label()).yellow()
        ));
    }

    fn step_finished(&self, step: Step) {
        self.step_bar.inc(1);
        if self.verbose {
            self.print_line(format!("{}{}", CHECK, step.label()));
        }
    }

    fn attempt_started(&self, attempt: u32, max_attempts: u32) {
        self.max_attempts.store(max_attempts, Ordering::SeqCst);
        self.attempt_bar.set_message(format!(
            "write + check {}/{}",
            style(attempt).cyan(),
            max_attempts
        ));
        self.attempt_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    fn validation_failed(&self, attempt: u32, log: &str) {
        let max = self.max_attempts.load(Ordering::SeqCst);
        let first = log.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        self.print_line(format!(
            "    {}attempt {}/{} failed validation: {}",
            RETRY,
            attempt,
            max,
            style(first).red()
        ));
        if self.verbose {
            for line in log.lines() {
                self.print_line(format!("      {}", style(line).dim()));
            }
        }
    }

    fn run_finished(&self, success: bool) {
        if success {
            self.attempt_bar.finish_and_clear();
            self.step_bar
                .finish_with_message(format!("{}{}", CHECK, style("recap ready").green()));
        } else {
            self.attempt_bar.abandon();
            self.step_bar
                .abandon_with_message(format!("{}{}", CROSS, style("pipeline aborted").red()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{PIPELINE, PhaseId};

    #[test]
    fn steps_advance_the_bar() {
        let ui = PipelineProgress::new(PIPELINE.len() as u64, false);
        ui.step_started(Step::Phase(PhaseId::ScanArchive), 0, PIPELINE.len());
        ui.step_finished(Step::Phase(PhaseId::ScanArchive));
        assert_eq!(ui.step_bar.position(), 1);
    }

    #[test]
    fn attempts_and_failures_do_not_panic() {
        let ui = PipelineProgress::new(1, true);
        ui.attempt_started(1, 4);
        ui.validation_failed(1, "\n---- smoke test (FAIL, exit 2) ----\nImportError");
        ui.run_finished(false);
        assert_eq!(ui.max_attempts.load(Ordering::SeqCst), 4);
    }
}
