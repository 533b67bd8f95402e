//! D1: validate the working tree without running business logic.
//!
//! Two passes: CPython must compile every `.py` file under the source root,
//! then an import smoke test runs in a fresh process with a minimal
//! environment. Any failure is a [`ValidationFailure`], never fatal on its own.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::PhaseContext;
use crate::config::CheckSettings;
use crate::errors::ValidationFailure;
use crate::gates::interpreter::{self, CompileError, RunError};
use crate::phase::PhaseId;

const PHASE: PhaseId = PhaseId::StaticCheck;

/// pytest's "no tests were collected" status.
const PYTEST_NO_TESTS: i32 = 5;

pub async fn run(ctx: &PhaseContext) -> Result<(), ValidationFailure> {
    syntax_pass(&ctx.workdir, &ctx.source_root(), &ctx.settings.check).await?;
    smoke_test(&ctx.workdir, &ctx.settings.check).await?;
    info!(phase = %PHASE, "static checks passed");
    Ok(())
}

/// Compile every `.py` file under `source_root` with the configured
/// interpreter. A missing root has nothing to check.
pub async fn syntax_pass(
    workdir: &Path,
    source_root: &Path,
    check: &CheckSettings,
) -> Result<(), ValidationFailure> {
    if !source_root.is_dir() {
        debug!(root = %source_root.display(), "no source root; skipping syntax pass");
        return Ok(());
    }

    let files: Vec<String> = WalkDir::new(source_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "py"))
        .map(|e| {
            let path = e.path();
            path.strip_prefix(workdir).unwrap_or(path).display().to_string()
        })
        .collect();

    let timeout = Duration::from_secs(check.timeout_secs);
    let problems = match interpreter::compile_files(&check.python, &files, workdir, timeout).await {
        Ok(problems) => problems,
        Err(CompileError::Unavailable(reason)) => {
            return Err(ValidationFailure::new(format!(
                "---- syntax check `{}` (FAIL) ----\n{}",
                check.python, reason
            )));
        }
        Err(CompileError::Syntax(issue)) => vec![issue.to_string()],
    };

    debug!(files = files.len(), problems = problems.len(), "syntax pass finished");
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure::new(format!(
            "---- syntax check (FAIL) ----\n{}",
            problems.join("\n")
        )))
    }
}

fn render_log(title: &str, verdict: &str, stdout: &[u8], stderr: &[u8]) -> String {
    format!(
        "---- {} ({}) ----\nSTDOUT:\n{}\nSTDERR:\n{}",
        title,
        verdict,
        String::from_utf8_lossy(stdout).trim_end(),
        String::from_utf8_lossy(stderr).trim_end()
    )
}

/// Run the configured smoke command in `workdir`.
///
/// The child sees only `PATH`, `PYTHONPATH=<workdir>` and
/// `PYTHONDONTWRITEBYTECODE=1`, and is killed when the timeout expires.
pub async fn smoke_test(workdir: &Path, check: &CheckSettings) -> Result<(), ValidationFailure> {
    let Some((program, args)) = check.smoke_command.split_first() else {
        return Err(ValidationFailure::new("smoke test command is empty"));
    };
    let title = format!("smoke test `{}`", check.smoke_command.join(" "));

    let timeout = Duration::from_secs(check.timeout_secs);
    let output = match interpreter::run_isolated(program, args, workdir, None, timeout).await {
        Ok(output) => output,
        Err(RunError::Timeout) => {
            warn!(phase = %PHASE, timeout_secs = check.timeout_secs, "smoke test timed out");
            return Err(ValidationFailure::new(format!(
                "---- {} (TIMEOUT) ----\nkilled after {}s",
                title, check.timeout_secs
            )));
        }
        Err(e) => {
            return Err(ValidationFailure::new(format!(
                "---- {} (FAIL) ----\n{}",
                title, e
            )));
        }
    };

    match output.status.code() {
        Some(0) | Some(PYTEST_NO_TESTS) => {
            debug!(status = ?output.status.code(), "smoke test passed");
            Ok(())
        }
        code => {
            let verdict = match code {
                Some(code) => format!("FAIL, exit {}", code),
                None => "FAIL, killed by signal".to_string(),
            };
            Err(ValidationFailure::new(render_log(
                &title,
                &verdict,
                &output.stdout,
                &output.stderr,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn check(cmd: &[&str], timeout_secs: u64) -> CheckSettings {
        CheckSettings {
            smoke_command: cmd.iter().map(|s| s.to_string()).collect(),
            timeout_secs,
            ..CheckSettings::default()
        }
    }

    #[tokio::test]
    async fn syntax_pass_reports_file_and_line() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("agents")).unwrap();
        fs::write(src.join("ok.py"), "x = 1\n").unwrap();
        fs::write(src.join("agents/broken.py"), "x = 1\ndef f(:\n    pass\n").unwrap();
        fs::write(src.join("notes.txt"), "def (").unwrap();

        let failure = syntax_pass(dir.path(), &src, &check(&["true"], 30))
            .await
            .unwrap_err();
        assert!(failure.log.contains("src/agents/broken.py:2:"), "{}", failure.log);
        assert!(!failure.log.contains("ok.py"));
        assert!(!failure.log.contains("notes.txt"));
    }

    #[tokio::test]
    async fn syntax_pass_rejects_what_only_cpython_refuses() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("legacy.py"), "def run():\n    print \"hello\"\n").unwrap();
        fs::write(src.join("params.py"), "def f(a, a):\n    pass\n").unwrap();

        let failure = syntax_pass(dir.path(), &src, &check(&["true"], 30))
            .await
            .unwrap_err();
        assert!(failure.log.starts_with("---- syntax check (FAIL) ----"));
        assert!(failure.log.contains("src/legacy.py:2:"), "{}", failure.log);
        assert!(failure.log.contains("src/params.py:1: duplicate argument 'a'"), "{}", failure.log);
        assert!(!src.join("__pycache__").exists());
    }

    #[tokio::test]
    async fn syntax_pass_without_source_root_passes() {
        let dir = tempdir().unwrap();
        syntax_pass(dir.path(), &dir.path().join("src"), &check(&["true"], 30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn syntax_pass_without_interpreter_fails_validation() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("ok.py"), "x = 1\n").unwrap();
        let mut settings = check(&["true"], 30);
        settings.python = "patchforge-no-such-python".to_string();

        let failure = syntax_pass(dir.path(), &src, &settings).await.unwrap_err();
        assert!(failure.log.contains("patchforge-no-such-python"));
        assert!(failure.log.contains("failed to start"));
    }

    #[tokio::test]
    async fn empty_command_fails_validation() {
        let dir = tempdir().unwrap();
        let failure = smoke_test(dir.path(), &check(&[], 5)).await.unwrap_err();
        assert!(failure.log.contains("empty"));
    }

    #[tokio::test]
    async fn missing_program_fails_validation() {
        let dir = tempdir().unwrap();
        let failure = smoke_test(dir.path(), &check(&["patchforge-no-such-program"], 5))
            .await
            .unwrap_err();
        assert!(failure.log.contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_codes_zero_and_five_pass() {
        let dir = tempdir().unwrap();
        smoke_test(dir.path(), &check(&["true"], 5)).await.unwrap();
        smoke_test(dir.path(), &check(&["sh", "-c", "exit 5"], 5))
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_log_captures_both_streams() {
        let dir = tempdir().unwrap();
        let failure = smoke_test(
            dir.path(),
            &check(&["sh", "-c", "echo collected; echo ImportError >&2; exit 2"], 5),
        )
        .await
        .unwrap_err();
        assert!(failure.log.contains("FAIL, exit 2"));
        assert!(failure.log.contains("STDOUT:\ncollected"));
        assert!(failure.log.contains("STDERR:\nImportError"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_sees_minimal_environment() {
        let dir = tempdir().unwrap();
        let failure = smoke_test(dir.path(), &check(&["sh", "-c", "env; exit 1"], 5))
            .await
            .unwrap_err();
        assert!(failure.log.contains("PYTHONDONTWRITEBYTECODE=1"));
        assert!(failure.log.contains(&format!("PYTHONPATH={}", dir.path().display())));
        assert!(!failure.log.contains("CARGO_PKG_NAME"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_a_validation_failure() {
        let dir = tempdir().unwrap();
        let failure = smoke_test(dir.path(), &check(&["sleep", "5"], 1))
            .await
            .unwrap_err();
        assert!(failure.log.contains("TIMEOUT"));
    }
}
