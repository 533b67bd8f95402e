//! CPython-backed checks and the isolated child process they run in.
//!
//! tree-sitter accepts some sources CPython refuses (duplicate parameters,
//! misplaced `return`, and so on), so the final word on syntax belongs to
//! the interpreter's own `compile()`. Both checks run the interpreter in
//! isolated mode (`-I`), so neither the working tree nor `PYTHONPATH` is
//! importable. Nothing is executed and no bytecode is written.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::python::SyntaxIssue;

/// Compile stdin; on failure print `line<TAB>column<TAB>message`.
const COMPILE_SOURCE: &str = "\
import sys
try:
    compile(sys.stdin.buffer.read(), '<artifact>', 'exec', dont_inherit=True)
except (SyntaxError, ValueError) as e:
    print(f\"{getattr(e, 'lineno', 0) or 0}\\t{getattr(e, 'offset', 0) or 0}\\t{getattr(e, 'msg', None) or e}\")
    sys.exit(1)
";

/// Compile every path in argv; print `path:line: message` per failure.
const COMPILE_FILES: &str = "\
import sys
failed = False
for path in sys.argv[1:]:
    try:
        with open(path, 'rb') as fh:
            compile(fh.read(), path, 'exec', dont_inherit=True)
    except (SyntaxError, ValueError) as e:
        failed = True
        print(f\"{path}:{getattr(e, 'lineno', 0) or 0}: {getattr(e, 'msg', None) or e}\")
sys.exit(1 if failed else 0)
";

/// Why an isolated child produced no usable output.
#[derive(Debug)]
pub enum RunError {
    Start(std::io::Error),
    Collect(std::io::Error),
    Timeout,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Start(e) => write!(f, "failed to start: {}", e),
            RunError::Collect(e) => write!(f, "failed to collect output: {}", e),
            RunError::Timeout => write!(f, "timed out"),
        }
    }
}

/// Why a compile check could not reach a verdict.
#[derive(Debug)]
pub enum CompileError {
    /// CPython rejected the source.
    Syntax(SyntaxIssue),
    Unavailable(String),
}

/// Run `program args` in `workdir` with only `PATH`, `PYTHONPATH=<workdir>`
/// and `PYTHONDONTWRITEBYTECODE=1` set. The child is killed on timeout.
pub async fn run_isolated<I, S>(
    program: &str,
    args: I,
    workdir: &Path,
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<Output, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(workdir)
        .env_clear()
        .env("PYTHONPATH", workdir)
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }

    let mut child = command.spawn().map_err(RunError::Start)?;
    let run = async move {
        if let Some(input) = input
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input).await?;
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(RunError::Collect(e)),
        Err(_) => Err(RunError::Timeout),
    }
}

/// Ask CPython to compile `source` as a module. Needs no working tree.
pub async fn compile_source(
    python: &str,
    source: &str,
    timeout: Duration,
) -> Result<(), CompileError> {
    let output = run_isolated(
        python,
        ["-I", "-c", COMPILE_SOURCE],
        &std::env::temp_dir(),
        Some(source.as_bytes()),
        timeout,
    )
    .await
    .map_err(|e| CompileError::Unavailable(e.to_string()))?;

    if output.status.success() {
        return Ok(());
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_issue(stdout.lines().next().unwrap_or("")) {
        Some(issue) => Err(CompileError::Syntax(issue)),
        None => Err(CompileError::Unavailable(format!(
            "exit {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}

/// Compile each of `files` (paths relative to `workdir`). Returns one
/// `path:line: message` entry per rejected file; empty means all compiled.
pub async fn compile_files(
    python: &str,
    files: &[String],
    workdir: &Path,
    timeout: Duration,
) -> Result<Vec<String>, CompileError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let args = ["-I", "-c", COMPILE_FILES]
        .into_iter()
        .chain(files.iter().map(String::as_str));
    let output = run_isolated(python, args, workdir, None, timeout)
        .await
        .map_err(|e| CompileError::Unavailable(e.to_string()))?;

    let problems: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    debug!(files = files.len(), problems = problems.len(), "compile pass finished");
    if output.status.success() {
        Ok(Vec::new())
    } else if problems.is_empty() {
        Err(CompileError::Unavailable(format!(
            "exit {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    } else {
        Ok(problems)
    }
}

fn parse_issue(line: &str) -> Option<SyntaxIssue> {
    let mut parts = line.splitn(3, '\t');
    let line_no = parts.next()?.trim().parse().ok()?;
    let column = parts.next()?.trim().parse().ok()?;
    let message = parts.next()?.trim().to_string();
    Some(SyntaxIssue {
        line: line_no,
        column,
        message,
    })
}
