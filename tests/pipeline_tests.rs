//! End-to-end pipeline runs against a scripted text generator.
//!
//! Each test stages a zip and a fresh working tree, then drives the full
//! phase sequence through `Pipeline::run_on`.

#![cfg(unix)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use patchforge::blackboard::Blackboard;
use patchforge::config::{CodegenMode, Settings};
use patchforge::errors::PipelineError;
use patchforge::llm::ScriptedGenerator;
use patchforge::orchestrator::Pipeline;

const CONSTRAINTS: &str =
    r#"{"projectName": "demo", "nonDestructive": true, "wantsNewAgent": true}"#;
const OPT_OUT: &str =
    r#"{"projectName": "demo", "nonDestructive": true, "wantsNewAgent": false}"#;
const TASKS: &str = "1. Create the SampleAgent module\n2. Register it with the runner";
const FEATURE: &str = r#"{"className": "SampleAgent", "runSignature": "async def run(self, payload: dict) -> list", "purpose": "Collects sample data."}"#;

struct Fixture {
    _dir: TempDir,
    workdir: PathBuf,
    archive: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let workdir = dir.path().join("tree");
    fs::create_dir_all(workdir.join("src")).unwrap();
    fs::write(workdir.join("src/__init__.py"), "").unwrap();

    let archive = dir.path().join("repo.zip");
    write_zip(
        &archive,
        &[
            ("README.md", "# Demo\n\nA small agent runner.\n"),
            ("src/__init__.py", ""),
        ],
    );
    Fixture {
        _dir: dir,
        workdir,
        archive,
    }
}

fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    fs::write(path, writer.finish().unwrap().into_inner()).unwrap();
}

fn settings(smoke: &[&str]) -> Settings {
    let mut settings = Settings::default();
    settings.check.smoke_command = smoke.iter().map(|s| s.to_string()).collect();
    settings
}

#[tokio::test]
async fn creates_new_agent_and_recaps() {
    let fx = fixture();
    let generator = Arc::new(ScriptedGenerator::new([CONSTRAINTS, TASKS, FEATURE]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings(&["true"]), generator.clone());

    let mut bb = Blackboard::new();
    let recap = pipeline
        .run_on(&mut bb, &fx.archive, "Add a SampleAgent that collects sample data")
        .await
        .unwrap();

    assert!(recap.contains("New agent added"));
    assert!(recap.to_lowercase().contains("sampleagent.py"));
    assert!(recap.contains("Validation passed after 1 attempt(s)."));

    let written = fs::read_to_string(fx.workdir.join("src/agents/sampleagent.py")).unwrap();
    assert!(written.contains("class SampleAgent"));
    assert!(bb.latest_diff.unwrap().contains("+class SampleAgent"));
    assert_eq!(generator.remaining(), 0);
}

#[tokio::test]
async fn readme_only_archive_into_empty_tree_adds_agent() {
    let dir = TempDir::new().unwrap();
    let workdir = dir.path().join("empty");
    fs::create_dir(&workdir).unwrap();
    let archive = dir.path().join("readme-only.zip");
    write_zip(&archive, &[("README.md", "# Demo\n\nA small agent runner.\n")]);
    let generator = Arc::new(ScriptedGenerator::new([CONSTRAINTS, TASKS, FEATURE]));
    let pipeline = Pipeline::with_generator(&workdir, settings(&["true"]), generator);

    let recap = pipeline
        .run(&archive, "Add a new helper agent called SampleAgent")
        .await
        .unwrap();

    assert!(recap.contains("New agent added"));
    assert!(recap.to_lowercase().contains("sampleagent.py"));
    assert!(workdir.join("src/agents/sampleagent.py").is_file());
}

#[tokio::test]
async fn opt_out_writes_nothing() {
    let fx = fixture();
    let generator = Arc::new(ScriptedGenerator::new([OPT_OUT, TASKS]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings(&["true"]), generator.clone());

    let recap = pipeline
        .run(&fx.archive, "Tidy up the README")
        .await
        .unwrap();

    assert!(recap.starts_with("## No new agent requested"));
    assert!(!fx.workdir.join("src/agents").exists());
    assert_eq!(generator.calls().len(), 2);
}

#[tokio::test]
async fn failing_smoke_test_exhausts_attempts() {
    let fx = fixture();
    let mut settings = settings(&["false"]);
    settings.pipeline.max_attempts = 2;
    let generator = Arc::new(ScriptedGenerator::new([CONSTRAINTS, TASKS, FEATURE]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings, generator);

    let err = pipeline
        .run(&fx.archive, "Add a SampleAgent")
        .await
        .unwrap_err();

    match err {
        PipelineError::AttemptsExhausted { attempts, last_log } => {
            assert_eq!(attempts, 2);
            assert!(last_log.contains("FAIL, exit 1"));
        }
        other => panic!("Expected AttemptsExhausted, got {:?}", other),
    }
    // The artifact from the last attempt stays in place for inspection.
    assert!(fx.workdir.join("src/agents/sampleagent.py").exists());
}

#[tokio::test]
async fn too_many_tasks_is_fatal() {
    let fx = fixture();
    let tasks: String = (1..=26).map(|i| format!("{}. Task number {}\n", i, i)).collect();
    let generator = Arc::new(ScriptedGenerator::new([CONSTRAINTS.to_string(), tasks]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings(&["true"]), generator);

    let err = pipeline.run(&fx.archive, "Add a SampleAgent").await.unwrap_err();

    assert!(matches!(err, PipelineError::MalformedOutput { .. }));
    assert!(err.to_string().contains("26"));
    assert!(!fx.workdir.join("src/agents").exists());
}

#[tokio::test]
async fn model_written_code_with_top_level_call_is_rejected() {
    let fx = fixture();
    let mut settings = settings(&["true"]);
    settings.llm.codegen = CodegenMode::Llm;
    let code = "```python\nimport os\n\nos.system(\"echo hi\")\n\nclass SampleAgent:\n    pass\n```";
    let generator = Arc::new(ScriptedGenerator::new([CONSTRAINTS, TASKS, FEATURE, code]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings, generator);

    let err = pipeline.run(&fx.archive, "Add a SampleAgent").await.unwrap_err();

    match err {
        PipelineError::ExecutableExpression { class_name, line, .. } => {
            assert_eq!(class_name, "SampleAgent");
            assert_eq!(line, 3);
        }
        other => panic!("Expected ExecutableExpression, got {:?}", other),
    }
    assert!(!fx.workdir.join("src/agents/sampleagent.py").exists());
}

#[tokio::test]
async fn model_written_python2_code_is_rejected() {
    let fx = fixture();
    let mut settings = settings(&["true"]);
    settings.llm.codegen = CodegenMode::Llm;
    let code = "```python\nclass SampleAgent:\n    async def run(self, payload: dict) -> list:\n        print \"collecting\"\n        return []\n```";
    let generator = Arc::new(ScriptedGenerator::new([CONSTRAINTS, TASKS, FEATURE, code]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings, generator);

    let err = pipeline.run(&fx.archive, "Add a SampleAgent").await.unwrap_err();

    match err {
        PipelineError::InvalidArtifactSyntax {
            class_name, line, ..
        } => {
            assert_eq!(class_name, "SampleAgent");
            assert_eq!(line, 3);
        }
        other => panic!("Expected InvalidArtifactSyntax, got {:?}", other),
    }
    assert!(!fx.workdir.join("src/agents/sampleagent.py").exists());
}

#[tokio::test]
async fn refinement_feeds_retry_after_failed_check() {
    let fx = fixture();
    let mut settings = settings(&[
        "sh",
        "-c",
        "test -f .smoke-ok || { touch .smoke-ok; echo first run fails >&2; exit 1; }",
    ]);
    settings.pipeline.refine_on_failure = true;
    let generator = Arc::new(ScriptedGenerator::new([
        CONSTRAINTS,
        TASKS,
        FEATURE,
        "- Create the SampleAgent module\n- Make the smoke test pass",
    ]));
    let pipeline = Pipeline::with_generator(&fx.workdir, settings, generator.clone());

    let mut bb = Blackboard::new();
    let recap = pipeline
        .run_on(&mut bb, &fx.archive, "Add a SampleAgent")
        .await
        .unwrap();

    assert!(recap.contains("Validation passed after 2 attempt(s)."));
    assert!(bb.lint_error.is_none());
    let tasks = bb.tasks.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().any(|t| t.contains("smoke test")));

    let calls = generator.calls();
    assert_eq!(calls.len(), 4);
    assert!(
        calls[3]
            .messages
            .iter()
            .any(|m| m.content.contains("first run fails"))
    );
}
