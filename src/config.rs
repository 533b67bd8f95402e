//! Layered settings for patchforge.
//!
//! Settings are resolved in order: built-in defaults, then
//! `<workdir>/.patchforge/patchforge.toml`, then `PATCHFORGE_*` environment
//! variables (after `.env` has been loaded by the binary), then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! log_level = "warn"
//! log_format = "text"
//!
//! [llm]
//! base_url = "http://localhost:8000/v1"
//! model = "granite-20b-chat"
//! api_key_env = "PATCHFORGE_API_KEY"
//! temperature = 0.2
//! codegen = "template"
//!
//! [pipeline]
//! max_attempts = 4
//! max_tasks = 25
//! preview_bytes = 120
//! artifact_dir = "src/agents"
//! refine_on_failure = false
//!
//! [check]
//! smoke_command = ["python3", "-m", "pytest", "--collect-only", "-q"]
//! timeout_secs = 120
//! python = "python3"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 9000
//! max_upload_bytes = 26214400
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Directory holding the settings file, relative to the working directory.
pub const CONFIG_DIR: &str = ".patchforge";
/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "patchforge.toml";

/// How the write-artifact phase produces source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodegenMode {
    /// Deterministic class skeleton rendered from the feature spec.
    #[default]
    Template,
    /// Ask the text generator for the whole file.
    Llm,
}

impl std::str::FromStr for CodegenMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "template" => Ok(CodegenMode::Template),
            "llm" => Ok(CodegenMode::Llm),
            _ => Err(ConfigError::InvalidValue {
                key: "llm.codegen".into(),
                reason: format!("'{}' is not one of: template, llm", s),
            }),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible API root; `/chat/completions` and `/embeddings` are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Temperature for open-ended phases. Extraction phases always use 0.0.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Enables embedding ranking for architecture lookup when set.
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub codegen: CodegenMode,
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_api_key_env() -> String {
    "PATCHFORGE_API_KEY".to_string()
}

fn default_model() -> String {
    "granite-20b-chat".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            embedding_model: None,
            codegen: CodegenMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Generate/validate attempts before the run is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Bytes of each archive entry read for its preview line.
    #[serde(default = "default_preview_bytes")]
    pub preview_bytes: usize,
    /// Where new artifacts are placed, relative to the working tree.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
    /// Subtree whose `.py` files are syntax-checked.
    #[serde(default = "default_source_root")]
    pub source_root: String,
    /// Snippets kept by architecture lookup.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Rewrite the task list from the failure log before each retry.
    #[serde(default)]
    pub refine_on_failure: bool,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_max_tasks() -> usize {
    25
}

fn default_preview_bytes() -> usize {
    120
}

fn default_artifact_dir() -> String {
    "src/agents".to_string()
}

fn default_source_root() -> String {
    "src".to_string()
}

fn default_top_k() -> usize {
    5
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_tasks: default_max_tasks(),
            preview_bytes: default_preview_bytes(),
            artifact_dir: default_artifact_dir(),
            source_root: default_source_root(),
            top_k: default_top_k(),
            refine_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSettings {
    /// Program and arguments of the import smoke test.
    #[serde(default = "default_smoke_command")]
    pub smoke_command: Vec<String>,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
    /// Interpreter used to compile artifacts and the source tree.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_smoke_command() -> Vec<String> {
    ["python3", "-m", "pytest", "--collect-only", "-q"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_check_timeout_secs() -> u64 {
    120
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            smoke_command: default_smoke_command(),
            timeout_secs: default_check_timeout_secs(),
            python: default_python(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Complete settings for one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub check: CheckSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            llm: LlmSettings::default(),
            pipeline: PipelineSettings::default(),
            check: CheckSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load `<workdir>/.patchforge/patchforge.toml`, or defaults if it does not exist.
    pub fn load_or_default(workdir: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_path(workdir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path(workdir: &Path) -> PathBuf {
        workdir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Full resolution: file (or defaults), environment overrides, then validation.
    pub fn resolve<F>(workdir: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::load_or_default(workdir)?;
        settings.apply_env(lookup)?;
        settings.ensure_valid()?;
        Ok(settings)
    }

    /// Apply `PATCHFORGE_*` overrides. `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PATCHFORGE_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("PATCHFORGE_LOG_FORMAT") {
            self.log_format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                _ => return Err(invalid("PATCHFORGE_LOG_FORMAT", &v, "text or json")),
            };
        }
        if let Some(v) = lookup("PATCHFORGE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("PATCHFORGE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("PATCHFORGE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("PATCHFORGE_LLM_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("PATCHFORGE_EMBEDDING_MODEL") {
            self.llm.embedding_model = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("PATCHFORGE_CODEGEN") {
            self.llm.codegen = v.parse()?;
        }
        if let Some(v) = lookup("PATCHFORGE_MAX_ATTEMPTS") {
            self.pipeline.max_attempts = parse_env("PATCHFORGE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("PATCHFORGE_PREVIEW_BYTES") {
            self.pipeline.preview_bytes = parse_env("PATCHFORGE_PREVIEW_BYTES", &v)?;
        }
        if let Some(v) = lookup("PATCHFORGE_REFINE_ON_FAILURE") {
            self.pipeline.refine_on_failure = parse_env("PATCHFORGE_REFINE_ON_FAILURE", &v)?;
        }
        if let Some(v) = lookup("PATCHFORGE_SMOKE_COMMAND") {
            self.check.smoke_command = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = lookup("PATCHFORGE_PYTHON") {
            self.check.python = v;
        }
        if let Some(v) = lookup("PATCHFORGE_PORT") {
            self.server.port = parse_env("PATCHFORGE_PORT", &v)?;
        }
        if let Some(v) = lookup("PATCHFORGE_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_env("PATCHFORGE_MAX_UPLOAD_BYTES", &v)?;
        }
        Ok(())
    }

    /// Range checks. Returns one message per problem; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !(0.0..=1.0).contains(&self.llm.temperature) {
            problems.push(format!(
                "llm.temperature {} is outside 0.0..=1.0",
                self.llm.temperature
            ));
        }
        if self.llm.model.trim().is_empty() {
            problems.push("llm.model must not be empty".to_string());
        }
        if !(1..=10).contains(&self.pipeline.max_attempts) {
            problems.push(format!(
                "pipeline.max_attempts {} is outside 1..=10",
                self.pipeline.max_attempts
            ));
        }
        if !(32..=4096).contains(&self.pipeline.preview_bytes) {
            problems.push(format!(
                "pipeline.preview_bytes {} is outside 32..=4096",
                self.pipeline.preview_bytes
            ));
        }
        if self.pipeline.max_tasks == 0 {
            problems.push("pipeline.max_tasks must be at least 1".to_string());
        }
        if Path::new(&self.pipeline.artifact_dir).is_absolute() {
            problems.push(format!(
                "pipeline.artifact_dir '{}' must be relative to the working tree",
                self.pipeline.artifact_dir
            ));
        }
        if self.check.smoke_command.is_empty() {
            problems.push("check.smoke_command must name a program".to_string());
        }
        if self.check.python.trim().is_empty() {
            problems.push("check.python must name an interpreter".to_string());
        }
        if self.check.timeout_secs == 0 {
            problems.push("check.timeout_secs must be at least 1".to_string());
        }

        problems
    }

    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, std::any::type_name::<T>()))
}

fn invalid(key: &str, value: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{}' is not a valid {}", value, expected),
    }
}
