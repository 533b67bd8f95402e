//! Closed types for everything that crosses a phase boundary.
//!
//! Model replies are parsed into `serde_json::Value` first and then validated
//! into these types; untyped data never leaves a phase except the explicit
//! pass-through map on [`Constraints`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::SchemaError;

/// Name of a JSON value's type, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object<'a>(value: &'a Value) -> Result<&'a Map<String, Value>, SchemaError> {
    value.as_object().ok_or(SchemaError::WrongType {
        field: "<root>".into(),
        expected: "object",
        actual: json_type_name(value),
    })
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, SchemaError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(SchemaError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(SchemaError::WrongType {
            field: field.into(),
            expected: "string",
            actual: json_type_name(other),
        }),
    }
}

fn required_bool(obj: &Map<String, Value>, field: &'static str) -> Result<bool, SchemaError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(SchemaError::MissingField(field)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(SchemaError::WrongType {
            field: field.into(),
            expected: "boolean",
            actual: json_type_name(other),
        }),
    }
}

/// Structured form of the user's request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    pub project_name: String,
    pub non_destructive: bool,
    pub wants_new_agent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
    /// Any other keys the model returned, passed through unvalidated.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Constraints {
    const KNOWN: [&'static str; 4] = ["projectName", "nonDestructive", "wantsNewAgent", "brief"];

    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let obj = as_object(value)?;
        let project_name = required_str(obj, "projectName")?;
        let non_destructive = required_bool(obj, "nonDestructive")?;
        let wants_new_agent = required_bool(obj, "wantsNewAgent")?;
        let brief = match obj.get("brief") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(SchemaError::WrongType {
                    field: "brief".into(),
                    expected: "string",
                    actual: json_type_name(other),
                });
            }
        };
        let extra = obj
            .iter()
            .filter(|(k, _)| !Self::KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            project_name,
            non_destructive,
            wants_new_agent,
            brief,
            extra,
        })
    }

    /// Pretty JSON used when the constraints are quoted back into a prompt.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Ordered, non-empty, bounded list of short imperative tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskList(Vec<String>);

impl TaskList {
    /// Validate a list. More than `max` entries is an error, never a truncation.
    pub fn new(tasks: Vec<String>, max: usize) -> Result<Self, SchemaError> {
        let tasks: Vec<String> = tasks
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tasks.is_empty() {
            return Err(SchemaError::EmptyList);
        }
        if tasks.len() > max {
            return Err(SchemaError::TooManyEntries {
                count: tasks.len(),
                max,
            });
        }
        Ok(Self(tasks))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Render as a `- ` bullet list, one task per line.
    pub fn to_bullets(&self) -> String {
        self.0
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A class name matching `[A-Z][A-Za-z0-9]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassName(String);

impl ClassName {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let mut chars = raw.chars();
        let valid = match chars.next() {
            Some(first) if first.is_ascii_uppercase() => {
                let rest = chars.as_str();
                !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric())
            }
            _ => false,
        };
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(SchemaError::InvalidClassName(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Module file name for this class, e.g. `SampleAgent` -> `sampleagent.py`.
    pub fn module_file_name(&self) -> String {
        format!("{}.py", self.0.to_lowercase())
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Description of one new source artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Path relative to the working tree. Always derived from the class name.
    pub file: PathBuf,
    pub class_name: ClassName,
    /// A complete `def`/`async def` header ending in `:`.
    pub run_signature: String,
    pub purpose: String,
}

impl ArtifactSpec {
    pub fn new(
        class_name: ClassName,
        run_signature: &str,
        purpose: &str,
        artifact_dir: &Path,
    ) -> Result<Self, SchemaError> {
        let run_signature = normalize_signature(run_signature)?;
        let file = artifact_dir.join(class_name.module_file_name());
        Ok(Self {
            file,
            class_name,
            run_signature,
            purpose: purpose.trim().to_string(),
        })
    }

    /// Validate a model reply. Any `file` key in the reply is ignored.
    pub fn from_value(value: &Value, artifact_dir: &Path) -> Result<Self, SchemaError> {
        let obj = as_object(value)?;
        let class_name = ClassName::parse(required_str(obj, "className")?.trim())?;
        let run_signature = required_str(obj, "runSignature")?;
        let purpose = required_str(obj, "purpose")?;
        Self::new(class_name, &run_signature, &purpose, artifact_dir)
    }

    /// `file` with forward slashes, as shown in recaps and diffs.
    pub fn display_path(&self) -> String {
        self.file
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn normalize_signature(raw: &str) -> Result<String, SchemaError> {
    let mut sig = raw.trim().trim_end_matches(':').trim_end().to_string();
    if sig.is_empty() {
        return Err(SchemaError::MissingField("runSignature"));
    }
    if !(sig.starts_with("def ") || sig.starts_with("async def ")) {
        sig = format!("def {}", sig);
    }
    sig.push(':');
    Ok(sig)
}

/// Outcome of feature design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureSpec {
    /// The user opted out of a new artifact.
    Declined,
    NewArtifact(ArtifactSpec),
}

impl FeatureSpec {
    pub fn artifact(&self) -> Option<&ArtifactSpec> {
        match self {
            FeatureSpec::Declined => None,
            FeatureSpec::NewArtifact(spec) => Some(spec),
        }
    }
}
