//! Safety gate for generated Python artifacts.
//!
//! An artifact may only be written when importing or statically inspecting it
//! runs nothing. Every direct child of the module must be one of:
//!
//! | Allowed                    | tree-sitter kind                                      |
//! |----------------------------|-------------------------------------------------------|
//! | imports                    | `import_statement`, `import_from_statement`, `future_import_statement` |
//! | class / function defs      | `class_definition`, `function_definition`, `decorated_definition` |
//! | simple value assignments   | `expression_statement` > `assignment` (no calls inside) |
//! | string literals            | `expression_statement` > `string` / `concatenated_string` |
//!
//! Definition headers are evaluated at import, so parameter defaults,
//! annotations and base-class lists get the same no-call rule as
//! assignments. Decorators may be names or attributes; a decorator call is
//! accepted only for [`SAFE_DECORATOR_CALLS`] with call-free arguments.
//! The same header rules apply to methods declared directly in a class body.
//! Comments are ignored. This is a static allow-list, not a sandbox: other
//! class body statements and function bodies are not inspected.
//!
//! The tree-sitter grammar is more lenient than CPython (Python 2 `print`
//! and `exec` statements, duplicate parameters), so [`check_artifact`]
//! rejects those explicitly and [`compile_artifact`] has CPython compile
//! the text before it is written.

pub mod interpreter;
pub mod python;

use std::time::Duration;

use tree_sitter::Node;

use crate::config::CheckSettings;
use crate::errors::PipelineError;
use interpreter::CompileError;
use python::PythonModule;

/// Node kinds that make an assignment executable.
const EXECUTING_KINDS: &[&str] = &[
    "call",
    "await",
    "yield",
    "list_comprehension",
    "set_comprehension",
    "dictionary_comprehension",
    "generator_expression",
    "named_expression",
];

/// Python 2 statements the grammar still accepts.
const LEGACY_KINDS: &[&str] = &["print_statement", "exec_statement"];

/// Decorator factories whose call only configures the decorated object.
pub const SAFE_DECORATOR_CALLS: &[&str] = &[
    "dataclass",
    "dataclasses.dataclass",
    "lru_cache",
    "functools.lru_cache",
];

/// Classification of one top-level statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopLevel {
    Import,
    Definition,
    Assignment,
    StringLiteral,
    Comment,
    /// An expression statement that would evaluate something.
    Expression,
    /// An assignment whose value runs code.
    ExecutingAssignment,
    /// Any other statement kind, e.g. `if_statement`.
    Disallowed(&'static str),
}

/// Classify a direct child of the module node.
pub fn classify(node: Node<'_>) -> TopLevel {
    match node.kind() {
        "comment" => TopLevel::Comment,
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            TopLevel::Import
        }
        "class_definition" | "function_definition" | "decorated_definition" => {
            TopLevel::Definition
        }
        "expression_statement" => classify_expression_statement(node),
        other => TopLevel::Disallowed(other),
    }
}

fn classify_expression_statement(node: Node<'_>) -> TopLevel {
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect();
    let [only] = children.as_slice() else {
        return TopLevel::Expression;
    };
    match only.kind() {
        "assignment" => {
            if find_executing(*only).is_some() {
                TopLevel::ExecutingAssignment
            } else {
                TopLevel::Assignment
            }
        }
        "augmented_assignment" => TopLevel::Disallowed("augmented_assignment"),
        "string" | "concatenated_string" if find_kind(*only, &["interpolation"]).is_none() => {
            TopLevel::StringLiteral
        }
        _ => TopLevel::Expression,
    }
}

/// First node in `node`'s subtree (itself included) whose kind is in `kinds`.
fn find_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    if kinds.contains(&node.kind()) {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(|c| find_kind(c, kinds))
}

/// First evaluating node, skipping lambda bodies since they are not run.
fn find_executing(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "lambda" {
        return None;
    }
    if EXECUTING_KINDS.contains(&node.kind()) {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(find_executing)
}

/// Part of a top-level definition header that would run code on import.
fn definition_hazard<'t>(
    module: &PythonModule<'_>,
    node: Node<'t>,
) -> Option<(Node<'t>, &'static str)> {
    let definition = if node.kind() == "decorated_definition" {
        let mut cursor = node.walk();
        let decorators: Vec<Node<'t>> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .collect();
        for decorator in decorators {
            if let Some(hazard) = decorator_hazard(module, decorator) {
                return Some((hazard, "decorator"));
            }
        }
        node.child_by_field_name("definition")?
    } else {
        node
    };

    match definition.kind() {
        "function_definition" => {
            if let Some(hit) = definition
                .child_by_field_name("parameters")
                .and_then(find_executing)
            {
                return Some((hit, "parameter default or annotation"));
            }
            definition
                .child_by_field_name("return_type")
                .and_then(find_executing)
                .map(|hit| (hit, "return annotation"))
        }
        "class_definition" => {
            if let Some(hit) = definition
                .child_by_field_name("superclasses")
                .and_then(find_executing)
            {
                return Some((hit, "base class list"));
            }
            // Method headers run when the class body does.
            let body = definition.child_by_field_name("body")?;
            let mut cursor = body.walk();
            let members: Vec<Node<'t>> = body
                .named_children(&mut cursor)
                .filter(|c| classify(*c) == TopLevel::Definition)
                .collect();
            members
                .into_iter()
                .find_map(|member| definition_hazard(module, member))
        }
        _ => None,
    }
}

fn decorator_hazard<'t>(module: &PythonModule<'_>, decorator: Node<'t>) -> Option<Node<'t>> {
    let expr = decorator.named_child(0)?;
    if expr.kind() == "call" {
        let callee = module.text(expr.child_by_field_name("function")?);
        if !SAFE_DECORATOR_CALLS.iter().any(|safe| *safe == callee) {
            return Some(expr);
        }
        return expr.child_by_field_name("arguments").and_then(find_executing);
    }
    find_executing(expr)
}

/// Name bound by one entry of a `parameters` node.
fn parameter_name<'s>(module: &PythonModule<'s>, node: Node<'_>) -> Option<&'s str> {
    match node.kind() {
        "identifier" => Some(module.text(node)),
        "default_parameter" | "typed_default_parameter" => node
            .child_by_field_name("name")
            .and_then(|n| parameter_name(module, n)),
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => node
            .named_child(0)
            .and_then(|n| parameter_name(module, n)),
        _ => None,
    }
}

/// First function anywhere in the module that binds a parameter name twice.
fn duplicate_parameter<'s>(module: &PythonModule<'s>, node: Node<'_>) -> Option<(usize, &'s str)> {
    if node.kind() == "function_definition"
        && let Some(params) = node.child_by_field_name("parameters")
    {
        let mut cursor = params.walk();
        let entries: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
        let mut seen: Vec<&str> = Vec::new();
        for entry in entries {
            if let Some(name) = parameter_name(module, entry) {
                if seen.contains(&name) {
                    return Some((entry.start_position().row + 1, name));
                }
                seen.push(name);
            }
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(|c| duplicate_parameter(module, c))
}

fn invalid_syntax(class_name: &str, line: usize, message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidArtifactSyntax {
        class_name: class_name.to_string(),
        line,
        message: message.into(),
    }
}

/// Reject `source` unless it is valid Python whose top level is declarative.
///
/// Errors name the class the artifact was generated for and the offending line.
pub fn check_artifact(source: &str, class_name: &str) -> Result<(), PipelineError> {
    let module = PythonModule::parse(source)
        .map_err(|issue| invalid_syntax(class_name, issue.line, issue.message))?;
    if let Some(issue) = module.first_syntax_issue() {
        return Err(invalid_syntax(class_name, issue.line, issue.message));
    }
    if let Some(node) = find_kind(module.root(), LEGACY_KINDS) {
        return Err(invalid_syntax(
            class_name,
            node.start_position().row + 1,
            format!(
                "Python 2 {} is not valid Python 3",
                node.kind().replace('_', " ")
            ),
        ));
    }
    if let Some((line, name)) = duplicate_parameter(&module, module.root()) {
        return Err(invalid_syntax(
            class_name,
            line,
            format!("duplicate argument '{}' in function definition", name),
        ));
    }

    for node in module.top_level() {
        let line = node.start_position().row + 1;
        match classify(node) {
            TopLevel::Import
            | TopLevel::Assignment
            | TopLevel::StringLiteral
            | TopLevel::Comment => {}
            TopLevel::Definition => {
                if let Some((hit, construct)) = definition_hazard(&module, node) {
                    return Err(PipelineError::UnsafeTopLevel {
                        class_name: class_name.to_string(),
                        construct: construct.to_string(),
                        line: hit.start_position().row + 1,
                    });
                }
            }
            TopLevel::Expression => {
                let snippet = module.text(node).lines().next().unwrap_or("").trim();
                return Err(PipelineError::ExecutableExpression {
                    class_name: class_name.to_string(),
                    line,
                    snippet: snippet.to_string(),
                });
            }
            TopLevel::ExecutingAssignment => {
                return Err(PipelineError::UnsafeTopLevel {
                    class_name: class_name.to_string(),
                    construct: "assignment".to_string(),
                    line,
                });
            }
            TopLevel::Disallowed(kind) => {
                return Err(PipelineError::UnsafeTopLevel {
                    class_name: class_name.to_string(),
                    construct: kind.replace('_', " "),
                    line,
                });
            }
        }
    }
    Ok(())
}

/// Have CPython compile `source` in an isolated child before it is written.
pub async fn compile_artifact(
    source: &str,
    class_name: &str,
    check: &CheckSettings,
) -> Result<(), PipelineError> {
    let timeout = Duration::from_secs(check.timeout_secs);
    match interpreter::compile_source(&check.python, source, timeout).await {
        Ok(()) => Ok(()),
        Err(CompileError::Syntax(issue)) => Err(invalid_syntax(class_name, issue.line, issue.message)),
        Err(CompileError::Unavailable(reason)) => Err(PipelineError::InterpreterUnavailable {
            program: check.python.clone(),
            reason,
        }),
    }
}
