//! Tolerant parsing of model replies: JSON objects, bullet lists and fenced code.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::SchemaError;

// Compile regexes once using LazyLock
static BULLET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:([-*•])|(\d+)([.)]))\s+(.*\S)\s*$").unwrap()
});

static PYTHON_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:python|py)[^\n]*\n(.*?)```").unwrap());

static ANY_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").unwrap());

/// Find the first well-formed JSON object embedded in `text`.
///
/// Candidates are found by brace counting that skips braces inside string
/// literals; the first candidate that actually parses as an object wins.
pub fn extract_json_object(text: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(text, start) {
            let candidate = &text[start..end];
            if matches!(serde_json::from_str::<Value>(candidate), Ok(Value::Object(_))) {
                return Some(candidate.to_string());
            }
        }
        search_from = start + 1;
    }
    None
}

/// Byte index one past the `}` closing the `{` at `start`.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object in a reply into a `Value`.
pub fn parse_json_object(text: &str) -> Result<Value, SchemaError> {
    match extract_json_object(text) {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| SchemaError::InvalidJson(e.to_string())),
        None if text.contains('{') => Err(SchemaError::InvalidJson(
            "no well-formed object in reply".to_string(),
        )),
        None => Err(SchemaError::NoJsonObject),
    }
}

/// The closed set of list markers accepted in model replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletMarker {
    Dash,
    Star,
    Dot,
    /// `N.` or `N)`
    Numbered(u32),
}

/// Split one line into its marker and item text, if it is a bullet.
pub fn parse_bullet(line: &str) -> Option<(BulletMarker, &str)> {
    let caps = BULLET_REGEX.captures(line)?;
    let marker = match (caps.get(1), caps.get(2)) {
        (Some(sym), _) => match sym.as_str() {
            "-" => BulletMarker::Dash,
            "*" => BulletMarker::Star,
            _ => BulletMarker::Dot,
        },
        (None, Some(num)) => BulletMarker::Numbered(num.as_str().parse().ok()?),
        (None, None) => return None,
    };
    Some((marker, caps.get(4)?.as_str()))
}

/// Item texts of every bullet line, in order. Other lines are ignored.
pub fn extract_bullets(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(parse_bullet)
        .map(|(_, item)| item.to_string())
        .collect()
}

/// Body of the first ```python fence, else the first fence of any kind,
/// else the whole reply.
pub fn extract_code_block(text: &str) -> String {
    PYTHON_FENCE_REGEX
        .captures(text)
        .or_else(|| ANY_FENCE_REGEX.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.trim().to_string() + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"key": "value"}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_with_prefix_and_suffix() {
        let text = r#"Sure! Here it is: {"key": "value"} hope that helps"#;
        assert_eq!(extract_json_object(text), Some(r#"{"key": "value"}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"outer": {"inner": "value"}}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"code": "fn main() { }", "n": 1}"#;
        assert_eq!(extract_json_object(text), Some(text.to_string()));
    }

    #[test]
    fn test_extract_json_object_skips_malformed_candidate() {
        let text = r#"{not json} then {"ok": true}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"ok": true}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_no_json() {
        assert_eq!(extract_json_object("No JSON here"), None);
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
    }

    #[test]
    fn test_parse_json_object_errors() {
        assert_eq!(parse_json_object("nothing"), Err(SchemaError::NoJsonObject));
        assert!(matches!(
            parse_json_object("{oops"),
            Err(SchemaError::InvalidJson(_))
        ));
        assert_eq!(
            parse_json_object("x {\"a\": 1} y").unwrap()["a"],
            serde_json::json!(1)
        );
    }

    #[test]
    fn test_extract_bullets_mixed_markers() {
        let text = "1. Do X\n- Do Y\nNot a bullet\n* Do Z";
        assert_eq!(extract_bullets(text), vec!["Do X", "Do Y", "Do Z"]);
    }

    #[test]
    fn test_extract_bullets_dot_and_paren_markers() {
        let text = "• First\n  2) Second  \n-NoSpace\n3.Also not";
        assert_eq!(extract_bullets(text), vec!["First", "Second"]);
    }

    #[test]
    fn test_parse_bullet_reports_marker() {
        assert_eq!(parse_bullet("12) go"), Some((BulletMarker::Numbered(12), "go")));
        assert_eq!(parse_bullet("* go"), Some((BulletMarker::Star, "go")));
        assert_eq!(parse_bullet("• go"), Some((BulletMarker::Dot, "go")));
        assert_eq!(parse_bullet("- "), None);
    }

    #[test]
    fn test_extract_code_block_prefers_python_fence() {
        let reply = "Here:\n```text\nnope\n```\n```python\nimport os\n```\n";
        assert_eq!(extract_code_block(reply), "import os\n");
    }

    #[test]
    fn test_extract_code_block_falls_back_to_whole_reply() {
        assert_eq!(extract_code_block("  x = 1  "), "x = 1\n");
        assert_eq!(extract_code_block("```\ny = 2\n```"), "y = 2\n");
    }
}
