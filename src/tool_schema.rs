//! Tool schema input (§6 "Tool schema input"): turn a JSON file or inline JSON
//! string into a canonical [`UnifiedTool`]. A tool object declared with
//! `format: "openai"` or `"anthropic"` is parsed in that shape first and
//! converted to canonical before anything else in the crate sees it; anything
//! else is assumed to already be canonical shape.

use serde_json::Value;
use std::path::Path;

use crate::error::ConfigError;
use crate::message::UnifiedTool;

/// Load one [`UnifiedTool`] from a JSON file on disk.
pub async fn load_tool_file(path: &Path) -> Result<UnifiedTool, ConfigError> {
    let label = path.display().to_string();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::MalformedToolSchema { name: label.clone(), reason: e.to_string() })?;
    parse_tool_json(&contents, &label)
}

/// Parse one [`UnifiedTool`] from an inline JSON string.
pub fn parse_tool_string(raw: &str) -> Result<UnifiedTool, ConfigError> {
    parse_tool_json(raw, "<inline>")
}

fn parse_tool_json(raw: &str, label: &str) -> Result<UnifiedTool, ConfigError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ConfigError::MalformedToolSchema { name: label.to_string(), reason: e.to_string() })?;
    tool_from_value(&value, label)
}

/// Parse one [`UnifiedTool`] from an already-decoded JSON value — the same
/// format-detection the file/string loaders use, for callers that already
/// hold a `serde_json::Value` (e.g. a transport's in-band tool list).
pub fn tool_from_value(value: &Value, label: &str) -> Result<UnifiedTool, ConfigError> {
    match value.get("format").and_then(Value::as_str) {
        Some("openai") => from_openai(&value, label),
        Some("anthropic") => from_anthropic(&value, label),
        Some(other) => Err(ConfigError::MalformedToolSchema {
            name: label.to_string(),
            reason: format!("unrecognized tool schema format {other:?}"),
        }),
        None => from_canonical(&value, label),
    }
}

fn require_name<'a>(value: &'a Value, label: &str) -> Result<&'a str, ConfigError> {
    value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MalformedToolSchema { name: label.to_string(), reason: "missing \"name\"".into() })
}

fn from_canonical(value: &Value, label: &str) -> Result<UnifiedTool, ConfigError> {
    let name = require_name(value, label)?;
    let description = value.get("description").and_then(Value::as_str).unwrap_or("");
    let parameters = value.get("parameters").cloned().unwrap_or_else(empty_object_schema);
    let mut tool = UnifiedTool::new(name, description, parameters);
    if let Some(argv) = value.get("command").and_then(Value::as_array) {
        let argv: Vec<String> = argv.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        if !argv.is_empty() {
            tool = tool.with_command(argv);
        }
    }
    Ok(tool)
}

/// `{"format":"openai","type":"function","function":{"name","description","parameters"}}`
fn from_openai(value: &Value, label: &str) -> Result<UnifiedTool, ConfigError> {
    let function = value.get("function").ok_or_else(|| ConfigError::MalformedToolSchema {
        name: label.to_string(),
        reason: "openai-format tool missing \"function\"".into(),
    })?;
    from_canonical(function, label)
}

/// `{"format":"anthropic","name","description","input_schema"}`
fn from_anthropic(value: &Value, label: &str) -> Result<UnifiedTool, ConfigError> {
    let name = require_name(value, label)?;
    let description = value.get("description").and_then(Value::as_str).unwrap_or("");
    let parameters = value.get("input_schema").cloned().unwrap_or_else(empty_object_schema);
    Ok(UnifiedTool::new(name, description, parameters))
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tool_parses_with_command() {
        let raw = r#"{"name":"lookup","description":"look things up","parameters":{"type":"object"},"command":["lookup","$query"]}"#;
        let tool = parse_tool_string(raw).unwrap();
        assert_eq!(tool.name, "lookup");
        assert_eq!(tool.command.unwrap(), vec!["lookup".to_string(), "$query".to_string()]);
    }

    #[test]
    fn openai_format_unwraps_function() {
        let raw = r#"{"format":"openai","type":"function","function":{"name":"search","description":"web search","parameters":{"type":"object","properties":{"q":{"type":"string"}}}}}"#;
        let tool = parse_tool_string(raw).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.parameters["properties"]["q"]["type"], "string");
    }

    #[test]
    fn anthropic_format_uses_input_schema() {
        let raw = r#"{"format":"anthropic","name":"search","description":"web search","input_schema":{"type":"object","properties":{"q":{"type":"string"}}}}"#;
        let tool = parse_tool_string(raw).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.parameters["properties"]["q"]["type"], "string");
    }

    #[test]
    fn missing_name_is_malformed() {
        let raw = r#"{"description":"no name here"}"#;
        assert!(parse_tool_string(raw).is_err());
    }

    #[test]
    fn unrecognized_format_is_malformed() {
        let raw = r#"{"format":"cohere","name":"x"}"#;
        assert!(parse_tool_string(raw).is_err());
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(parse_tool_string("not json").is_err());
    }
}
