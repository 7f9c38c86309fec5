use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool contract types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the executor treats a tool's declared JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArgsValidation {
    /// Validate arguments against `parameters` before dispatch.
    #[default]
    Strict,
    /// Hand arguments through untouched.
    Passthrough,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub args_validation: ArgsValidation,
}

/// Result of invoking a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A fully assembled tool call popped off the generation stream.
/// `arguments` keeps the raw JSON text the model emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

impl FuncCall {
    /// Parse the argument string, substituting `{}` when the model sent
    /// nothing at all.
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_output_constructors() {
        let ok = ToolOutput::ok("done");
        assert!(!ok.is_error);
        let err = ToolOutput::err("boom");
        assert!(err.is_error);
    }

    #[test]
    fn empty_arguments_parse_to_object() {
        let call = FuncCall {
            call_id: "c1".into(),
            name: "noop".into(),
            arguments: "  ".into(),
        };
        assert_eq!(
            call.parse_arguments().unwrap(),
            serde_json::Value::Object(Default::default())
        );
    }

    #[test]
    fn invalid_arguments_error() {
        let call = FuncCall {
            call_id: "c1".into(),
            name: "noop".into(),
            arguments: "{not json".into(),
        };
        assert!(call.parse_arguments().is_err());
    }

    #[test]
    fn args_validation_default_is_strict() {
        let json = r#"{"name":"t","parameters":{"type":"object"}}"#;
        let def: ToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.args_validation, ArgsValidation::Strict);
    }
}
