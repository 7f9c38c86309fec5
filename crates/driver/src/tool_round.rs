//! Tool round executor.
//!
//! Executes one generation's tool calls strictly left-to-right, checking
//! the abort signal before each. Teammate-call names are intercepted and
//! never dispatched as tools; everything else resolves against the
//! effective policy's tool list, with argument validation and local error
//! capture — tool-level failures flow back to the model as result
//! content, they never abort the drive.

use std::collections::HashMap;
use std::sync::Arc;

use dk_domain::{
    ArgsValidation, CancelToken, FuncCall, GenSeq, MessageBody, Result, ToolDefinition,
};

use crate::dialog::Dialog;
use crate::policy::EffectivePolicy;
use crate::projection::{TELLASK, TELLASK_BACK, TELLASK_SESSIONLESS};
use crate::state::DriverState;
use crate::subdialog;
use crate::tools::{FuncTool, ToolCtx};

/// What a completed round reports to the drive loop.
#[derive(Debug, Default)]
pub struct RoundOutcome {
    /// A sessionless teammate call was dispatched: break the drive and
    /// wait for the child (remaining calls in the batch were skipped).
    pub suspend_for_subdialog: bool,
    pub max_call_genseq: Option<GenSeq>,
}

pub async fn execute_tool_round(
    state: &DriverState,
    dialog: &mut Dialog,
    policy: &EffectivePolicy,
    calls: &[FuncCall],
    token: &CancelToken,
) -> Result<RoundOutcome> {
    let tools_by_name: HashMap<String, Arc<dyn FuncTool>> = policy
        .tools
        .iter()
        .map(|t| (t.definition().name, t.clone()))
        .collect();

    let mut outcome = RoundOutcome::default();

    for call in calls {
        if token.is_cancelled() {
            return Err(token.interruption());
        }

        let call_genseq = dialog
            .push(MessageBody::FuncCall {
                call_id: call.call_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .genseq;
        outcome.max_call_genseq = Some(call_genseq);

        // ── Teammate-call interception ─────────────────────────────
        match call.name.as_str() {
            TELLASK_SESSIONLESS => {
                match parse_teammate_args(call) {
                    Ok((target, content)) => {
                        match subdialog::spawn_sessionless(
                            state,
                            dialog,
                            &call.call_id,
                            &target,
                            &content,
                        ) {
                            Ok(subdialog_id) => {
                                tracing::info!(
                                    dialog = %dialog.id,
                                    subdialog = %subdialog_id,
                                    target = %target,
                                    "sessionless teammate call dispatched; suspending drive"
                                );
                                outcome.suspend_for_subdialog = true;
                                // No further calls in the batch execute.
                                return Ok(outcome);
                            }
                            Err(e) => push_error(dialog, call, e.to_string()),
                        }
                    }
                    Err(message) => push_error(dialog, call, message),
                }
                continue;
            }
            TELLASK => {
                match parse_teammate_args(call) {
                    Ok((target, content)) => {
                        if let Err(e) =
                            subdialog::dispatch_tellask(state, dialog, &call.call_id, &target, &content)
                        {
                            push_error(dialog, call, e.to_string());
                        }
                        // No local result; the projection shows a pending
                        // placeholder until the teammate answers.
                    }
                    Err(message) => push_error(dialog, call, message),
                }
                continue;
            }
            TELLASK_BACK => {
                match parse_back_args(call) {
                    Ok(content) => {
                        if let Err(e) =
                            subdialog::dispatch_tellask_back(state, dialog, &call.call_id, &content)
                        {
                            push_error(dialog, call, e.to_string());
                        }
                    }
                    Err(message) => push_error(dialog, call, message),
                }
                continue;
            }
            _ => {}
        }

        // ── Ordinary tool dispatch ─────────────────────────────────
        let Some(tool) = tools_by_name.get(call.name.as_str()) else {
            push_error(dialog, call, format!("Tool '{}' not found", call.name));
            continue;
        };

        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                push_error(dialog, call, format!("Invalid arguments: {e}"));
                continue;
            }
        };

        let definition = tool.definition();
        if definition.args_validation == ArgsValidation::Strict {
            if let Err(message) = validate_args(&definition, &args) {
                push_error(dialog, call, format!("Invalid arguments: {message}"));
                continue;
            }
        }

        let agent_id = dialog.agent_id.clone();
        let ctx = ToolCtx {
            dialog: &mut *dialog,
            caller_agent_id: &agent_id,
            state,
            abort: token.clone(),
        };
        match tool.call(ctx, args).await {
            Ok(output) => {
                dialog.push(MessageBody::FuncResult {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    content: output.content,
                    is_error: output.is_error,
                });
            }
            Err(e) if e.is_interrupted() => return Err(e),
            Err(_) if token.is_cancelled() => return Err(token.interruption()),
            Err(e) => push_error(dialog, call, e.to_string()),
        }
    }

    Ok(outcome)
}

fn push_error(dialog: &mut Dialog, call: &FuncCall, content: String) {
    dialog.push(MessageBody::FuncResult {
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        content,
        is_error: true,
    });
}

fn parse_teammate_args(call: &FuncCall) -> std::result::Result<(String, String), String> {
    let args = call
        .parse_arguments()
        .map_err(|e| format!("Invalid arguments: {e}"))?;
    let target = args
        .get("target_agent_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Invalid arguments: 'target_agent_id' is required".to_owned())?;
    let content = args
        .get("tellask_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Invalid arguments: 'tellask_content' is required".to_owned())?;
    Ok((target.to_owned(), content.to_owned()))
}

fn parse_back_args(call: &FuncCall) -> std::result::Result<String, String> {
    let args = call
        .parse_arguments()
        .map_err(|e| format!("Invalid arguments: {e}"))?;
    args.get("tellask_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| "Invalid arguments: 'tellask_content' is required".to_owned())
}

/// Minimal JSON-schema check: the argument value must be an object when
/// the schema says so, and every `required` property must be present.
pub fn validate_args(
    definition: &ToolDefinition,
    args: &serde_json::Value,
) -> std::result::Result<(), String> {
    let schema = &definition.parameters;
    if schema.get("type").and_then(|t| t.as_str()) == Some("object") && !args.is_object() {
        return Err("expected a JSON object".into());
    }
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if args.get(key).is_none() {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(required: &[&str]) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            description: String::new(),
            parameters: json!({
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": required,
            }),
            args_validation: ArgsValidation::Strict,
        }
    }

    #[test]
    fn validate_accepts_complete_args() {
        let def = definition(&["key"]);
        assert!(validate_args(&def, &json!({"key": "x"})).is_ok());
        // Extra fields are fine.
        assert!(validate_args(&def, &json!({"key": "x", "more": 1})).is_ok());
    }

    #[test]
    fn validate_rejects_missing_required() {
        let def = definition(&["key"]);
        let err = validate_args(&def, &json!({})).unwrap_err();
        assert!(err.contains("key"));
    }

    #[test]
    fn validate_rejects_non_object() {
        let def = definition(&[]);
        assert!(validate_args(&def, &json!("just a string")).is_err());
    }

    #[test]
    fn teammate_args_parsing() {
        let call = FuncCall {
            call_id: "c1".into(),
            name: TELLASK_SESSIONLESS.into(),
            arguments: r#"{"target_agent_id":"bob","tellask_content":"fetch X"}"#.into(),
        };
        assert_eq!(
            parse_teammate_args(&call).unwrap(),
            ("bob".to_owned(), "fetch X".to_owned())
        );

        let bad = FuncCall {
            call_id: "c2".into(),
            name: TELLASK_SESSIONLESS.into(),
            arguments: r#"{"target_agent_id":"bob"}"#.into(),
        };
        assert!(parse_teammate_args(&bad)
            .unwrap_err()
            .contains("tellask_content"));
    }
}
