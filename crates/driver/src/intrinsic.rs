//! Intrinsic tools — always available to every agent, independent of the
//! configured tool registry: reminder CRUD, mind-clearing, task-document
//! recall, and (for root dialogs) switching the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use dk_domain::{ArgsValidation, Result, ToolDefinition, ToolOutput};

use crate::tools::{FuncTool, ToolCtx};

/// The intrinsic tool set. `change_mind` only exists for root dialogs.
pub fn intrinsic_tools(is_root: bool) -> Vec<Arc<dyn FuncTool>> {
    let mut tools: Vec<Arc<dyn FuncTool>> = vec![
        Arc::new(AddReminder),
        Arc::new(UpdateReminder),
        Arc::new(DeleteReminder),
        Arc::new(ClearMind),
        Arc::new(RecallTaskdoc),
    ];
    if is_root {
        tools.push(Arc::new(ChangeMind));
    }
    tools
}

fn str_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_owned)
}

fn u32_arg(args: &serde_json::Value, key: &str) -> Option<u32> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reminders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AddReminder;

#[async_trait]
impl FuncTool for AddReminder {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "add_reminder".into(),
            description: "Add a standing reminder shown to you every generation.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" }
                },
                "required": ["content"]
            }),
            args_validation: ArgsValidation::Strict,
        }
    }

    async fn call(&self, ctx: ToolCtx<'_>, args: serde_json::Value) -> Result<ToolOutput> {
        let content = str_arg(&args, "content").unwrap_or_default();
        let id = ctx.dialog.add_reminder(content);
        Ok(ToolOutput::ok(format!("Reminder #{id} added.")))
    }
}

struct UpdateReminder;

#[async_trait]
impl FuncTool for UpdateReminder {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_reminder".into(),
            description: "Replace the content of an existing reminder.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" },
                    "content": { "type": "string" }
                },
                "required": ["id", "content"]
            }),
            args_validation: ArgsValidation::Strict,
        }
    }

    async fn call(&self, ctx: ToolCtx<'_>, args: serde_json::Value) -> Result<ToolOutput> {
        let id = u32_arg(&args, "id").unwrap_or(0);
        let content = str_arg(&args, "content").unwrap_or_default();
        if ctx.dialog.update_reminder(id, content) {
            Ok(ToolOutput::ok(format!("Reminder #{id} updated.")))
        } else {
            Ok(ToolOutput::err(format!("No reminder #{id}.")))
        }
    }
}

struct DeleteReminder;

#[async_trait]
impl FuncTool for DeleteReminder {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_reminder".into(),
            description: "Delete a reminder by id.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" }
                },
                "required": ["id"]
            }),
            args_validation: ArgsValidation::Strict,
        }
    }

    async fn call(&self, ctx: ToolCtx<'_>, args: serde_json::Value) -> Result<ToolOutput> {
        let id = u32_arg(&args, "id").unwrap_or(0);
        if ctx.dialog.delete_reminder(id) {
            Ok(ToolOutput::ok(format!("Reminder #{id} deleted.")))
        } else {
            Ok(ToolOutput::err(format!("No reminder #{id}.")))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mind clearing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ClearMind;

#[async_trait]
impl FuncTool for ClearMind {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "clear_mind".into(),
            description: "Start a fresh working episode. Prior conversation \
                          drops out of your context; reminders survive."
                .into(),
            parameters: json!({ "type": "object", "properties": {} }),
            args_validation: ArgsValidation::Strict,
        }
    }

    async fn call(&self, ctx: ToolCtx<'_>, _args: serde_json::Value) -> Result<ToolOutput> {
        // The course bump happens after the round completes, so this call's
        // own result does not straddle the course boundary.
        ctx.dialog.pending_mind_clear = true;
        Ok(ToolOutput::ok(
            "Mind will be cleared after this round; a fresh course begins.",
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task document recall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RecallTaskdoc;

#[async_trait]
impl FuncTool for RecallTaskdoc {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "recall_taskdoc".into(),
            description: "Re-read the task document attached to this dialog.".into(),
            parameters: json!({ "type": "object", "properties": {} }),
            args_validation: ArgsValidation::Strict,
        }
    }

    async fn call(&self, ctx: ToolCtx<'_>, _args: serde_json::Value) -> Result<ToolOutput> {
        match &ctx.dialog.taskdoc {
            Some(doc) => Ok(ToolOutput::ok(doc.clone())),
            None => Ok(ToolOutput::ok("No task document is attached.")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model switching (root dialogs only)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ChangeMind;

#[async_trait]
impl FuncTool for ChangeMind {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "change_mind".into(),
            description: "Switch this dialog to another configured model.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "model": { "type": "string", "description": "Model id from the catalog" }
                },
                "required": ["model"]
            }),
            args_validation: ArgsValidation::Strict,
        }
    }

    async fn call(&self, ctx: ToolCtx<'_>, args: serde_json::Value) -> Result<ToolOutput> {
        let model = str_arg(&args, "model").unwrap_or_default();
        if ctx.state.llm().model(&model).is_none() {
            return Ok(ToolOutput::err(format!(
                "Model '{model}' is not configured."
            )));
        }
        ctx.dialog.model_override = Some(model.clone());
        Ok(ToolOutput::ok(format!(
            "Switched to model '{model}' from the next generation."
        )))
    }
}
