//! Policy guardrail.
//!
//! Builds the effective system prompt, tool list, and prepended context for
//! one generation, and checks the generation afterwards for policy
//! violations. Teammate-call tools are exposed to the model here but
//! intercepted by the tool round instead of dispatched.

use std::sync::Arc;

use serde_json::json;

use dk_domain::{ArgsValidation, FuncCall, ToolDefinition};
use dk_minds::Mindset;

use crate::dialog::Dialog;
use crate::projection::{TELLASK, TELLASK_BACK, TELLASK_SESSIONLESS};
use crate::state::DriverState;
use crate::tools::FuncTool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Effective policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EffectivePolicy {
    pub system_prompt: String,
    /// Dispatchable tools (registry tools after filtering + intrinsics).
    pub tools: Vec<Arc<dyn FuncTool>>,
    /// Definitions shown to the model, including intercepted teammate
    /// calls.
    pub tool_defs: Vec<ToolDefinition>,
    /// Context blocks prepended before the dialog history.
    pub prepended_context: Vec<String>,
    /// The generation must produce at least one tool call.
    pub requires_tool_call: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    /// The policy mandated a tool call but the model produced none.
    FbrToolless,
}

impl PolicyViolation {
    /// The assistant utterance persisted when the violation ends a drive.
    pub fn utterance(&self) -> String {
        match self {
            PolicyViolation::FbrToolless => {
                "I produced a response without the required tool call; \
                 stopping here instead of guessing."
                    .to_owned()
            }
        }
    }
}

/// Post-generation check.
pub fn check_violation(policy: &EffectivePolicy, calls: &[FuncCall]) -> Option<PolicyViolation> {
    if policy.requires_tool_call && calls.is_empty() {
        Some(PolicyViolation::FbrToolless)
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Building
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_policy(state: &DriverState, dialog: &Dialog, mindset: &Mindset) -> EffectivePolicy {
    let team = state.team();
    let member = team.member(&dialog.agent_id);
    let hidden = member.map(|m| m.hidden).unwrap_or(false);
    let shell_allowed = hidden || team.is_shell_specialist(&dialog.agent_id);

    // Registry tools, shell-filtered.
    let mut tools: Vec<Arc<dyn FuncTool>> = state
        .tools()
        .all()
        .into_iter()
        .filter(|t| shell_allowed || !t.is_shell())
        .collect();

    // Intrinsic tools; change_mind only for root dialogs.
    tools.extend(crate::intrinsic::intrinsic_tools(dialog.is_root()));

    let mut tool_defs: Vec<ToolDefinition> = tools.iter().map(|t| t.definition()).collect();
    tool_defs.extend(tellask_definitions(dialog.is_root()));

    let requires_tool_call = member.map(|m| m.fresh_boots_reasoning).unwrap_or(false);

    EffectivePolicy {
        system_prompt: build_system_prompt(dialog, mindset),
        tools,
        tool_defs,
        prepended_context: build_prepended_context(shell_allowed),
        requires_tool_call,
    }
}

fn build_system_prompt(dialog: &Dialog, mindset: &Mindset) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(persona) = &mindset.persona {
        sections.push(persona.trim().to_owned());
    } else {
        sections.push(format!("You are {}, a team member.", dialog.agent_id));
    }
    if let Some(knowledge) = &mindset.knowledge {
        sections.push(format!("## Knowledge\n{}", knowledge.trim()));
    }
    if let Some(lessons) = &mindset.lessons {
        sections.push(format!("## Lessons\n{}", lessons.trim()));
    }
    if let Some(env) = &mindset.env_intro {
        sections.push(format!("## Environment\n{}", env.trim()));
    }

    let teammates: Vec<String> = mindset
        .roster
        .iter()
        .filter(|entry| entry.id != dialog.agent_id)
        .map(|entry| match &entry.name {
            Some(name) => format!("- {} ({name})", entry.id),
            None => format!("- {}", entry.id),
        })
        .collect();
    if !teammates.is_empty() {
        sections.push(format!("## Team\n{}", teammates.join("\n")));
    }

    sections.push(
        "## Tool rules\n\
         Call tools with valid JSON arguments. Address a teammate with the \
         teammate-call tools; their reply arrives as the tool result."
            .to_owned(),
    );

    sections.join("\n\n")
}

fn build_prepended_context(shell_allowed: bool) -> Vec<String> {
    let mut blocks = vec![
        "Policy: work within your persona and use the provided tools; \
         do not fabricate tool results."
            .to_owned(),
    ];
    if !shell_allowed {
        blocks.push(
            "Shell policy: shell tools are not available to you; delegate \
             shell work to a shell specialist teammate."
                .to_owned(),
        );
    }
    blocks
}

/// Definitions of the intercepted teammate-call tools.
/// `tellask_back` only exists for sub-dialogs (they have a caller to
/// address).
pub fn tellask_definitions(is_root: bool) -> Vec<ToolDefinition> {
    let target_params = json!({
        "type": "object",
        "properties": {
            "target_agent_id": {
                "type": "string",
                "description": "Teammate to address"
            },
            "tellask_content": {
                "type": "string",
                "description": "What to tell or ask the teammate"
            }
        },
        "required": ["target_agent_id", "tellask_content"]
    });
    let back_params = json!({
        "type": "object",
        "properties": {
            "tellask_content": {
                "type": "string",
                "description": "What to tell or ask your caller"
            }
        },
        "required": ["tellask_content"]
    });

    let mut defs = vec![
        ToolDefinition {
            name: TELLASK_SESSIONLESS.into(),
            description: "Hand a self-contained task to a teammate and suspend \
                          until their answer arrives."
                .into(),
            parameters: target_params.clone(),
            args_validation: ArgsValidation::Strict,
        },
        ToolDefinition {
            name: TELLASK.into(),
            description: "Continue an ongoing exchange with a teammate.".into(),
            parameters: target_params,
            args_validation: ArgsValidation::Strict,
        },
    ];
    if !is_root {
        defs.push(ToolDefinition {
            name: TELLASK_BACK.into(),
            description: "Reply or ask a follow-up to the teammate that called you.".into(),
            parameters: back_params,
            args_validation: ArgsValidation::Strict,
        });
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tellask_back_only_for_subdialogs() {
        let root_defs = tellask_definitions(true);
        assert!(root_defs.iter().all(|d| d.name != TELLASK_BACK));
        assert!(root_defs.iter().any(|d| d.name == TELLASK_SESSIONLESS));

        let sub_defs = tellask_definitions(false);
        assert!(sub_defs.iter().any(|d| d.name == TELLASK_BACK));
    }

    #[test]
    fn toolless_violation_only_when_required() {
        let policy = EffectivePolicy {
            system_prompt: String::new(),
            tools: vec![],
            tool_defs: vec![],
            prepended_context: vec![],
            requires_tool_call: true,
        };
        assert_eq!(check_violation(&policy, &[]), Some(PolicyViolation::FbrToolless));

        let call = FuncCall {
            call_id: "c1".into(),
            name: "x".into(),
            arguments: "{}".into(),
        };
        assert_eq!(check_violation(&policy, &[call]), None);

        let relaxed = EffectivePolicy {
            requires_tool_call: false,
            ..policy
        };
        assert_eq!(check_violation(&relaxed, &[]), None);
    }
}
