//! Per-dialog drive loop.
//!
//! One drive = acquire the dialog lock, then alternate model generations
//! and tool rounds until the dialog suspends (final answer, teammate
//! fan-out, budget exhaustion) or is interrupted. The loop owns all
//! synthetic prompt injection: up-next consumption, caution remediation,
//! and diligence pushes.

use dk_domain::{
    health::evaluate_context_health, CancelToken, Error, GenSeq, HealthLevel, MessageBody,
    PromptOrigin, Result, RunState, StopKind,
};
use dk_minds::Mindset;
use dk_providers::{CallOpts, GenRequest, LlmRetryEvent, ProviderMessage};
use tracing::Instrument;

use crate::dialog::{Dialog, PendingPrompt, ReplyTarget};
use crate::diligence::{self, DiligenceDecision};
use crate::events::DialogEvent;
use crate::policy::{build_policy, check_violation, EffectivePolicy};
use crate::projection::project_for_provider;
use crate::state::DriverState;
use crate::subdialog;
use crate::tool_round::execute_tool_round;

/// Prompt injected once per dialog instance when context health reaches
/// `caution` after a tool round.
const CAUTION_REMEDIATION_PROMPT: &str =
    "Your context window is filling up. Wrap up the current thread of work: \
     prefer concluding with an answer, clear your mind, or delegate \
     remaining work to a teammate.";

#[derive(Debug, Clone, Default)]
pub struct DriveOpts {
    /// Wait for the dialog lock instead of rejecting when busy.
    pub wait_in_queue: bool,
    pub suppress_diligence_push: bool,
    pub allow_resume_from_interrupted: bool,
    pub skip_taskdoc: bool,
}

/// What a finished drive hands to the sub-dialog manager.
#[derive(Debug, Clone, Default)]
pub struct DriveOutputs {
    pub last_saying_content: Option<String>,
    pub last_saying_genseq: GenSeq,
    pub last_func_call_genseq: GenSeq,
}

/// Re-exported prompt type: the operator surface and the drive share it.
pub type HumanPrompt = PendingPrompt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive one dialog until it suspends.
pub async fn drive_dialog(
    state: &DriverState,
    self_id: &str,
    prompt: Option<HumanPrompt>,
    opts: DriveOpts,
) -> Result<DriveOutputs> {
    let arc = state
        .arena
        .get(self_id)
        .ok_or_else(|| Error::Config(format!("unknown dialog '{self_id}'")))?;

    // (a)/(b) The dialog mutex is the exclusive drive lock.
    let mut dialog = if opts.wait_in_queue {
        arc.clone().lock_owned().await
    } else {
        arc.clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy(format!("dialog '{self_id}' has a drive in flight")))?
    };

    // (c)/(d) Preflight against the persisted latest state.
    let user_prompt = prompt
        .as_ref()
        .map(|p| p.origin == PromptOrigin::User)
        .unwrap_or(false);
    if let Some(snapshot) = state.store.read_latest(self_id)? {
        match &snapshot.run_state {
            RunState::Dead if !dialog.is_root() => {
                return Err(Error::DriveRefused("dialog is dead".into()))
            }
            RunState::ProceedingStopRequested { .. } => {
                return Err(Error::DriveRefused("stop requested".into()))
            }
            RunState::Interrupted { .. }
                if !(opts.allow_resume_from_interrupted || user_prompt) =>
            {
                return Err(Error::DriveRefused(
                    "interrupted; resume or send fresh input".into(),
                ))
            }
            RunState::Blocked { .. }
                if prompt.is_none() && state.up_next.is_empty(self_id) =>
            {
                // The snapshot may be stale (a child's answer just landed);
                // refuse only when the blockers are still live.
                if matches!(state.idle_state(&dialog.id), RunState::Blocked { .. }) {
                    return Err(Error::DriveRefused("blocked and no prompt queued".into()));
                }
            }
            _ => {}
        }
    }
    state.resolve_model(&dialog)?;

    let dialog_id = dialog.id.clone();
    let token = state.registry.begin_run(self_id);
    state.set_run_state(&dialog_id, dialog.course, RunState::Proceeding);

    let mut reply_target: Option<ReplyTarget> = None;
    let result = drive_iterations(state, &mut dialog, &token, prompt, &mut reply_target, &opts)
        .instrument(tracing::info_span!("drive", dialog = %dialog_id))
        .await;

    // Final run state: interrupted reasons must match the registry's stored
    // stop reason; any other error becomes a system stop.
    let final_state = match &result {
        Ok(()) => state.idle_state(&dialog_id),
        Err(Error::Interrupted(reason)) => RunState::Interrupted {
            reason: state.registry.resolve_interruption(self_id, reason.clone()),
        },
        Err(e) => {
            // Best-effort notification to any attached stream before the
            // terminal run-state lands.
            state.emit(
                &dialog_id,
                dialog.course,
                DialogEvent::StreamError {
                    dialog_id: dialog_id.self_id.clone(),
                    message: e.to_string(),
                },
            );
            RunState::Interrupted {
                reason: StopKind::SystemStop {
                    detail: e.to_string(),
                },
            }
        }
    };
    state.set_run_state(&dialog_id, dialog.course, final_state);

    let message_count = dialog.messages.len() as u64;
    let function_call_count = dialog.function_call_count();
    let course = dialog.course;
    if let Err(e) = state.store.update_latest(self_id, |s| {
        s.message_count = message_count;
        s.function_call_count = function_call_count;
        s.course = course;
    }) {
        tracing::warn!(dialog = %dialog_id, error = %e, "failed to persist snapshot counts");
    }
    state.registry.end_run(self_id);

    let outputs = DriveOutputs {
        last_saying_content: dialog.last_saying().map(|(content, _)| content.to_owned()),
        last_saying_genseq: dialog.last_saying().map(|(_, genseq)| genseq).unwrap_or(0),
        last_func_call_genseq: dialog.last_func_call_genseq(),
    };
    let is_sub = !dialog.is_root();

    // Release the dialog lock before any upstream delivery.
    drop(dialog);

    result?;

    if is_sub || reply_target.is_some() {
        subdialog::deliver_reply(state, &dialog_id, &outputs, reply_target.as_ref()).await?;
    }

    Ok(outputs)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Iteration loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive_iterations(
    state: &DriverState,
    dialog: &mut Dialog,
    token: &CancelToken,
    prompt: Option<HumanPrompt>,
    reply_target: &mut Option<ReplyTarget>,
    opts: &DriveOpts,
) -> Result<()> {
    let lang = prompt
        .as_ref()
        .and_then(|p| p.user_language_code.clone())
        .or_else(|| state.team().defaults.language.clone());
    let mut pending_prompt = prompt;
    let mut had_tool_results = false;

    loop {
        if token.is_cancelled() {
            return Err(token.interruption());
        }

        // Up-next is consumed at the start of the iteration.
        if pending_prompt.is_none() {
            pending_prompt = state.up_next.pop(&dialog.id.self_id);
        }

        // Caution remediation: once per dialog instance, after a tool
        // round under caution, and never displacing a real prompt.
        if pending_prompt.is_none()
            && had_tool_results
            && dialog.last_health.as_ref().and_then(|h| h.level()) == Some(HealthLevel::Caution)
            && !dialog.caution_remediation_injected
        {
            dialog.caution_remediation_injected = true;
            pending_prompt = Some(PendingPrompt {
                content: CAUTION_REMEDIATION_PROMPT.into(),
                origin: PromptOrigin::Health,
                ..PendingPrompt::default()
            });
        }

        let genseq = dialog.alloc_genseq();
        let mindset = Mindset::load(
            state.minds(),
            state.team(),
            &dialog.agent_id,
            lang.as_deref(),
        );
        let policy = build_policy(state, dialog, &mindset);
        let (model_id, model_meta) = state.resolve_model(dialog)?;

        // Persist the pending prompt into the log before projecting.
        if let Some(p) = pending_prompt.take() {
            if let Some(target) = &p.subdialog_reply_target {
                *reply_target = Some(target.clone());
                let anchor = serde_json::json!({
                    "record": "teammate_call_anchor",
                    "owner_dialog_id": target.owner_dialog_id,
                    "call_id": target.call_id,
                });
                if let Err(e) =
                    state
                        .store
                        .append_event(&dialog.id.self_id, dialog.course, &anchor)
                {
                    tracing::warn!(dialog = %dialog.id, error = %e, "failed to append call anchor");
                }
            }
            dialog.push(MessageBody::Prompting {
                content: p.content,
                origin: p.origin,
            });
        }

        let messages = assemble_context(dialog, &policy, opts, lang.as_deref());
        let request = GenRequest {
            agent_id: dialog.agent_id.clone(),
            model: model_id.clone(),
            system_prompt: policy.system_prompt.clone(),
            tools: policy.tool_defs.clone(),
            messages,
            genseq,
            abort: token.clone(),
        };

        state.emit(
            &dialog.id,
            dialog.course,
            DialogEvent::GeneratingStart {
                dialog_id: dialog.id.self_id.clone(),
                genseq,
            },
        );

        let retry_state = state.clone();
        let retry_dialog = dialog.id.clone();
        let retry_course = dialog.course;
        let on_retry = move |event: LlmRetryEvent| {
            retry_state.emit(
                &retry_dialog,
                retry_course,
                DialogEvent::LlmRetry {
                    dialog_id: retry_dialog.self_id.clone(),
                    retry: event,
                },
            );
        };
        let dialog_key = dialog.id.self_id.clone();
        let call_opts = CallOpts {
            dialog_key: &dialog_key,
            on_retry: Some(&on_retry),
            can_retry: None,
        };
        let gen_result = state
            .llm_call
            .gen_messages(state.provider(), request, &call_opts)
            .await;

        state.emit(
            &dialog.id,
            dialog.course,
            DialogEvent::GeneratingFinish {
                dialog_id: dialog.id.self_id.clone(),
                genseq,
            },
        );

        let (collected, outcome) = gen_result?;

        for thinking in &collected.thinking {
            dialog.push(MessageBody::Thinking {
                content: thinking.clone(),
            });
        }
        for saying in &collected.saying {
            dialog.push(MessageBody::Saying {
                content: saying.clone(),
            });
        }
        dialog.last_health = Some(evaluate_context_health(&outcome.usage, &model_meta));

        // Post-generation policy check: a mandated-but-missing tool call
        // ends the drive with a synthetic utterance, no retries.
        if let Some(violation) = check_violation(&policy, &collected.calls) {
            tracing::warn!(dialog = %dialog.id, ?violation, "policy violation; ending drive");
            dialog.push(MessageBody::Saying {
                content: violation.utterance(),
            });
            break;
        }

        // Tool round.
        had_tool_results = false;
        if !collected.calls.is_empty() {
            let round = execute_tool_round(state, dialog, &policy, &collected.calls, token).await?;
            if dialog.pending_mind_clear {
                dialog.pending_mind_clear = false;
                let course = dialog.start_new_course();
                tracing::info!(dialog = %dialog.id, course, "mind cleared; new course started");
            }
            if round.suspend_for_subdialog {
                break;
            }
            had_tool_results = true;
        }

        // Decision: queued prompt → continue; tool results to observe →
        // continue; else the diligence budget gets the last word.
        if !state.up_next.is_empty(&dialog.id.self_id) {
            continue;
        }
        if had_tool_results {
            continue;
        }
        if opts.suppress_diligence_push {
            break;
        }
        match diligence::decide(state, dialog, lang.as_deref())? {
            DiligenceDecision::Disabled | DiligenceDecision::BudgetExhausted => break,
            DiligenceDecision::Continue(prompt) => {
                pending_prompt = Some(prompt);
                continue;
            }
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed context order: prepended policy blocks → task document → course
/// prefix → projected dialog log → reminders → language guide.
fn assemble_context(
    dialog: &Dialog,
    policy: &EffectivePolicy,
    opts: &DriveOpts,
    lang: Option<&str>,
) -> Vec<ProviderMessage> {
    let mut messages = Vec::new();

    for block in &policy.prepended_context {
        messages.push(ProviderMessage::User {
            content: block.clone(),
        });
    }

    if !opts.skip_taskdoc {
        if let Some(doc) = &dialog.taskdoc {
            messages.push(ProviderMessage::User {
                content: format!("## Task document\n{doc}"),
            });
        }
    }

    if dialog.course > 0 {
        messages.push(ProviderMessage::User {
            content: format!(
                "[course {}] A fresh working episode has begun; earlier \
                 conversation was cleared.",
                dialog.course
            ),
        });
    }

    messages.extend(project_for_provider(dialog.course_messages()));

    if !dialog.reminders.is_empty() {
        let bullets = dialog
            .reminders
            .iter()
            .map(|r| format!("- #{} {}", r.id, r.content))
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(ProviderMessage::User {
            content: format!("## Reminders\n{bullets}"),
        });
    }

    if let Some(lang) = lang {
        messages.push(ProviderMessage::User {
            content: format!("Respond in the user's preferred language: {lang}."),
        });
    }

    messages
}
