//! Sub-dialog fan-out and reply plumbing.
//!
//! Teammate calls create (or reuse) child dialogs; a pending record under
//! the root's transaction lock tracks every call whose final answer has
//! not reached the caller yet. When a dialog's drive ends with an
//! assistant saying, the answer is walked back to the caller's tool-result
//! slot here.

use uuid::Uuid;

use dk_domain::{DialogId, Error, MessageBody, Result};
use dk_store::{PendingSubdialog, TellaskKind};

use crate::dialog::{Dialog, PendingPrompt, ReplyTarget};
use crate::drive::DriveOutputs;
use crate::events::DialogEvent;
use crate::projection::{is_tellask_tool, TELLASK, TELLASK_BACK, TELLASK_SESSIONLESS};
use crate::state::DriverState;

fn tool_name_for(kind: TellaskKind) -> &'static str {
    match kind {
        TellaskKind::Sessionless => TELLASK_SESSIONLESS,
        TellaskKind::Tellask => TELLASK,
        TellaskKind::Back => TELLASK_BACK,
    }
}

/// The prompt a child is driven with for a fresh assignment.
fn format_assignment(caller_agent: &str, content: &str) -> String {
    format!(
        "[tellask from @{caller_agent}] {content}\n\n\
         Handle this and finish with your final answer to @{caller_agent}."
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create a sub-dialog for a sessionless teammate call and schedule its
/// drive. The caller's drive breaks right after this returns.
pub fn spawn_sessionless(
    state: &DriverState,
    caller: &Dialog,
    call_id: &str,
    target_agent_id: &str,
    tellask_content: &str,
) -> Result<String> {
    let subdialog_id = create_child(state, caller, target_agent_id)?;
    record_and_schedule(
        state,
        caller,
        &subdialog_id,
        call_id,
        TellaskKind::Sessionless,
        target_agent_id,
        tellask_content,
        // Sessionless answers route via the assigned-caller pending record.
        None,
    )?;
    Ok(subdialog_id)
}

/// Continue (or open) an ongoing session with a teammate. The caller does
/// not suspend; the projection shows a pending placeholder until the
/// answer lands.
pub fn dispatch_tellask(
    state: &DriverState,
    caller: &Dialog,
    call_id: &str,
    target_agent_id: &str,
    tellask_content: &str,
) -> Result<String> {
    let existing = state
        .arena
        .latest_subdialog_for(&caller.id.root_id, target_agent_id)
        .map(|meta| meta.id.self_id);
    let subdialog_id = match existing {
        Some(id) => id,
        None => create_child(state, caller, target_agent_id)?,
    };
    record_and_schedule(
        state,
        caller,
        &subdialog_id,
        call_id,
        TellaskKind::Tellask,
        target_agent_id,
        tellask_content,
        Some(ReplyTarget {
            owner_dialog_id: caller.id.self_id.clone(),
            call_kind: TellaskKind::Tellask,
            call_id: call_id.to_owned(),
        }),
    )?;
    Ok(subdialog_id)
}

/// A sub-dialog addressing its caller. The caller is prompted with the
/// content; its next saying fills this call's result slot.
pub fn dispatch_tellask_back(
    state: &DriverState,
    caller: &Dialog,
    call_id: &str,
    tellask_content: &str,
) -> Result<()> {
    let parent = caller
        .supdialog_id
        .clone()
        .ok_or_else(|| Error::Other("tellask_back from a dialog with no caller".into()))?;
    let parent_agent = state
        .arena
        .meta(&parent.self_id)
        .map(|m| m.agent_id)
        .unwrap_or_default();

    state.store.add_pending(
        &caller.id.root_id,
        PendingSubdialog {
            // The parent is the dialog that will produce this answer.
            subdialog_id: parent.self_id.clone(),
            caller_dialog_id: caller.id.self_id.clone(),
            call_id: call_id.to_owned(),
            call_kind: TellaskKind::Back,
            target_agent_id: parent_agent,
            tellask_content: tellask_content.to_owned(),
            course: caller.course,
            created_at: chrono::Utc::now(),
        },
    )?;

    state.up_next.push(
        &parent.self_id,
        PendingPrompt {
            content: format_assignment(&caller.agent_id, tellask_content),
            subdialog_reply_target: Some(ReplyTarget {
                owner_dialog_id: caller.id.self_id.clone(),
                call_kind: TellaskKind::Back,
                call_id: call_id.to_owned(),
            }),
            ..PendingPrompt::default()
        },
    );
    state.emit(
        &caller.id,
        caller.course,
        DialogEvent::TeammateCallStart {
            dialog_id: caller.id.self_id.clone(),
            subdialog_id: parent.self_id.clone(),
            target_agent_id: caller.agent_id.clone(),
            call_id: call_id.to_owned(),
        },
    );
    state.mark_needs_drive(&parent.self_id);
    Ok(())
}

fn create_child(state: &DriverState, caller: &Dialog, target_agent_id: &str) -> Result<String> {
    if state.team().member(target_agent_id).is_none() {
        return Err(Error::Other(format!(
            "unknown teammate '{target_agent_id}'"
        )));
    }
    let subdialog_id = format!("sub-{}", Uuid::new_v4());
    let child_id = DialogId::sub(subdialog_id.clone(), caller.id.root_id.clone());
    let mut child = Dialog::new_sub(child_id, target_agent_id, caller.id.clone());
    // Children answer one assignment; no auto-continue prompts.
    child.disable_diligence_push = true;
    state.arena.insert(child);

    state.store.update_latest(&subdialog_id, |s| {
        s.agent_id = target_agent_id.to_owned();
        s.root_id = caller.id.root_id.clone();
        s.supdialog_id = Some(caller.id.self_id.clone());
    })?;
    Ok(subdialog_id)
}

#[allow(clippy::too_many_arguments)]
fn record_and_schedule(
    state: &DriverState,
    caller: &Dialog,
    subdialog_id: &str,
    call_id: &str,
    kind: TellaskKind,
    target_agent_id: &str,
    tellask_content: &str,
    reply_target: Option<ReplyTarget>,
) -> Result<()> {
    state.store.add_pending(
        &caller.id.root_id,
        PendingSubdialog {
            subdialog_id: subdialog_id.to_owned(),
            caller_dialog_id: caller.id.self_id.clone(),
            call_id: call_id.to_owned(),
            call_kind: kind,
            target_agent_id: target_agent_id.to_owned(),
            tellask_content: tellask_content.to_owned(),
            course: caller.course,
            created_at: chrono::Utc::now(),
        },
    )?;

    state.up_next.push(
        subdialog_id,
        PendingPrompt {
            content: format_assignment(&caller.agent_id, tellask_content),
            subdialog_reply_target: reply_target,
            ..PendingPrompt::default()
        },
    );
    state.emit(
        &caller.id,
        caller.course,
        DialogEvent::TeammateCallStart {
            dialog_id: caller.id.self_id.clone(),
            subdialog_id: subdialog_id.to_owned(),
            target_agent_id: target_agent_id.to_owned(),
            call_id: call_id.to_owned(),
        },
    );
    state.mark_needs_drive(subdialog_id);
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream delivery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Walk a finished drive's last saying back to the caller's tool-result
/// slot. Called with no dialog lock held.
pub async fn deliver_reply(
    state: &DriverState,
    dialog_id: &DialogId,
    outputs: &DriveOutputs,
    reply_target: Option<&ReplyTarget>,
) -> Result<()> {
    // Not done yet: queued work or an outstanding question means the
    // current saying is not this dialog's final answer.
    if !state.up_next.is_empty(&dialog_id.self_id) {
        return Ok(());
    }
    if state
        .store
        .read_q4h(&dialog_id.self_id)
        .map(|qs| !qs.is_empty())
        .unwrap_or(false)
    {
        return Ok(());
    }

    let content = match &outputs.last_saying_content {
        Some(content) => content.clone(),
        None => return Ok(()),
    };

    if outputs.last_func_call_genseq > outputs.last_saying_genseq {
        // Generation is mid-flight after the saying. Deliver early only
        // when the trailing calls are all teammate calls (the dialog is
        // waiting on its own children, not on local tools).
        if !trailing_calls_all_tellask(state, dialog_id, outputs.last_saying_genseq).await {
            return Ok(());
        }
    }

    if outputs.last_saying_genseq == 0 {
        return Err(Error::SupplyInvariant(format!(
            "dialog '{}' has a reply but no saying genseq",
            dialog_id.self_id
        )));
    }

    let from_agent = state
        .arena
        .meta(&dialog_id.self_id)
        .map(|m| m.agent_id)
        .unwrap_or_default();

    // 1. Targeted delivery.
    if let Some(target) = reply_target {
        let record = state
            .store
            .read_pending(&dialog_id.root_id)?
            .into_iter()
            .find(|r| {
                r.call_id == target.call_id && r.caller_dialog_id == target.owner_dialog_id
            });
        if let Some(record) = record {
            return deliver_to_caller(state, dialog_id, &record, &content, &from_agent).await;
        }
        tracing::debug!(
            dialog = %dialog_id,
            call_id = %target.call_id,
            "reply target has no pending record; falling back to assigned caller"
        );
    }

    // 2. Assigned-caller delivery.
    let record = state
        .store
        .read_pending(&dialog_id.root_id)?
        .into_iter()
        .find(|r| r.subdialog_id == dialog_id.self_id);
    if let Some(record) = record {
        return deliver_to_caller(state, dialog_id, &record, &content, &from_agent).await;
    }

    // 3. Nothing to deliver into: diagnostics only, never fatal.
    let inventory = state
        .store
        .read_pending(&dialog_id.root_id)?
        .iter()
        .map(|r| format!("{}→{} ({})", r.caller_dialog_id, r.subdialog_id, r.call_id))
        .collect::<Vec<_>>()
        .join(", ");
    state.emit(
        dialog_id,
        0,
        DialogEvent::Debug {
            dialog_id: dialog_id.self_id.clone(),
            message: format!(
                "no pending sub-dialog record for reply from '{}'; pending: [{inventory}]",
                dialog_id.self_id
            ),
        },
    );
    Ok(())
}

async fn trailing_calls_all_tellask(
    state: &DriverState,
    dialog_id: &DialogId,
    last_saying_genseq: u64,
) -> bool {
    let Some(arc) = state.arena.get(&dialog_id.self_id) else {
        return false;
    };
    let dialog = arc.lock().await;
    let mut saw_call = false;
    for message in dialog.messages.iter().rev() {
        if message.genseq <= last_saying_genseq {
            break;
        }
        if let MessageBody::FuncCall { name, .. } = &message.body {
            saw_call = true;
            if !is_tellask_tool(name) {
                return false;
            }
        }
    }
    saw_call
}

async fn deliver_to_caller(
    state: &DriverState,
    child_id: &DialogId,
    record: &PendingSubdialog,
    content: &str,
    from_agent: &str,
) -> Result<()> {
    let Some(caller_arc) = state.arena.get(&record.caller_dialog_id) else {
        state.emit(
            child_id,
            record.course,
            DialogEvent::Debug {
                dialog_id: child_id.self_id.clone(),
                message: format!(
                    "caller dialog '{}' is gone; dropping reply",
                    record.caller_dialog_id
                ),
            },
        );
        return Ok(());
    };

    let (caller_id, caller_course) = {
        let mut caller = caller_arc.lock().await;
        caller.push(MessageBody::TellaskResult {
            call_id: record.call_id.clone(),
            from_agent: from_agent.to_owned(),
            content: content.to_owned(),
        });
        caller.push(MessageBody::FuncResult {
            call_id: record.call_id.clone(),
            name: tool_name_for(record.call_kind).to_owned(),
            content: content.to_owned(),
            is_error: false,
        });
        (caller.id.clone(), caller.course)
    };

    state
        .store
        .remove_pending_by_call(&child_id.root_id, &record.call_id)?;

    // Refresh a stale blocked snapshot so the scheduler's preflight lets
    // the caller run again. A caller that is mid-drive keeps its state.
    let caller_blocked = state
        .store
        .read_latest(&caller_id.self_id)?
        .map(|s| s.run_state.is_blocked())
        .unwrap_or(false);
    if caller_blocked {
        let idle = state.idle_state(&caller_id);
        state.set_run_state(&caller_id, caller_course, idle);
    }

    tracing::info!(
        child = %child_id,
        caller = %record.caller_dialog_id,
        call_id = %record.call_id,
        "delivered teammate reply upstream"
    );
    state.mark_needs_drive(&record.caller_dialog_id);
    Ok(())
}
