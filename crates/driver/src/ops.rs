//! Operator surface: input, stop, resume, answer.
//!
//! These are the only entry points external parties use to move a dialog;
//! everything else happens through the scheduler. Each operation touches
//! persisted state and the needs-drive set — none of them takes a dialog
//! lock.

use dk_domain::{DialogId, Error, PromptOrigin, Result, RunState, StopKind};

use crate::dialog::{Dialog, PendingPrompt};
use crate::events::DialogEvent;
use crate::state::DriverState;

/// Submit operator input to a root dialog, opening it if needed.
pub fn operator_input(state: &DriverState, dialog_id: &str, content: &str) -> Result<()> {
    ensure_root_dialog(state, dialog_id)?;
    replenish_diligence_budget(state, dialog_id)?;
    state
        .up_next
        .push(dialog_id, PendingPrompt::user(content));
    state.mark_needs_drive(dialog_id);
    tracing::info!(dialog = dialog_id, "operator input queued");
    Ok(())
}

/// Request a stop. A live run is aborted at its next suspension point; an
/// idle dialog goes straight to `interrupted`.
pub fn operator_stop(state: &DriverState, dialog_id: &str, reason: StopKind) -> Result<()> {
    let id = state
        .dialog_id_of(dialog_id)
        .ok_or_else(|| Error::Config(format!("unknown dialog '{dialog_id}'")))?;
    let course = state
        .store
        .read_latest(dialog_id)?
        .map(|s| s.course)
        .unwrap_or(0);

    let was_running = state.registry.request_stop(dialog_id, reason.clone());
    if was_running {
        state.set_run_state(
            &id,
            course,
            RunState::ProceedingStopRequested {
                reason: reason.clone(),
            },
        );
        tracing::info!(dialog = dialog_id, %reason, "stop requested for running drive");
    } else {
        state.set_run_state(&id, course, RunState::Interrupted { reason: reason.clone() });
        tracing::info!(dialog = dialog_id, %reason, "idle dialog interrupted");
    }
    Ok(())
}

/// Resume an interrupted dialog: clear the stop reason, settle the idle
/// state, and re-queue it.
pub fn operator_resume(state: &DriverState, dialog_id: &str) -> Result<()> {
    let snapshot = state
        .store
        .read_latest(dialog_id)?
        .ok_or_else(|| Error::Config(format!("unknown dialog '{dialog_id}'")))?;
    if !snapshot.run_state.is_interrupted() {
        return Err(Error::DriveRefused(format!(
            "dialog '{dialog_id}' is not interrupted"
        )));
    }
    let id = state
        .dialog_id_of(dialog_id)
        .unwrap_or_else(|| DialogId::root(dialog_id));

    state.registry.clear_stop_reason(dialog_id);
    let idle = state.idle_state(&id);
    state.set_run_state(&id, snapshot.course, idle);
    state.mark_needs_drive(dialog_id);
    tracing::info!(dialog = dialog_id, "dialog resumed");
    Ok(())
}

/// Answer an outstanding question-for-human. The answer becomes a
/// user-originated prompt on the owning dialog.
pub fn operator_answer(state: &DriverState, q4h_id: &str, text: &str) -> Result<()> {
    for self_id in state.store.dialog_ids() {
        let Some(question) = state.store.remove_q4h(&self_id, q4h_id)? else {
            continue;
        };
        replenish_diligence_budget(state, &self_id)?;
        let id = state
            .dialog_id_of(&self_id)
            .unwrap_or_else(|| DialogId::root(&self_id));
        state.emit(
            &id,
            question.call_site.course,
            DialogEvent::Q4hAnswered {
                dialog_id: self_id.clone(),
                q4h_id: q4h_id.to_owned(),
            },
        );
        state.up_next.push(
            &self_id,
            PendingPrompt {
                content: text.to_owned(),
                origin: PromptOrigin::User,
                ..PendingPrompt::default()
            },
        );
        state.mark_needs_drive(&self_id);
        tracing::info!(dialog = %self_id, q4h = q4h_id, "question answered");
        return Ok(());
    }
    Err(Error::Config(format!("unknown question '{q4h_id}'")))
}

/// Make sure a root dialog exists in the arena, creating (or rehydrating
/// after a restart) from persisted state when needed.
fn ensure_root_dialog(state: &DriverState, dialog_id: &str) -> Result<()> {
    if state.arena.contains(dialog_id) {
        return Ok(());
    }

    let snapshot = state.store.read_latest(dialog_id)?;
    let agent_id = match &snapshot {
        Some(snap) if !snap.agent_id.is_empty() => snap.agent_id.clone(),
        _ => default_root_agent(state)?,
    };

    let mut dialog = Dialog::new_root(dialog_id, agent_id.clone());
    if let Some(snap) = &snapshot {
        dialog.course = snap.course;
    }
    state.arena.insert(dialog);

    if snapshot.is_none() {
        let budget = state.team().diligence_push_max(&agent_id);
        state.store.update_latest(dialog_id, |s| {
            s.agent_id = agent_id.clone();
            s.root_id = dialog_id.to_owned();
            s.diligence_push_remaining_budget = budget;
        })?;
        tracing::info!(dialog = dialog_id, agent = %agent_id, "root dialog opened");
    }
    Ok(())
}

/// Fresh operator attention restores the auto-continue budget; the
/// exhaustion question stops nagging only until it is answered.
fn replenish_diligence_budget(state: &DriverState, self_id: &str) -> Result<()> {
    let Some(snapshot) = state.store.read_latest(self_id)? else {
        return Ok(());
    };
    if snapshot.agent_id.is_empty() {
        return Ok(());
    }
    let budget = state.team().diligence_push_max(&snapshot.agent_id);
    if snapshot.diligence_push_remaining_budget != budget {
        state.store.update_latest(self_id, |s| {
            s.diligence_push_remaining_budget = budget;
        })?;
    }
    Ok(())
}

fn default_root_agent(state: &DriverState) -> Result<String> {
    state
        .team()
        .defaults
        .root_agent
        .clone()
        .or_else(|| state.team().members.first().map(|m| m.id.clone()))
        .ok_or_else(|| Error::Config("team has no members to own a root dialog".into()))
}
