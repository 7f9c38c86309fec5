//! Diligence budget — optional auto-continue prompts.
//!
//! When a root dialog's generation ends without tool calls, the drive
//! consults the budget: under budget, a continuation prompt is injected;
//! at exhaustion a question-for-human is raised instead and the drive
//! breaks until the operator answers.

use dk_domain::PromptOrigin;
use dk_minds::diligence_text;
use dk_store::{CallSiteRef, HumanQuestion, Q4hKind};

use dk_domain::Result;

use crate::dialog::{Dialog, PendingPrompt};
use crate::events::DialogEvent;
use crate::state::DriverState;

/// Body of the question raised when the keep-going budget runs out.
pub const BUDGET_EXHAUSTED_QUESTION: &str =
    "Keep-going budget exhausted: all automatic continuation prompts for \
     this dialog have been used. Answer to continue, or adjust the budget.";

#[derive(Debug)]
pub enum DiligenceDecision {
    /// No push configured or applicable; the drive just breaks.
    Disabled,
    /// Inject this prompt and continue the drive.
    Continue(PendingPrompt),
    /// Budget ran out: a Q4H was raised, the drive breaks.
    BudgetExhausted,
}

/// Decide whether to auto-continue a dialog whose generation produced no
/// tool calls.
pub fn decide(
    state: &DriverState,
    dialog: &mut Dialog,
    lang: Option<&str>,
) -> Result<DiligenceDecision> {
    if !dialog.is_root() || dialog.disable_diligence_push {
        return Ok(DiligenceDecision::Disabled);
    }
    let member_disabled = state
        .team()
        .member(&dialog.agent_id)
        .map(|m| m.disable_diligence_push)
        .unwrap_or(false);
    if member_disabled {
        return Ok(DiligenceDecision::Disabled);
    }

    let text = diligence_text(state.minds(), lang);
    if text.trim().is_empty() {
        return Ok(DiligenceDecision::Disabled);
    }

    let max = state.team().diligence_push_max(&dialog.agent_id);
    let remaining = state
        .store
        .read_latest(&dialog.id.self_id)?
        .map(|s| s.diligence_push_remaining_budget)
        .unwrap_or(0);

    // No ceiling configured and no budget left: nothing to push.
    if max < 1 && remaining < 1 {
        return Ok(DiligenceDecision::Disabled);
    }

    if max >= 1 && remaining.min(max) < 1 {
        raise_budget_exhausted(state, dialog)?;
        emit_budget_event(state, dialog, max, 0);
        return Ok(DiligenceDecision::BudgetExhausted);
    }

    // Under budget (or uncapped with budget left): inject and decrement.
    let remaining_after = remaining - 1;
    state.store.update_latest(&dialog.id.self_id, |s| {
        s.diligence_push_remaining_budget = remaining_after;
    })?;
    dialog.diligence_injected_count += 1;
    emit_budget_event(state, dialog, max, remaining_after);

    Ok(DiligenceDecision::Continue(PendingPrompt {
        content: text,
        origin: PromptOrigin::DiligencePush,
        ..PendingPrompt::default()
    }))
}

fn raise_budget_exhausted(state: &DriverState, dialog: &Dialog) -> Result<()> {
    let question = HumanQuestion::new(
        Q4hKind::KeepGoingBudgetExhausted,
        BUDGET_EXHAUSTED_QUESTION,
        CallSiteRef {
            course: dialog.course,
            message_index: dialog.messages.len() as u64,
        },
    );
    let q4h_id = question.id.clone();
    state.store.add_q4h(&dialog.id.self_id, question)?;
    state.store.update_latest(&dialog.id.self_id, |s| {
        s.diligence_push_remaining_budget = 0;
    })?;
    state.emit(
        &dialog.id,
        dialog.course,
        DialogEvent::NewQ4hAsked {
            dialog_id: dialog.id.self_id.clone(),
            q4h_id,
            kind: Q4hKind::KeepGoingBudgetExhausted,
        },
    );
    Ok(())
}

fn emit_budget_event(state: &DriverState, dialog: &Dialog, max: i64, remaining: i64) {
    state.emit(
        &dialog.id,
        dialog.course,
        DialogEvent::DiligenceBudget {
            dialog_id: dialog.id.self_id.clone(),
            max_inject_count: max,
            injected_count: dialog.diligence_injected_count,
            remaining_count: remaining,
        },
    );
}
