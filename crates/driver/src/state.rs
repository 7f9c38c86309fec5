//! Shared driver state.
//!
//! Every service the core needs, injected behind `Arc`s so a process can
//! host multiple independent drivers (and tests can build throwaway
//! instances).

use std::sync::Arc;

use dk_domain::config::{LlmConfig, ModelMeta, TeamConfig};
use dk_domain::{BlockedOn, DialogId, Error, Result, RunState};
use dk_minds::MindsRoot;
use dk_providers::{LlmCall, LlmProvider};
use dk_store::RunStore;

use crate::dialog::{Dialog, DialogArena, UpNextQueues};
use crate::events::{DialogEvent, EventBus};
use crate::registry::RunRegistry;
use crate::scheduler::DriveScheduler;
use crate::tools::ToolRegistry;

#[derive(Clone)]
pub struct DriverState {
    minds: Arc<MindsRoot>,
    team: Arc<TeamConfig>,
    llm: Arc<LlmConfig>,
    provider: Arc<dyn LlmProvider>,
    pub llm_call: Arc<LlmCall>,
    pub store: Arc<RunStore>,
    pub arena: Arc<DialogArena>,
    pub up_next: Arc<UpNextQueues>,
    pub registry: Arc<RunRegistry>,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<DriveScheduler>,
    tools: Arc<ToolRegistry>,
}

impl DriverState {
    pub fn new(
        minds: MindsRoot,
        team: TeamConfig,
        llm: LlmConfig,
        provider: Arc<dyn LlmProvider>,
        store: RunStore,
        tools: ToolRegistry,
    ) -> Self {
        let llm_call = Arc::new(LlmCall::new(llm.retry.clone()));
        Self {
            minds: Arc::new(minds),
            team: Arc::new(team),
            llm: Arc::new(llm),
            provider,
            llm_call,
            store: Arc::new(store),
            arena: Arc::new(DialogArena::new()),
            up_next: Arc::new(UpNextQueues::new()),
            registry: Arc::new(RunRegistry::new()),
            bus: Arc::new(EventBus::new()),
            scheduler: Arc::new(DriveScheduler::new()),
            tools: Arc::new(tools),
        }
    }

    pub fn minds(&self) -> &MindsRoot {
        &self.minds
    }

    pub fn team(&self) -> &TeamConfig {
        &self.team
    }

    pub fn llm(&self) -> &LlmConfig {
        &self.llm
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Publish to the bus and append to the dialog's persisted event log.
    pub fn emit(&self, id: &DialogId, course: u32, event: DialogEvent) {
        if let Err(e) = self.store.append_event(&id.self_id, course, &event) {
            tracing::warn!(dialog = %id, error = %e, "failed to append event log");
        }
        self.bus.publish(&id.root_id, event);
    }

    /// Broadcast + persist a run-state change, deduplicated against the
    /// last broadcast state.
    pub fn set_run_state(&self, id: &DialogId, course: u32, state: RunState) {
        if !self.registry.should_broadcast(&id.self_id, &state) {
            return;
        }
        if let Err(e) = self
            .store
            .update_latest(&id.self_id, |s| s.run_state = state.clone())
        {
            tracing::warn!(dialog = %id, error = %e, "failed to persist run state");
        }
        self.emit(
            id,
            course,
            DialogEvent::DlgRunState {
                dialog_id: id.self_id.clone(),
                state,
            },
        );
    }

    // ── Idle-state computation ─────────────────────────────────────

    /// The state an idle dialog settles into: blocked on outstanding Q4H
    /// and/or pending sub-dialogs, else waiting for the user.
    pub fn idle_state(&self, id: &DialogId) -> RunState {
        let needs_human = self
            .store
            .read_q4h(&id.self_id)
            .map(|qs| !qs.is_empty())
            .unwrap_or(false);
        let waiting_subdialogs = self
            .store
            .read_pending(&id.root_id)
            .map(|records| {
                records
                    .iter()
                    .any(|r| r.caller_dialog_id == id.self_id)
            })
            .unwrap_or(false);
        match BlockedOn::from_flags(needs_human, waiting_subdialogs) {
            Some(on) => RunState::Blocked { on },
            None => RunState::IdleWaitingUser,
        }
    }

    // ── Needs-drive bookkeeping ────────────────────────────────────

    /// Flag a dialog for driving: scheduler set + persisted snapshot.
    pub fn mark_needs_drive(&self, self_id: &str) {
        self.persist_needs_drive(self_id, true);
        self.scheduler.flag(self_id);
    }

    pub(crate) fn persist_needs_drive(&self, self_id: &str, needs_drive: bool) {
        if let Err(e) = self
            .store
            .update_latest(self_id, |s| s.needs_drive = needs_drive)
        {
            tracing::warn!(dialog = self_id, error = %e, "failed to persist needs-drive flag");
        }
    }

    /// Full dialog id for a `self_id`: arena first, persisted snapshot as
    /// fallback.
    pub fn dialog_id_of(&self, self_id: &str) -> Option<DialogId> {
        if let Some(meta) = self.arena.meta(self_id) {
            return Some(meta.id);
        }
        match self.store.read_latest(self_id) {
            Ok(Some(snapshot)) if !snapshot.root_id.is_empty() => {
                Some(DialogId::sub(self_id, snapshot.root_id))
            }
            Ok(Some(_)) => Some(DialogId::root(self_id)),
            _ => None,
        }
    }

    // ── Model resolution ───────────────────────────────────────────

    /// Resolve the model id + metadata for a dialog: dialog override →
    /// member model → team default → llm default.
    pub fn resolve_model(&self, dialog: &Dialog) -> Result<(String, ModelMeta)> {
        let model_id = dialog
            .model_override
            .as_deref()
            .or_else(|| self.team.model_for(&dialog.agent_id))
            .or(self.llm.default_model.as_deref())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no model configured for agent '{}'",
                    dialog.agent_id
                ))
            })?;
        let meta = self.llm.model(model_id).ok_or_else(|| {
            Error::Config(format!("model '{model_id}' is not in llm.yaml"))
        })?;
        Ok((model_id.to_owned(), meta.clone()))
    }
}
