//! Run-state registry.
//!
//! Tracks, per dialog: the active run's abort token, the reason of a
//! pending stop request, and the last broadcast run state (for
//! deduplication). The stored stop reason is authoritative — an
//! `interrupted` broadcast must carry it when present.

use std::collections::HashMap;

use parking_lot::Mutex;

use dk_domain::{CancelToken, RunState, StopKind};

pub struct RunRegistry {
    active: Mutex<HashMap<String, CancelToken>>,
    stop_reasons: Mutex<HashMap<String, StopKind>>,
    last_broadcast: Mutex<HashMap<String, RunState>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            stop_reasons: Mutex::new(HashMap::new()),
            last_broadcast: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh active run for a dialog and hand back its abort
    /// token. Replaces any stale token.
    pub fn begin_run(&self, self_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.active.lock().insert(self_id.to_owned(), token.clone());
        token
    }

    /// Clear the active run and its consumed stop reason.
    pub fn end_run(&self, self_id: &str) {
        self.active.lock().remove(self_id);
        self.stop_reasons.lock().remove(self_id);
    }

    pub fn is_running(&self, self_id: &str) -> bool {
        self.active.lock().contains_key(self_id)
    }

    /// Record a stop request. Cancels the active run's token when one is
    /// live; returns whether a run was active.
    pub fn request_stop(&self, self_id: &str, reason: StopKind) -> bool {
        self.stop_reasons
            .lock()
            .insert(self_id.to_owned(), reason.clone());
        if let Some(token) = self.active.lock().get(self_id) {
            token.cancel(reason);
            true
        } else {
            false
        }
    }

    pub fn stop_reason(&self, self_id: &str) -> Option<StopKind> {
        self.stop_reasons.lock().get(self_id).cloned()
    }

    /// Forget a stored stop reason (operator resume).
    pub fn clear_stop_reason(&self, self_id: &str) {
        self.stop_reasons.lock().remove(self_id);
    }

    /// The interruption reason to broadcast: the stored stop reason when
    /// present, else the fallback the throw site carried.
    pub fn resolve_interruption(&self, self_id: &str, fallback: StopKind) -> StopKind {
        self.stop_reason(self_id).unwrap_or(fallback)
    }

    /// Deduplicate run-state broadcasts. Returns true when `state` differs
    /// from the last broadcast one (and records it).
    pub fn should_broadcast(&self, self_id: &str, state: &RunState) -> bool {
        let mut last = self.last_broadcast.lock();
        match last.get(self_id) {
            Some(previous) if previous == state => false,
            _ => {
                last.insert(self_id.to_owned(), state.clone());
                true
            }
        }
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_end_run_lifecycle() {
        let registry = RunRegistry::new();
        assert!(!registry.is_running("r1"));

        let token = registry.begin_run("r1");
        assert!(registry.is_running("r1"));
        assert!(!token.is_cancelled());

        registry.end_run("r1");
        assert!(!registry.is_running("r1"));
    }

    #[test]
    fn stop_request_cancels_active_token() {
        let registry = RunRegistry::new();
        let token = registry.begin_run("r1");

        assert!(registry.request_stop("r1", StopKind::EmergencyStop));
        assert!(token.is_cancelled());
        assert_eq!(token.stop_reason(), Some(StopKind::EmergencyStop));
        assert_eq!(
            registry.stop_reason("r1"),
            Some(StopKind::EmergencyStop)
        );
    }

    #[test]
    fn stop_request_without_run_returns_false() {
        let registry = RunRegistry::new();
        assert!(!registry.request_stop("idle", StopKind::UserStop));
        // The reason is still stored for the next preflight check.
        assert_eq!(registry.stop_reason("idle"), Some(StopKind::UserStop));
    }

    #[test]
    fn resolve_interruption_prefers_stored_reason() {
        let registry = RunRegistry::new();
        registry.request_stop("r1", StopKind::EmergencyStop);
        assert_eq!(
            registry.resolve_interruption("r1", StopKind::UserStop),
            StopKind::EmergencyStop
        );
        assert_eq!(
            registry.resolve_interruption("r2", StopKind::UserStop),
            StopKind::UserStop
        );
    }

    #[test]
    fn end_run_clears_consumed_stop_reason() {
        let registry = RunRegistry::new();
        registry.begin_run("r1");
        registry.request_stop("r1", StopKind::UserStop);
        registry.end_run("r1");
        assert_eq!(registry.stop_reason("r1"), None);
    }

    #[test]
    fn broadcast_dedup() {
        let registry = RunRegistry::new();
        assert!(registry.should_broadcast("r1", &RunState::Proceeding));
        assert!(!registry.should_broadcast("r1", &RunState::Proceeding));
        assert!(registry.should_broadcast("r1", &RunState::IdleWaitingUser));
        assert!(registry.should_broadcast("r1", &RunState::Proceeding));
    }
}
