use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stop reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a running drive was (or is being) stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopKind {
    /// Operator hit the emergency stop — terminate at the very next
    /// suspension point, skipping in-flight cleanup delays.
    EmergencyStop,
    /// Ordinary operator stop request.
    UserStop,
    /// The driver stopped itself (unrecoverable error, retry exhaustion).
    SystemStop { detail: String },
}

impl std::fmt::Display for StopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopKind::EmergencyStop => write!(f, "emergency_stop"),
            StopKind::UserStop => write!(f, "user_stop"),
            StopKind::SystemStop { detail } => write!(f, "system_stop: {detail}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocked causes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What an idle dialog is waiting on before it can be driven again
/// without fresh operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedOn {
    NeedsHumanInput,
    WaitingForSubdialogs,
    NeedsHumanInputAndSubdialogs,
}

impl BlockedOn {
    /// Combine outstanding Q4H / sub-dialog blockers into one variant.
    pub fn from_flags(needs_human: bool, waiting_subdialogs: bool) -> Option<Self> {
        match (needs_human, waiting_subdialogs) {
            (true, true) => Some(BlockedOn::NeedsHumanInputAndSubdialogs),
            (true, false) => Some(BlockedOn::NeedsHumanInput),
            (false, true) => Some(BlockedOn::WaitingForSubdialogs),
            (false, false) => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-dialog run state. Transitions are monotonic within a drive except
/// `idle → proceeding` and `interrupted → proceeding` (fresh user input or
/// explicit resume). `dead` is terminal for sub-dialogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    IdleWaitingUser,
    Proceeding,
    ProceedingStopRequested {
        reason: StopKind,
    },
    Interrupted {
        reason: StopKind,
    },
    Blocked {
        on: BlockedOn,
    },
    Dead,
}

impl RunState {
    /// Whether the scheduler may drive this dialog without fresh user input.
    pub fn can_auto_drive(&self) -> bool {
        matches!(self, RunState::IdleWaitingUser | RunState::Proceeding)
    }

    /// Whether a drive is currently refused outright (even with user input,
    /// barring an explicit resume).
    pub fn refuses_drive(&self) -> bool {
        matches!(
            self,
            RunState::Dead | RunState::ProceedingStopRequested { .. }
        )
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunState::Interrupted { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RunState::Blocked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_can_auto_drive() {
        assert!(RunState::IdleWaitingUser.can_auto_drive());
        assert!(RunState::Proceeding.can_auto_drive());
    }

    #[test]
    fn blocked_and_interrupted_cannot_auto_drive() {
        let blocked = RunState::Blocked {
            on: BlockedOn::NeedsHumanInput,
        };
        assert!(!blocked.can_auto_drive());
        assert!(blocked.is_blocked());

        let interrupted = RunState::Interrupted {
            reason: StopKind::UserStop,
        };
        assert!(!interrupted.can_auto_drive());
        assert!(interrupted.is_interrupted());
    }

    #[test]
    fn dead_and_stop_requested_refuse_drive() {
        assert!(RunState::Dead.refuses_drive());
        assert!(RunState::ProceedingStopRequested {
            reason: StopKind::UserStop
        }
        .refuses_drive());
        assert!(!RunState::IdleWaitingUser.refuses_drive());
    }

    #[test]
    fn blocked_on_from_flags() {
        assert_eq!(BlockedOn::from_flags(false, false), None);
        assert_eq!(
            BlockedOn::from_flags(true, false),
            Some(BlockedOn::NeedsHumanInput)
        );
        assert_eq!(
            BlockedOn::from_flags(false, true),
            Some(BlockedOn::WaitingForSubdialogs)
        );
        assert_eq!(
            BlockedOn::from_flags(true, true),
            Some(BlockedOn::NeedsHumanInputAndSubdialogs)
        );
    }

    #[test]
    fn run_state_yaml_roundtrip() {
        let states = vec![
            RunState::IdleWaitingUser,
            RunState::Proceeding,
            RunState::Interrupted {
                reason: StopKind::SystemStop {
                    detail: "boom".into(),
                },
            },
            RunState::Blocked {
                on: BlockedOn::NeedsHumanInputAndSubdialogs,
            },
            RunState::Dead,
        ];
        for state in states {
            let yaml = serde_yaml::to_string(&state).unwrap();
            let back: RunState = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, state);
        }
    }
}
