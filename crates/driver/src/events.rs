//! Typed dialog lifecycle event bus.
//!
//! Fire-and-forget pub/sub: publishing never blocks the producer, slow
//! subscribers lag and drop (tokio broadcast semantics). Subscribers
//! register per root dialog or globally; an `end_of_stream` sentinel is
//! broadcast on shutdown.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use dk_domain::{GenSeq, RunState};
use dk_providers::LlmRetryEvent;
use dk_store::Q4hKind;

const CHANNEL_CAPACITY: usize = 256;

/// Events observable on the bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DialogEvent {
    DlgRunState {
        dialog_id: String,
        state: RunState,
    },
    NewQ4hAsked {
        dialog_id: String,
        q4h_id: String,
        kind: Q4hKind,
    },
    Q4hAnswered {
        dialog_id: String,
        q4h_id: String,
    },
    DiligenceBudget {
        dialog_id: String,
        max_inject_count: i64,
        injected_count: i64,
        remaining_count: i64,
    },
    LlmRetry {
        dialog_id: String,
        #[serde(flatten)]
        retry: LlmRetryEvent,
    },
    TeammateCallStart {
        dialog_id: String,
        subdialog_id: String,
        target_agent_id: String,
        call_id: String,
    },
    GeneratingStart {
        dialog_id: String,
        genseq: GenSeq,
    },
    GeneratingFinish {
        dialog_id: String,
        genseq: GenSeq,
    },
    /// Best-effort notification that a drive is terminating on an error.
    StreamError {
        dialog_id: String,
        message: String,
    },
    /// Diagnostic payloads (e.g. pending-subdialog inventory on a failed
    /// delivery). Never fatal.
    Debug {
        dialog_id: String,
        message: String,
    },
    /// Terminates subscriber streams.
    EndOfStream,
}

/// Per-root + global broadcast fan-out.
pub struct EventBus {
    by_root: RwLock<HashMap<String, broadcast::Sender<DialogEvent>>>,
    global: broadcast::Sender<DialogEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            by_root: RwLock::new(HashMap::new()),
            global,
        }
    }

    /// Subscribe to one root's events, or to everything.
    pub fn subscribe(&self, root_id: Option<&str>) -> broadcast::Receiver<DialogEvent> {
        match root_id {
            None => self.global.subscribe(),
            Some(root) => {
                let mut by_root = self.by_root.write();
                by_root
                    .entry(root.to_owned())
                    .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                    .subscribe()
            }
        }
    }

    /// Publish an event for a root dialog tree. Never blocks; events to
    /// channels with no subscribers are dropped.
    pub fn publish(&self, root_id: &str, event: DialogEvent) {
        if let Some(tx) = self.by_root.read().get(root_id) {
            let _ = tx.send(event.clone());
        }
        let _ = self.global.send(event);
    }

    /// Broadcast the end-of-stream sentinel to every subscriber.
    pub fn shutdown(&self) {
        let by_root = self.by_root.read();
        for tx in by_root.values() {
            let _ = tx.send(DialogEvent::EndOfStream);
        }
        let _ = self.global.send(DialogEvent::EndOfStream);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
