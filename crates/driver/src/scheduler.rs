//! Global drive scheduler.
//!
//! A single long-running loop over the needs-drive set. Each flagged
//! dialog gets its drive spawned as its own task (drives across dialogs
//! run concurrently; the per-dialog lock serializes within one dialog).
//! When nothing is flagged the loop parks on the drive trigger until an
//! external party — operator input, a finished child, a diligence push —
//! flips a flag.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use dk_domain::Error;

use crate::drive::{drive_dialog, DriveOpts};
use crate::state::DriverState;

pub struct DriveScheduler {
    needs_drive: Mutex<HashSet<String>>,
    trigger: Notify,
    shutdown: AtomicBool,
}

impl DriveScheduler {
    pub fn new() -> Self {
        Self {
            needs_drive: Mutex::new(HashSet::new()),
            trigger: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Flag a dialog for driving and wake the loop. Returns false when the
    /// dialog was already flagged.
    pub fn flag(&self, self_id: &str) -> bool {
        let inserted = self.needs_drive.lock().insert(self_id.to_owned());
        self.trigger.notify_one();
        inserted
    }

    pub fn unflag(&self, self_id: &str) {
        self.needs_drive.lock().remove(self_id);
    }

    pub fn is_flagged(&self, self_id: &str) -> bool {
        self.needs_drive.lock().contains(self_id)
    }

    pub fn flagged(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.needs_drive.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn drain(&self) -> Vec<String> {
        let mut set = self.needs_drive.lock();
        let mut ids: Vec<String> = set.drain().collect();
        ids.sort();
        ids
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.trigger.notify_one();
    }

    /// The scheduler loop. Runs until [`request_shutdown`].
    pub async fn run(self: Arc<Self>, state: DriverState) {
        tracing::info!("drive scheduler started");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let batch = self.drain();
            if batch.is_empty() {
                self.trigger.notified().await;
                continue;
            }
            for self_id in batch {
                let state = state.clone();
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.drive_one(state, &self_id).await;
                });
            }
        }
        tracing::info!("drive scheduler stopped");
    }

    /// Drive one flagged dialog and re-evaluate its suspension afterwards.
    async fn drive_one(&self, state: DriverState, self_id: &str) {
        // Preflight on persisted state: stopped or interrupted dialogs are
        // skipped (their flag is already drained).
        match state.store.read_latest(self_id) {
            Ok(Some(snapshot)) => {
                if snapshot.run_state.refuses_drive() || snapshot.run_state.is_interrupted() {
                    state.persist_needs_drive(self_id, false);
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(dialog = self_id, error = %e, "failed to read snapshot, skipping");
                return;
            }
        }

        let opts = DriveOpts {
            wait_in_queue: true,
            ..DriveOpts::default()
        };
        match drive_dialog(&state, self_id, None, opts).await {
            Ok(_) => {}
            Err(Error::DriveRefused(reason)) => {
                tracing::debug!(dialog = self_id, reason, "drive refused");
            }
            Err(e) => {
                tracing::warn!(dialog = self_id, error = %e, "drive failed");
            }
        }

        // Re-evaluate suspension: queued up-next or blocked keeps the flag,
        // anything else clears it.
        let keep_flagged = {
            let has_up_next = !state.up_next.is_empty(self_id);
            let blocked = state
                .store
                .read_latest(self_id)
                .ok()
                .flatten()
                .map(|s| s.run_state.is_blocked())
                .unwrap_or(false);
            has_up_next || blocked
        };
        if keep_flagged {
            self.flag(self_id);
            state.persist_needs_drive(self_id, true);
        } else {
            state.persist_needs_drive(self_id, false);
        }
    }
}

impl Default for DriveScheduler {
    fn default() -> Self {
        Self::new()
    }
}
