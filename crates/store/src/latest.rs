//! Per-dialog `latest.yaml` snapshot.
//!
//! Writers never replace the whole snapshot blindly: every mutation goes
//! through [`RunStore::update_latest`], which re-reads the current file
//! under the dialog's store lock, applies the mutator, and flushes
//! atomically — concurrent patches merge instead of clobbering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dk_domain::{Result, RunState};

use crate::{write_atomic, RunStore};

/// Lifecycle status of a dialog. Dialogs are never physically destroyed
/// during the process lifetime, only transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DialogStatus {
    #[default]
    Running,
    Completed,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestSnapshot {
    pub status: DialogStatus,
    pub run_state: RunState,
    pub agent_id: String,
    pub root_id: String,
    /// Parent dialog, for sub-dialogs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supdialog_id: Option<String>,
    #[serde(default)]
    pub course: u32,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub function_call_count: u64,
    #[serde(default)]
    pub needs_drive: bool,
    #[serde(default)]
    pub diligence_push_remaining_budget: i64,
    pub updated_at: DateTime<Utc>,
}

impl Default for LatestSnapshot {
    fn default() -> Self {
        Self {
            status: DialogStatus::Running,
            run_state: RunState::IdleWaitingUser,
            agent_id: String::new(),
            root_id: String::new(),
            supdialog_id: None,
            course: 0,
            message_count: 0,
            function_call_count: 0,
            needs_drive: false,
            diligence_push_remaining_budget: 0,
            updated_at: Utc::now(),
        }
    }
}

impl RunStore {
    /// Read the snapshot, `None` when the dialog has never been persisted.
    pub fn read_latest(&self, self_id: &str) -> Result<Option<LatestSnapshot>> {
        let path = self.dialog_dir(self_id).join("latest.yaml");
        self.with_lock(self_id, || {
            if !path.exists() {
                return Ok(None);
            }
            let raw = std::fs::read_to_string(&path)?;
            Ok(Some(serde_yaml::from_str(&raw)?))
        })
    }

    /// Read-modify-write the snapshot under the dialog's store lock.
    /// Missing files start from the default snapshot.
    pub fn update_latest(
        &self,
        self_id: &str,
        mutate: impl FnOnce(&mut LatestSnapshot),
    ) -> Result<LatestSnapshot> {
        let path = self.dialog_dir(self_id).join("latest.yaml");
        self.with_lock(self_id, || {
            let mut snapshot: LatestSnapshot = if path.exists() {
                serde_yaml::from_str(&std::fs::read_to_string(&path)?)?
            } else {
                LatestSnapshot::default()
            };
            mutate(&mut snapshot);
            snapshot.updated_at = Utc::now();
            write_atomic(&path, serde_yaml::to_string(&snapshot)?.as_bytes())?;
            Ok(snapshot)
        })
    }
}
