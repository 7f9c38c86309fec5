//! Pending sub-dialog records.
//!
//! One record per dispatched teammate call whose final reply has not yet
//! been delivered back to the caller. The whole list is rewritten
//! atomically under the dialog's store lock; the tool round appends and
//! the sub-dialog manager removes under the same lock, so the two never
//! interleave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dk_domain::Result;

use crate::{write_atomic, RunStore};

/// Which teammate-call tool produced a sub-dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TellaskKind {
    /// Fire-and-suspend: the caller breaks its drive until the child
    /// answers.
    Sessionless,
    /// Ongoing teammate session call.
    Tellask,
    /// Reply addressed back up the tree.
    Back,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubdialog {
    pub subdialog_id: String,
    pub caller_dialog_id: String,
    pub call_id: String,
    pub call_kind: TellaskKind,
    pub target_agent_id: String,
    pub tellask_content: String,
    pub course: u32,
    pub created_at: DateTime<Utc>,
}

impl RunStore {
    pub fn read_pending(&self, self_id: &str) -> Result<Vec<PendingSubdialog>> {
        let path = self.dialog_dir(self_id).join("pending-subdialogs.yaml");
        self.with_lock(self_id, || {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(serde_yaml::from_str(&raw)?)
        })
    }

    /// Append a pending record.
    pub fn add_pending(&self, self_id: &str, record: PendingSubdialog) -> Result<()> {
        self.mutate_pending(self_id, |records| records.push(record))
    }

    /// Remove and return the record for `subdialog_id`, if present.
    pub fn remove_pending(
        &self,
        self_id: &str,
        subdialog_id: &str,
    ) -> Result<Option<PendingSubdialog>> {
        let mut removed = None;
        self.mutate_pending(self_id, |records| {
            if let Some(pos) = records.iter().position(|r| r.subdialog_id == subdialog_id) {
                removed = Some(records.remove(pos));
            }
        })?;
        Ok(removed)
    }

    /// Remove and return the record for `call_id` (unique per call site).
    pub fn remove_pending_by_call(
        &self,
        self_id: &str,
        call_id: &str,
    ) -> Result<Option<PendingSubdialog>> {
        let mut removed = None;
        self.mutate_pending(self_id, |records| {
            if let Some(pos) = records.iter().position(|r| r.call_id == call_id) {
                removed = Some(records.remove(pos));
            }
        })?;
        Ok(removed)
    }

    /// Read-modify-write the pending list under the dialog's store lock.
    pub fn mutate_pending(
        &self,
        self_id: &str,
        mutate: impl FnOnce(&mut Vec<PendingSubdialog>),
    ) -> Result<()> {
        let path = self.dialog_dir(self_id).join("pending-subdialogs.yaml");
        self.with_lock(self_id, || {
            let mut records: Vec<PendingSubdialog> = if path.exists() {
                let raw = std::fs::read_to_string(&path)?;
                if raw.trim().is_empty() {
                    Vec::new()
                } else {
                    serde_yaml::from_str(&raw)?
                }
            } else {
                Vec::new()
            };
            mutate(&mut records);
            write_atomic(&path, serde_yaml::to_string(&records)?.as_bytes())?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subdialog_id: &str, call_id: &str) -> PendingSubdialog {
        PendingSubdialog {
            subdialog_id: subdialog_id.into(),
            caller_dialog_id: "r1".into(),
            call_id: call_id.into(),
            call_kind: TellaskKind::Sessionless,
            target_agent_id: "bob".into(),
            tellask_content: "fetch X".into(),
            course: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn add_read_remove_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path().join("run")).unwrap();

        assert!(store.read_pending("r1").unwrap().is_empty());

        store.add_pending("r1", record("s1", "c1")).unwrap();
        store.add_pending("r1", record("s2", "c2")).unwrap();
        assert_eq!(store.read_pending("r1").unwrap().len(), 2);

        let removed = store.remove_pending("r1", "s1").unwrap().unwrap();
        assert_eq!(removed.call_id, "c1");
        let left = store.read_pending("r1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].subdialog_id, "s2");
    }

    #[test]
    fn remove_missing_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path().join("run")).unwrap();
        assert!(store.remove_pending("r1", "ghost").unwrap().is_none());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let yaml = serde_yaml::to_string(&TellaskKind::Sessionless).unwrap();
        assert_eq!(yaml.trim(), "sessionless");
    }
}
