//! Append-only per-course event log.
//!
//! Every event is appended as its own YAML document (`---` separated) to
//! `run/<selfId>/events/<course>.yaml`. The log is audit output; readers
//! get raw YAML values and decide what to do with them.

use std::io::Write;

use serde::{Deserialize, Serialize};

use dk_domain::Result;

use crate::RunStore;

impl RunStore {
    /// Append one event document to the dialog's current course log.
    pub fn append_event<E: Serialize>(&self, self_id: &str, course: u32, event: &E) -> Result<()> {
        let dir = self.dialog_dir(self_id).join("events");
        let path = dir.join(format!("{course}.yaml"));
        let doc = serde_yaml::to_string(event)?;
        self.with_lock(self_id, || -> Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(b"---\n")?;
            file.write_all(doc.as_bytes())?;
            Ok(())
        })
    }

    /// Read back all events of one course as raw YAML values.
    pub fn read_events(&self, self_id: &str, course: u32) -> Result<Vec<serde_yaml::Value>> {
        let path = self
            .dialog_dir(self_id)
            .join("events")
            .join(format!("{course}.yaml"));
        self.with_lock(self_id, || {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let raw = std::fs::read_to_string(&path)?;
            let mut events = Vec::new();
            for document in serde_yaml::Deserializer::from_str(&raw) {
                match serde_yaml::Value::deserialize(document) {
                    Ok(value) => events.push(value),
                    Err(e) => {
                        tracing::warn!(
                            dialog = self_id,
                            course,
                            error = %e,
                            "skipping malformed event document"
                        );
                    }
                }
            }
            Ok(events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestEvent {
        kind: &'static str,
        attempt: u32,
    }

    #[test]
    fn append_and_read_back_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path().join("run")).unwrap();

        store
            .append_event("r1", 0, &TestEvent { kind: "a", attempt: 1 })
            .unwrap();
        store
            .append_event("r1", 0, &TestEvent { kind: "b", attempt: 2 })
            .unwrap();

        let events = store.read_events("r1", 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["kind"], "a");
        assert_eq!(events[1]["kind"], "b");
        assert_eq!(events[1]["attempt"], 2);
    }

    #[test]
    fn courses_are_separate_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path().join("run")).unwrap();

        store
            .append_event("r1", 0, &TestEvent { kind: "c0", attempt: 0 })
            .unwrap();
        store
            .append_event("r1", 1, &TestEvent { kind: "c1", attempt: 0 })
            .unwrap();

        assert_eq!(store.read_events("r1", 0).unwrap().len(), 1);
        assert_eq!(store.read_events("r1", 1).unwrap().len(), 1);
        assert!(store.read_events("r1", 2).unwrap().is_empty());
    }
}
