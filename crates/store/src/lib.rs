//! Persisted per-dialog state.
//!
//! Layout under the run root, one directory per dialog:
//!
//! ```text
//! run/<selfId>/latest.yaml             # snapshot, atomic replace
//! run/<selfId>/events/<course>.yaml    # append-only event log
//! run/<selfId>/pending-subdialogs.yaml # outstanding teammate calls
//! run/<selfId>/q4h.yaml                # outstanding human questions
//! ```
//!
//! All writes to one dialog's files go through that dialog's store lock, so
//! concurrent mutators merge through the callback API instead of clobbering
//! each other.

pub mod events;
pub mod latest;
pub mod pending;
pub mod q4h;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use dk_domain::Result;

pub use latest::{DialogStatus, LatestSnapshot};
pub use pending::{PendingSubdialog, TellaskKind};
pub use q4h::{CallSiteRef, HumanQuestion, Q4hKind};

/// Filesystem store for dialog run state.
pub struct RunStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RunStore {
    /// Open (creating if needed) a run root directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn dialog_dir(&self, self_id: &str) -> PathBuf {
        self.root.join(self_id)
    }

    /// Run `f` holding the store lock for one dialog.
    pub(crate) fn with_lock<T>(&self, self_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(self_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock();
        f()
    }

    /// Dialog ids present on disk.
    pub fn dialog_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        ids.push(name.to_owned());
                    }
                }
            }
        }
        ids.sort();
        ids
    }
}

/// Write `bytes` to `path` via a temp file + rename so readers never see a
/// torn file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_ids_lists_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path().join("run")).unwrap();
        assert!(store.dialog_ids().is_empty());

        std::fs::create_dir_all(store.dialog_dir("r2")).unwrap();
        std::fs::create_dir_all(store.dialog_dir("r1")).unwrap();
        // Stray files are ignored.
        std::fs::write(store.root().join("noise.txt"), "x").unwrap();

        assert_eq!(store.dialog_ids(), vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/file.yaml");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        // No temp file left behind.
        assert!(!path.with_extension("yaml.tmp").exists());
    }
}
