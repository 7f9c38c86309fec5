//! `.minds/` directory loading.
//!
//! The mindset directory holds the team roster (`team.yaml`), the LLM
//! catalog (`llm.yaml`), per-member persona files, the environment intro,
//! and the diligence text. Persona-like files resolve with a language
//! preference: `<stem>.<lang>.md` wins over `<stem>.md`.

pub mod mindset;

use std::path::{Path, PathBuf};

use dk_domain::config::{LlmConfig, TeamConfig};
use dk_domain::{Error, Result};

pub use mindset::{diligence_text, Mindset, DEFAULT_DILIGENCE};

/// Handle to a `.minds/` directory.
#[derive(Debug, Clone)]
pub struct MindsRoot {
    path: PathBuf,
}

impl MindsRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_team(&self) -> Result<TeamConfig> {
        let path = self.path.join("team.yaml");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("reading {}: {e}", path.display()))
        })?;
        let team: TeamConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(team)
    }

    pub fn load_llm(&self) -> Result<LlmConfig> {
        let path = self.path.join("llm.yaml");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("reading {}: {e}", path.display()))
        })?;
        let llm: LlmConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(llm)
    }

    /// Read `<dir>/<stem>.md`, preferring `<dir>/<stem>.<lang>.md` when a
    /// language code is given. Returns `None` when neither file exists.
    pub fn read_localized(&self, dir: &str, stem: &str, lang: Option<&str>) -> Option<String> {
        let base = if dir.is_empty() {
            self.path.clone()
        } else {
            self.path.join(dir)
        };
        if let Some(lang) = lang {
            let localized = base.join(format!("{stem}.{lang}.md"));
            if let Ok(content) = std::fs::read_to_string(&localized) {
                return Some(content);
            }
        }
        std::fs::read_to_string(base.join(format!("{stem}.md"))).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_minds(dir: &Path) {
        std::fs::write(
            dir.join("team.yaml"),
            "members:\n  - id: alice\n  - id: bob\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("llm.yaml"),
            "default_model: m-1\nmodels:\n  m-1:\n    context_length: 1000\n",
        )
        .unwrap();
    }

    #[test]
    fn loads_team_and_llm() {
        let tmp = tempfile::tempdir().unwrap();
        seed_minds(tmp.path());
        let root = MindsRoot::new(tmp.path());

        let team = root.load_team().unwrap();
        assert_eq!(team.members.len(), 2);

        let llm = root.load_llm().unwrap();
        assert_eq!(llm.default_model.as_deref(), Some("m-1"));
    }

    #[test]
    fn missing_team_yaml_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = MindsRoot::new(tmp.path());
        let err = root.load_team().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn localized_file_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let member_dir = tmp.path().join("team/alice");
        std::fs::create_dir_all(&member_dir).unwrap();
        std::fs::write(member_dir.join("persona.md"), "english persona").unwrap();
        std::fs::write(member_dir.join("persona.fr.md"), "persona français").unwrap();

        let root = MindsRoot::new(tmp.path());
        assert_eq!(
            root.read_localized("team/alice", "persona", Some("fr")),
            Some("persona français".into())
        );
        assert_eq!(
            root.read_localized("team/alice", "persona", Some("de")),
            Some("english persona".into())
        );
        assert_eq!(
            root.read_localized("team/alice", "persona", None),
            Some("english persona".into())
        );
        assert_eq!(root.read_localized("team/alice", "knowledge", None), None);
    }
}
