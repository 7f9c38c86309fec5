//! Per-agent mindset assembly.
//!
//! A mindset is everything the policy guardrail folds into the effective
//! system prompt for one agent: persona, knowledge, lessons, the
//! environment intro, and the visible team roster.

use dk_domain::config::TeamConfig;

use crate::MindsRoot;

/// Built-in continuation text used when no diligence file exists.
pub const DEFAULT_DILIGENCE: &str =
    "Keep going: continue working toward the current goal. If you are truly \
     done, say so and summarize the outcome.";

/// One visible teammate in the roster block.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub name: Option<String>,
}

/// Everything loaded from `.minds/` for one agent.
#[derive(Debug, Clone, Default)]
pub struct Mindset {
    pub agent_id: String,
    pub persona: Option<String>,
    pub knowledge: Option<String>,
    pub lessons: Option<String>,
    pub env_intro: Option<String>,
    /// Non-hidden teammates, in roster order.
    pub roster: Vec<RosterEntry>,
}

impl Mindset {
    /// Load the mindset for `agent_id`, preferring `<stem>.<lang>.md` files
    /// when a language code is given.
    pub fn load(
        root: &MindsRoot,
        team: &TeamConfig,
        agent_id: &str,
        lang: Option<&str>,
    ) -> Self {
        let member_dir = format!("team/{agent_id}");
        let roster = team
            .members
            .iter()
            .filter(|m| !m.hidden)
            .map(|m| RosterEntry {
                id: m.id.clone(),
                name: m.name.clone(),
            })
            .collect();

        Self {
            agent_id: agent_id.to_owned(),
            persona: root.read_localized(&member_dir, "persona", lang),
            knowledge: root.read_localized(&member_dir, "knowledge", lang),
            lessons: root.read_localized(&member_dir, "lessons", lang),
            env_intro: root.read_localized("", "env", lang),
            roster,
        }
    }
}

/// Resolve the diligence continuation text:
/// `.minds/diligence.<lang>.md` → `.minds/diligence.md` → built-in.
///
/// Returns the file content verbatim when a file exists — an empty file is
/// how operators disable diligence pushes, so no fallback applies then.
pub fn diligence_text(root: &MindsRoot, lang: Option<&str>) -> String {
    root.read_localized("", "diligence", lang)
        .unwrap_or_else(|| DEFAULT_DILIGENCE.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_domain::config::{MemberConfig, TeamConfig};

    fn member(id: &str, hidden: bool) -> MemberConfig {
        MemberConfig {
            id: id.into(),
            name: Some(format!("{id} name")),
            model: None,
            diligence_push_max: None,
            hidden,
            disable_diligence_push: false,
            fresh_boots_reasoning: false,
        }
    }

    #[test]
    fn load_reads_persona_files_and_roster() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("team/alice");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("persona.md"), "I am Alice.").unwrap();
        std::fs::write(dir.join("lessons.md"), "Measure twice.").unwrap();
        std::fs::write(tmp.path().join("env.md"), "Staging cluster.").unwrap();

        let root = MindsRoot::new(tmp.path());
        let team = TeamConfig {
            members: vec![member("alice", false), member("ghost", true)],
            ..TeamConfig::default()
        };
        let mindset = Mindset::load(&root, &team, "alice", None);

        assert_eq!(mindset.persona.as_deref(), Some("I am Alice."));
        assert_eq!(mindset.knowledge, None);
        assert_eq!(mindset.lessons.as_deref(), Some("Measure twice."));
        assert_eq!(mindset.env_intro.as_deref(), Some("Staging cluster."));
        // Hidden members are not in the roster.
        assert_eq!(mindset.roster.len(), 1);
        assert_eq!(mindset.roster[0].id, "alice");
    }

    #[test]
    fn diligence_fallback_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let root = MindsRoot::new(tmp.path());

        // No file at all: built-in.
        assert_eq!(diligence_text(&root, None), DEFAULT_DILIGENCE);

        // Plain file.
        std::fs::write(tmp.path().join("diligence.md"), "push on").unwrap();
        assert_eq!(diligence_text(&root, Some("fr")), "push on");

        // Localized file wins.
        std::fs::write(tmp.path().join("diligence.fr.md"), "continuez").unwrap();
        assert_eq!(diligence_text(&root, Some("fr")), "continuez");
        assert_eq!(diligence_text(&root, None), "push on");
    }

    #[test]
    fn empty_diligence_file_is_returned_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("diligence.md"), "").unwrap();
        let root = MindsRoot::new(tmp.path());
        assert_eq!(diligence_text(&root, None), "");
    }
}
