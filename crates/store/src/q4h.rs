//! Outstanding questions-for-human.
//!
//! A dialog with an unanswered Q4H is blocked on human input; the drive
//! loop will not auto-continue it until the operator answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dk_domain::Result;

use crate::{write_atomic, RunStore};

/// Why the driver asked the operator a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Q4hKind {
    KeepGoingBudgetExhausted,
}

/// Where in the dialog log the question was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteRef {
    pub course: u32,
    pub message_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanQuestion {
    pub id: String,
    pub tellask_content: String,
    pub asked_at: DateTime<Utc>,
    pub call_site: CallSiteRef,
    pub kind: Q4hKind,
}

impl HumanQuestion {
    pub fn new(kind: Q4hKind, content: impl Into<String>, call_site: CallSiteRef) -> Self {
        Self {
            id: format!("q4h-{}", Uuid::new_v4()),
            tellask_content: content.into(),
            asked_at: Utc::now(),
            call_site,
            kind,
        }
    }
}

impl RunStore {
    pub fn read_q4h(&self, self_id: &str) -> Result<Vec<HumanQuestion>> {
        let path = self.dialog_dir(self_id).join("q4h.yaml");
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

    pub fn add_q4h(&self, self_id: &str, question: HumanQuestion) -> Result<()> {
        self.mutate_q4h(self_id, |questions| questions.push(question))
    }

    /// Remove and return the question with `q4h_id`, if present.
    pub fn remove_q4h(&self, self_id: &str, q4h_id: &str) -> Result<Option<HumanQuestion>> {
        let mut removed = None;
        self.mutate_q4h(self_id, |questions| {
            if let Some(pos) = questions.iter().position(|q| q.id == q4h_id) {
                removed = Some(questions.remove(pos));
            }
        })?;
        Ok(removed)
    }

    fn mutate_q4h(
        &self,
        self_id: &str,
        mutate: impl FnOnce(&mut Vec<HumanQuestion>),
    ) -> Result<()> {
        let path = self.dialog_dir(self_id).join("q4h.yaml");
        self.with_lock(self_id, || {
            let mut questions: Vec<HumanQuestion> = if path.exists() {
                let raw = std::fs::read_to_string(&path)?;
                if raw.trim().is_empty() {
                    Vec::new()
                } else {
                    serde_yaml::from_str(&raw)?
                }
            } else {
                Vec::new()
            };
            mutate(&mut questions);
            write_atomic(&path, serde_yaml::to_string(&questions)?.as_bytes())?;
            Ok(())
        })
    }
}
