//! In-memory dialogs and the process-wide arena.
//!
//! Dialogs live in an arena keyed by `self_id` to avoid cyclic ownership
//! between roots and sub-dialogs; a sub-dialog stores only its
//! `supdialog_id` and resolves it on demand. Each dialog is wrapped in a
//! `tokio::sync::Mutex` — that mutex IS the per-dialog exclusive lock a
//! drive holds for its whole duration, and `try_lock` implements the
//! "reject when locked and not waiting in queue" preflight.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use dk_domain::{ChatMessage, ContextHealth, DialogId, GenSeq, MessageBody, PromptOrigin};
use dk_store::{DialogStatus, TellaskKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts and reminders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which caller call-slot a dialog's eventual answer should fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyTarget {
    pub owner_dialog_id: String,
    pub call_kind: TellaskKind,
    pub call_id: String,
}

/// A queued "up-next" prompt, consumed at the start of the next drive
/// iteration.
#[derive(Debug, Clone, Default)]
pub struct PendingPrompt {
    pub content: String,
    pub origin: PromptOrigin,
    pub msg_id: Option<String>,
    pub user_language_code: Option<String>,
    pub subdialog_reply_target: Option<ReplyTarget>,
    pub q4h_answer_call_ids: Vec<String>,
}

impl PendingPrompt {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            origin: PromptOrigin::User,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dialog {
    pub id: DialogId,
    pub agent_id: String,
    /// Parent dialog for sub-dialogs; resolved through the arena.
    pub supdialog_id: Option<DialogId>,
    pub status: DialogStatus,
    pub messages: Vec<ChatMessage>,
    pub reminders: Vec<Reminder>,
    pub course: u32,
    pub disable_diligence_push: bool,
    /// The caution remediation prompt fires at most once per dialog
    /// instance.
    pub caution_remediation_injected: bool,
    /// Set by the mind-clearing tool; the drive bumps the course after the
    /// current tool round so call/result pairs never straddle courses.
    pub pending_mind_clear: bool,
    /// Diligence prompts injected into this dialog instance.
    pub diligence_injected_count: i64,
    pub model_override: Option<String>,
    pub last_health: Option<ContextHealth>,
    pub taskdoc: Option<String>,
    genseq: GenSeq,
    next_reminder_id: u32,
}

impl Dialog {
    pub fn new_root(self_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self::new(DialogId::root(self_id), agent_id, None)
    }

    pub fn new_sub(
        id: DialogId,
        agent_id: impl Into<String>,
        supdialog_id: DialogId,
    ) -> Self {
        Self::new(id, agent_id, Some(supdialog_id))
    }

    fn new(id: DialogId, agent_id: impl Into<String>, supdialog_id: Option<DialogId>) -> Self {
        Self {
            id,
            agent_id: agent_id.into(),
            supdialog_id,
            status: DialogStatus::Running,
            messages: Vec::new(),
            reminders: Vec::new(),
            course: 0,
            disable_diligence_push: false,
            caution_remediation_injected: false,
            pending_mind_clear: false,
            diligence_injected_count: 0,
            model_override: None,
            last_health: None,
            taskdoc: None,
            genseq: 0,
            next_reminder_id: 1,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    /// Allocate the next sequence number. Strictly increasing within the
    /// dialog; drive iterations and messages draw from the same sequence.
    pub fn alloc_genseq(&mut self) -> GenSeq {
        self.genseq += 1;
        self.genseq
    }

    pub fn current_genseq(&self) -> GenSeq {
        self.genseq
    }

    /// Append a message at the current course with a fresh genseq.
    pub fn push(&mut self, body: MessageBody) -> &ChatMessage {
        let genseq = self.alloc_genseq();
        let message = ChatMessage::new(genseq, self.course, body);
        self.messages.push(message);
        self.messages.last().expect("just pushed")
    }

    /// Messages belonging to the current course.
    pub fn course_messages(&self) -> &[ChatMessage] {
        let start = self
            .messages
            .iter()
            .position(|m| m.course == self.course)
            .unwrap_or(self.messages.len());
        &self.messages[start..]
    }

    /// Latest assistant saying, with its genseq.
    pub fn last_saying(&self) -> Option<(&str, GenSeq)> {
        self.messages
            .iter()
            .rev()
            .find_map(|m| m.saying_content().map(|content| (content, m.genseq)))
    }

    /// Genseq of the latest function call, 0 when none.
    pub fn last_func_call_genseq(&self) -> GenSeq {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_func_call())
            .map(|m| m.genseq)
            .unwrap_or(0)
    }

    pub fn function_call_count(&self) -> u64 {
        self.messages.iter().filter(|m| m.is_func_call()).count() as u64
    }

    /// Begin a fresh course. Older courses stay in the log for audit but
    /// drop out of the provider projection.
    pub fn start_new_course(&mut self) -> u32 {
        self.course += 1;
        self.course
    }

    // ── Reminders ──────────────────────────────────────────────────

    pub fn add_reminder(&mut self, content: impl Into<String>) -> u32 {
        let id = self.next_reminder_id;
        self.next_reminder_id += 1;
        self.reminders.push(Reminder {
            id,
            content: content.into(),
            created_at: Utc::now(),
        });
        id
    }

    pub fn update_reminder(&mut self, id: u32, content: impl Into<String>) -> bool {
        if let Some(reminder) = self.reminders.iter_mut().find(|r| r.id == id) {
            reminder.content = content.into();
            true
        } else {
            false
        }
    }

    pub fn delete_reminder(&mut self, id: u32) -> bool {
        let before = self.reminders.len();
        self.reminders.retain(|r| r.id != id);
        self.reminders.len() != before
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arena
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable facts about an arena entry, readable without the dialog lock.
#[derive(Debug, Clone)]
pub struct DialogMeta {
    pub id: DialogId,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
}

struct ArenaEntry {
    meta: DialogMeta,
    dialog: Arc<Mutex<Dialog>>,
}

/// Process-wide dialog registry keyed by `self_id`.
pub struct DialogArena {
    entries: RwLock<HashMap<String, ArenaEntry>>,
}

impl DialogArena {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, dialog: Dialog) -> Arc<Mutex<Dialog>> {
        let meta = DialogMeta {
            id: dialog.id.clone(),
            agent_id: dialog.agent_id.clone(),
            created_at: Utc::now(),
        };
        let self_id = dialog.id.self_id.clone();
        let arc = Arc::new(Mutex::new(dialog));
        self.entries.write().insert(
            self_id,
            ArenaEntry {
                meta,
                dialog: arc.clone(),
            },
        );
        arc
    }

    pub fn get(&self, self_id: &str) -> Option<Arc<Mutex<Dialog>>> {
        self.entries.read().get(self_id).map(|e| e.dialog.clone())
    }

    pub fn meta(&self, self_id: &str) -> Option<DialogMeta> {
        self.entries.read().get(self_id).map(|e| e.meta.clone())
    }

    pub fn contains(&self, self_id: &str) -> bool {
        self.entries.read().contains_key(self_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Most recently created sub-dialog of `root_id` owned by `agent_id`.
    /// Used by ongoing-session teammate calls to reuse an existing child.
    pub fn latest_subdialog_for(&self, root_id: &str, agent_id: &str) -> Option<DialogMeta> {
        self.entries
            .read()
            .values()
            .filter(|e| {
                !e.meta.id.is_root()
                    && e.meta.id.root_id == root_id
                    && e.meta.agent_id == agent_id
            })
            .max_by_key(|e| e.meta.created_at)
            .map(|e| e.meta.clone())
    }
}

impl Default for DialogArena {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Up-next queues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Queued prompts per dialog, kept outside the dialog locks so any party
/// (operator, teammate dispatch, diligence) can enqueue without holding —
/// or waiting for — the target dialog's drive lock.
pub struct UpNextQueues {
    queues: RwLock<HashMap<String, VecDeque<PendingPrompt>>>,
}

impl UpNextQueues {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn push(&self, self_id: &str, prompt: PendingPrompt) {
        self.queues
            .write()
            .entry(self_id.to_owned())
            .or_default()
            .push_back(prompt);
    }

    pub fn pop(&self, self_id: &str) -> Option<PendingPrompt> {
        self.queues.write().get_mut(self_id)?.pop_front()
    }

    pub fn is_empty(&self, self_id: &str) -> bool {
        self.queues
            .read()
            .get(self_id)
            .map(|q| q.is_empty())
            .unwrap_or(true)
    }

    pub fn len(&self, self_id: &str) -> usize {
        self.queues.read().get(self_id).map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for UpNextQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genseq_strictly_increases() {
        let mut dialog = Dialog::new_root("r1", "alice");
        let a = dialog
            .push(MessageBody::Prompting {
                content: "one".into(),
                origin: PromptOrigin::User,
            })
            .genseq;
        let b = dialog
            .push(MessageBody::Saying {
                content: "two".into(),
            })
            .genseq;
        let c = dialog.alloc_genseq();
        assert!(a < b && b < c);
    }

    #[test]
    fn last_saying_and_func_call_tracking() {
        let mut dialog = Dialog::new_root("r1", "alice");
        assert!(dialog.last_saying().is_none());
        assert_eq!(dialog.last_func_call_genseq(), 0);

        dialog.push(MessageBody::FuncCall {
            call_id: "c1".into(),
            name: "env_get".into(),
            arguments: "{}".into(),
        });
        let call_genseq = dialog.last_func_call_genseq();
        assert!(call_genseq > 0);

        dialog.push(MessageBody::Saying {
            content: "done".into(),
        });
        let (content, saying_genseq) = dialog.last_saying().unwrap();
        assert_eq!(content, "done");
        assert!(saying_genseq > call_genseq);
        assert_eq!(dialog.function_call_count(), 1);
    }

    #[test]
    fn course_messages_excludes_prior_courses() {
        let mut dialog = Dialog::new_root("r1", "alice");
        dialog.push(MessageBody::Saying { content: "old".into() });
        dialog.start_new_course();
        dialog.push(MessageBody::Saying { content: "new".into() });

        let current: Vec<_> = dialog
            .course_messages()
            .iter()
            .filter_map(|m| m.saying_content())
            .collect();
        assert_eq!(current, vec!["new"]);
        // Full log keeps everything.
        assert_eq!(dialog.messages.len(), 2);
    }

    #[test]
    fn reminder_crud() {
        let mut dialog = Dialog::new_root("r1", "alice");
        let id = dialog.add_reminder("check the deploy");
        assert_eq!(dialog.reminders.len(), 1);

        assert!(dialog.update_reminder(id, "check the deploy again"));
        assert_eq!(dialog.reminders[0].content, "check the deploy again");

        assert!(!dialog.update_reminder(999, "nope"));
        assert!(dialog.delete_reminder(id));
        assert!(!dialog.delete_reminder(id));
        assert!(dialog.reminders.is_empty());
    }

    #[test]
    fn arena_lookup_and_meta() {
        let arena = DialogArena::new();
        arena.insert(Dialog::new_root("r1", "alice"));
        assert!(arena.contains("r1"));
        assert!(arena.get("r1").is_some());
        assert_eq!(arena.meta("r1").unwrap().agent_id, "alice");
        assert!(arena.get("ghost").is_none());
    }

    #[test]
    fn latest_subdialog_picks_matching_agent() {
        let arena = DialogArena::new();
        arena.insert(Dialog::new_root("r1", "alice"));
        arena.insert(Dialog::new_sub(
            DialogId::sub("s1", "r1"),
            "bob",
            DialogId::root("r1"),
        ));
        arena.insert(Dialog::new_sub(
            DialogId::sub("s2", "r1"),
            "carol",
            DialogId::root("r1"),
        ));

        let found = arena.latest_subdialog_for("r1", "bob").unwrap();
        assert_eq!(found.id.self_id, "s1");
        assert!(arena.latest_subdialog_for("r1", "dave").is_none());
        // Roots never match.
        assert!(arena.latest_subdialog_for("r1", "alice").is_none());
    }

    #[test]
    fn up_next_fifo_per_dialog() {
        let queues = UpNextQueues::new();
        assert!(queues.is_empty("r1"));
        queues.push("r1", PendingPrompt::user("one"));
        queues.push("r1", PendingPrompt::user("two"));
        queues.push("r2", PendingPrompt::user("other"));

        assert_eq!(queues.len("r1"), 2);
        assert_eq!(queues.pop("r1").unwrap().content, "one");
        assert_eq!(queues.pop("r1").unwrap().content, "two");
        assert!(queues.pop("r1").is_none());
        assert_eq!(queues.len("r2"), 1);
    }

    #[tokio::test]
    async fn dialog_mutex_is_the_drive_lock() {
        let arena = DialogArena::new();
        let arc = arena.insert(Dialog::new_root("r1", "alice"));

        let guard = arc.try_lock().unwrap();
        // Second drive without wait-in-queue is rejected.
        assert!(arc.try_lock().is_err());
        drop(guard);
        assert!(arc.try_lock().is_ok());
    }
}
