use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically increasing per-dialog message sequence number.
pub type GenSeq = u64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialog identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identifies a dialog within its tree. Root dialogs satisfy
/// `self_id == root_id`; sub-dialogs share the root id of their tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub self_id: String,
    pub root_id: String,
}

impl DialogId {
    pub fn root(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            self_id: id.clone(),
            root_id: id,
        }
    }

    pub fn sub(self_id: impl Into<String>, root_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            root_id: root_id.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.self_id == self.root_id
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            write!(f, "{}", self.self_id)
        } else {
            write!(f, "{}@{}", self.self_id, self.root_id)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles and prompt origins
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Where a user-side prompt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptOrigin {
    #[default]
    User,
    DiligencePush,
    Health,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message sum type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in a dialog's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// User-side prompt (operator input, diligence push, health prompt).
    Prompting {
        content: String,
        #[serde(default)]
        origin: PromptOrigin,
    },
    /// Assistant text addressed to the user / caller.
    Saying { content: String },
    /// Assistant reasoning; never replayed to the provider.
    Thinking { content: String },
    /// Tool invocation emitted by the model. Arguments are kept as the raw
    /// JSON string the model produced.
    FuncCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// Output paired to a `FuncCall` by `call_id`.
    FuncResult {
        call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    /// Terminal teammate reply, rendered as its own bubble. The provider
    /// projection replaces it with a synthetic `FuncResult`.
    TellaskResult {
        call_id: String,
        from_agent: String,
        content: String,
    },
    /// Environment intro / course prefix content.
    Environment { content: String },
    /// Ephemeral guidance (reminders, language preference); rebuilt every
    /// generation rather than persisted into the provider history.
    TransientGuide { content: String },
    /// Rendered only in the UI; invisible to the provider.
    UiOnlyMarkdown { content: String },
}

/// A message with its dialog-local ordering metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub genseq: GenSeq,
    pub course: u32,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl ChatMessage {
    pub fn new(genseq: GenSeq, course: u32, body: MessageBody) -> Self {
        Self {
            genseq,
            course,
            at: Utc::now(),
            body,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match &self.body {
            MessageBody::Prompting { .. }
            | MessageBody::Environment { .. }
            | MessageBody::TransientGuide { .. } => Some(Role::User),
            MessageBody::Saying { .. }
            | MessageBody::Thinking { .. }
            | MessageBody::FuncCall { .. } => Some(Role::Assistant),
            MessageBody::FuncResult { .. } | MessageBody::TellaskResult { .. } => Some(Role::Tool),
            MessageBody::UiOnlyMarkdown { .. } => None,
        }
    }

    pub fn is_func_call(&self) -> bool {
        matches!(self.body, MessageBody::FuncCall { .. })
    }

    pub fn saying_content(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Saying { content } => Some(content.as_str()),
            _ => None,
        }
    }

    /// The `call_id` when this message is a call or a (tellask) result.
    pub fn call_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::FuncCall { call_id, .. }
            | MessageBody::FuncResult { call_id, .. }
            | MessageBody::TellaskResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        }
    }
}
