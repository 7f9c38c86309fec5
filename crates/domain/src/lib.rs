//! Shared domain types for the dialog kernel driver.
//!
//! Everything here is provider- and storage-agnostic: the message sum type,
//! run states, the abort signal, context-health projection, tool contract
//! types, and the configuration schema loaded from `.minds/`.

pub mod cancel;
pub mod config;
pub mod error;
pub mod health;
pub mod message;
pub mod runstate;
pub mod tooldef;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use health::{ContextHealth, HealthLevel, LlmUsage};
pub use message::{ChatMessage, DialogId, GenSeq, MessageBody, PromptOrigin, Role};
pub use runstate::{BlockedOn, RunState, StopKind};
pub use tooldef::{ArgsValidation, FuncCall, ToolDefinition, ToolOutput};
