use std::pin::Pin;

use serde::{Deserialize, Serialize};

use dk_domain::{LlmUsage, Result};

/// A boxed async stream of generation events.
pub type BoxGenStream = Pin<Box<dyn futures_core::Stream<Item = Result<GenEvent>> + Send>>;

/// Events emitted during one model generation (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenEvent {
    /// Reasoning text chunk.
    ThinkingDelta { text: String },

    /// Assistant text chunk.
    SayingDelta { text: String },

    /// A tool call opened; arguments follow as deltas.
    ToolCallStarted { call_id: String, name: String },

    /// Incremental tool-call argument JSON.
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with its full argument string.
    ToolCallFinished {
        call_id: String,
        name: String,
        arguments: String,
    },

    /// Generation finished.
    Done {
        usage: Option<LlmUsage>,
        model: Option<String>,
    },
}

/// What a completed generation reports back to the drive loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenOutcome {
    pub usage: LlmUsage,
    /// The model that actually produced the generation.
    pub llm_gen_model: String,
}
