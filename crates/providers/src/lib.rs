//! LLM provider abstraction and invocation wrapper.
//!
//! A provider implements one streaming generation operation; the
//! [`LlmCall`](retry::LlmCall) wrapper layers failure classification,
//! retry with exponential backoff, cancellation, and the two call shapes
//! the driver consumes (stream-to-receiver and batch).

pub mod classify;
pub mod gen_events;
pub mod mock;
pub mod receiver;
pub mod retry;

use async_trait::async_trait;

use dk_domain::{CancelToken, GenSeq, Result, ToolDefinition};
pub use gen_events::{BoxGenStream, GenEvent, GenOutcome};
pub use receiver::{CollectedGen, CollectingReceiver, GenReceiver};
pub use retry::{CallOpts, LlmCall, LlmRetryEvent, RetryPhase};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A flat, provider-agnostic view of the dialog context. The driver's
/// projection guarantees `ToolCall`/`ToolResult` adjacency before a request
/// is built.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    User { content: String },
    Assistant { content: String },
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

/// One generation request.
#[derive(Clone)]
pub struct GenRequest {
    pub agent_id: String,
    /// Model id (a key of `llm.yaml` models).
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<ProviderMessage>,
    /// Generation sequence number of the calling drive iteration.
    pub genseq: GenSeq,
    /// Abort signal of the active run; providers should stop generating
    /// when it fires.
    pub abort: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements.
///
/// Only the streaming shape is required; the batch shape is derived by the
/// invocation wrapper.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;

    /// Start one generation and return its event stream.
    async fn gen_stream(&self, req: GenRequest) -> Result<BoxGenStream>;
}
