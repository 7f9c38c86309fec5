//! Pre-scripted mock provider.
//!
//! Each call to `gen_stream` pops the next script step off the front of the
//! queue, so tests can specify exact event sequences — including tool calls
//! and failures with HTTP statuses — without network access.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;

use dk_domain::{Error, LlmUsage, Result};

use crate::gen_events::{BoxGenStream, GenEvent};
use crate::{GenRequest, LlmProvider};

/// One scripted provider response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit these events as the generation stream.
    Events(Vec<GenEvent>),
    /// Fail the call with an HTTP status.
    HttpError { status: u16, message: String },
    /// Fail the call with a transport error.
    TransportError(String),
}

impl ScriptStep {
    /// A generation that says `text` with default usage.
    pub fn saying(text: impl Into<String>) -> Self {
        Self::saying_with_usage(
            text,
            LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 5,
            },
        )
    }

    pub fn saying_with_usage(text: impl Into<String>, usage: LlmUsage) -> Self {
        ScriptStep::Events(vec![
            GenEvent::SayingDelta { text: text.into() },
            GenEvent::Done {
                usage: Some(usage),
                model: Some("mock-model".into()),
            },
        ])
    }

    /// A generation that emits exactly one tool call and nothing else.
    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ScriptStep::Events(vec![
            GenEvent::ToolCallFinished {
                call_id: call_id.into(),
                name: name.into(),
                arguments: arguments.into(),
            },
            GenEvent::Done {
                usage: Some(LlmUsage {
                    prompt_tokens: 100,
                    completion_tokens: 10,
                }),
                model: Some("mock-model".into()),
            },
        ])
    }

    pub fn http_error(status: u16, message: impl Into<String>) -> Self {
        ScriptStep::HttpError {
            status,
            message: message.into(),
        }
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        ScriptStep::TransportError(message.into())
    }
}

/// Scripted mock provider. Records every request it sees so tests can
/// inspect what was sent.
pub struct MockProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<GenRequest>>,
}

impl MockProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Append a step to the end of the script (for multi-turn tests that
    /// extend the script between drives).
    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().push_back(step);
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.lock().len()
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<GenRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn provider_id(&self) -> &str {
        "mock"
    }

    async fn gen_stream(&self, req: GenRequest) -> Result<BoxGenStream> {
        self.requests.lock().push(req);
        let step = self.steps.lock().pop_front();
        let events = match step {
            None => vec![
                GenEvent::SayingDelta {
                    text: "[no more scripted generations]".into(),
                },
                GenEvent::Done {
                    usage: Some(LlmUsage::default()),
                    model: Some("mock-model".into()),
                },
            ],
            Some(ScriptStep::Events(events)) => events,
            Some(ScriptStep::HttpError { status, message }) => {
                return Err(Error::Http { status, message })
            }
            Some(ScriptStep::TransportError(message)) => {
                return Err(Error::Transport(message))
            }
        };
        let items: Vec<Result<GenEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Deterministic provider that echoes the last user message back. Used by
/// the driver binary when no real adapter is plugged in.
#[derive(Default)]
pub struct EchoProvider;

#[async_trait]
impl LlmProvider for EchoProvider {
    fn provider_id(&self) -> &str {
        "echo"
    }

    async fn gen_stream(&self, req: GenRequest) -> Result<BoxGenStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                crate::ProviderMessage::User { content } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "[no input]".into());
        let events: Vec<Result<GenEvent>> = vec![
            Ok(GenEvent::SayingDelta {
                text: format!("ECHO: {reply}"),
            }),
            Ok(GenEvent::Done {
                usage: Some(LlmUsage {
                    prompt_tokens: (reply.len() / 4) as u32,
                    completion_tokens: (reply.len() / 4) as u32,
                }),
                model: Some("echo-model".into()),
            }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}
