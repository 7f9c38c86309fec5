//! Receiver-side consumption of a generation stream.
//!
//! [`consume_stream`] walks the event stream once, assembling streamed
//! tool-call deltas into complete [`FuncCall`]s and translating raw deltas
//! into the start/chunk/finish callback shape the driver consumes. The
//! abort signal is checked between events.

use futures_util::StreamExt;

use dk_domain::{CancelToken, FuncCall, LlmUsage, Result};

use crate::gen_events::{BoxGenStream, GenEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Receiver trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callbacks fired while a generation streams. All hooks default to no-ops
/// so receivers implement only what they render.
pub trait GenReceiver: Send {
    fn on_thinking_start(&mut self) {}
    fn on_thinking_chunk(&mut self, _text: &str) {}
    fn on_thinking_finish(&mut self, _full: &str) {}
    fn on_saying_start(&mut self) {}
    fn on_saying_chunk(&mut self, _text: &str) {}
    fn on_saying_finish(&mut self, _full: &str) {}
    fn on_tool_call_delta(&mut self, _call_id: &str, _delta: &str) {}
    /// A tool call is fully assembled (in emission order).
    fn on_tool_call(&mut self, _call: &FuncCall) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collecting receiver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one generation produced, in order of arrival.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedGen {
    /// Completed thinking blocks.
    pub thinking: Vec<String>,
    /// Completed saying segments.
    pub saying: Vec<String>,
    /// Assembled tool calls in emission order.
    pub calls: Vec<FuncCall>,
}

impl CollectedGen {
    /// All saying text joined, or `None` when the model said nothing.
    pub fn saying_text(&self) -> Option<String> {
        if self.saying.is_empty() {
            None
        } else {
            Some(self.saying.join(""))
        }
    }
}

/// A receiver that buffers the whole generation. Used for the batch call
/// shape and by the drive loop when no UI stream is attached.
#[derive(Default)]
pub struct CollectingReceiver {
    collected: CollectedGen,
}

impl CollectingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_collected(self) -> CollectedGen {
        self.collected
    }
}

impl GenReceiver for CollectingReceiver {
    fn on_thinking_finish(&mut self, full: &str) {
        self.collected.thinking.push(full.to_owned());
    }

    fn on_saying_finish(&mut self, full: &str) {
        self.collected.saying.push(full.to_owned());
    }

    fn on_tool_call(&mut self, call: &FuncCall) {
        self.collected.calls.push(call.clone());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream consumption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub(crate) struct ConsumeResult {
    pub usage: Option<LlmUsage>,
    pub model: Option<String>,
}

#[derive(PartialEq)]
enum TextMode {
    Idle,
    Thinking,
    Saying,
}

/// Drive the stream to completion, firing receiver callbacks.
///
/// `delivered` is set as soon as any event reached the receiver, letting the
/// retry wrapper refuse to retry a generation whose partial output the
/// receiver has already seen.
pub(crate) async fn consume_stream(
    mut stream: BoxGenStream,
    abort: &CancelToken,
    receiver: &mut dyn GenReceiver,
    delivered: &mut bool,
) -> Result<ConsumeResult> {
    let mut mode = TextMode::Idle;
    let mut text_buf = String::new();
    let mut result = ConsumeResult::default();
    // (call_id, name, args buffer), in emission order. Entries are removed
    // when `ToolCallFinished` arrives; leftovers flush at `Done` for
    // providers that only emit start + deltas.
    let mut pending_calls: Vec<(String, String, String)> = Vec::new();

    while let Some(event) = stream.next().await {
        if abort.is_cancelled() {
            return Err(abort.interruption());
        }
        let event = event?;
        *delivered = true;

        match event {
            GenEvent::ThinkingDelta { text } => {
                if mode != TextMode::Thinking {
                    finish_text(&mut mode, &mut text_buf, receiver);
                    mode = TextMode::Thinking;
                    receiver.on_thinking_start();
                }
                text_buf.push_str(&text);
                receiver.on_thinking_chunk(&text);
            }
            GenEvent::SayingDelta { text } => {
                if mode != TextMode::Saying {
                    finish_text(&mut mode, &mut text_buf, receiver);
                    mode = TextMode::Saying;
                    receiver.on_saying_start();
                }
                text_buf.push_str(&text);
                receiver.on_saying_chunk(&text);
            }
            GenEvent::ToolCallStarted { call_id, name } => {
                pending_calls.push((call_id, name, String::new()));
            }
            GenEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, _, buf)) =
                    pending_calls.iter_mut().find(|(id, _, _)| *id == call_id)
                {
                    buf.push_str(&delta);
                    receiver.on_tool_call_delta(&call_id, &delta);
                } else {
                    tracing::warn!(call_id = %call_id, "tool-call delta for unknown call, dropping");
                }
            }
            GenEvent::ToolCallFinished {
                call_id,
                name,
                arguments,
            } => {
                pending_calls.retain(|(id, _, _)| *id != call_id);
                let call = FuncCall {
                    call_id,
                    name,
                    arguments,
                };
                receiver.on_tool_call(&call);
            }
            GenEvent::Done { usage, model } => {
                finish_text(&mut mode, &mut text_buf, receiver);
                // Flush calls that never saw an explicit finish.
                for (call_id, name, arguments) in pending_calls.drain(..) {
                    if name.is_empty() {
                        tracing::warn!(call_id = %call_id, "dropping tool call with empty name");
                        continue;
                    }
                    let call = FuncCall {
                        call_id,
                        name,
                        arguments,
                    };
                    receiver.on_tool_call(&call);
                }
                result.usage = usage;
                result.model = model;
                break;
            }
        }
    }

    // A stream that ended without `Done` still flushes buffered text.
    finish_text(&mut mode, &mut text_buf, receiver);

    Ok(result)
}

fn finish_text(mode: &mut TextMode, buf: &mut String, receiver: &mut dyn GenReceiver) {
    let full = std::mem::take(buf);
    match mode {
        TextMode::Thinking => receiver.on_thinking_finish(&full),
        TextMode::Saying => receiver.on_saying_finish(&full),
        TextMode::Idle => {}
    }
    *mode = TextMode::Idle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn boxed(events: Vec<GenEvent>) -> BoxGenStream {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    async fn collect(events: Vec<GenEvent>) -> (CollectedGen, ConsumeResult) {
        let mut receiver = CollectingReceiver::new();
        let abort = CancelToken::new();
        let mut delivered = false;
        let result = consume_stream(boxed(events), &abort, &mut receiver, &mut delivered)
            .await
            .unwrap();
        (receiver.into_collected(), result)
    }

    #[tokio::test]
    async fn text_chunks_accumulate() {
        let (collected, result) = collect(vec![
            GenEvent::SayingDelta { text: "hel".into() },
            GenEvent::SayingDelta { text: "lo".into() },
            GenEvent::Done {
                usage: Some(LlmUsage {
                    prompt_tokens: 100,
                    completion_tokens: 5,
                }),
                model: Some("m-1".into()),
            },
        ])
        .await;
        assert_eq!(collected.saying_text().as_deref(), Some("hello"));
        assert_eq!(result.usage.unwrap().prompt_tokens, 100);
        assert_eq!(result.model.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn thinking_then_saying_splits_blocks() {
        let (collected, _) = collect(vec![
            GenEvent::ThinkingDelta { text: "hmm ".into() },
            GenEvent::ThinkingDelta { text: "ok".into() },
            GenEvent::SayingDelta { text: "answer".into() },
            GenEvent::Done {
                usage: None,
                model: None,
            },
        ])
        .await;
        assert_eq!(collected.thinking, vec!["hmm ok".to_string()]);
        assert_eq!(collected.saying, vec!["answer".to_string()]);
    }

    #[tokio::test]
    async fn tool_calls_assemble_from_deltas() {
        let (collected, _) = collect(vec![
            GenEvent::ToolCallStarted {
                call_id: "c1".into(),
                name: "env_get".into(),
            },
            GenEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: r#"{"key":"#.into(),
            },
            GenEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: r#""X"}"#.into(),
            },
            GenEvent::Done {
                usage: None,
                model: None,
            },
        ])
        .await;
        assert_eq!(
            collected.calls,
            vec![FuncCall {
                call_id: "c1".into(),
                name: "env_get".into(),
                arguments: r#"{"key":"X"}"#.into(),
            }]
        );
    }

    #[tokio::test]
    async fn finished_tool_calls_keep_emission_order() {
        let (collected, _) = collect(vec![
            GenEvent::ToolCallFinished {
                call_id: "c1".into(),
                name: "a".into(),
                arguments: "{}".into(),
            },
            GenEvent::ToolCallFinished {
                call_id: "c2".into(),
                name: "b".into(),
                arguments: "{}".into(),
            },
            GenEvent::Done {
                usage: None,
                model: None,
            },
        ])
        .await;
        let names: Vec<_> = collected.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn abort_mid_stream_throws_interrupted() {
        use dk_domain::StopKind;

        let abort = CancelToken::new();
        abort.cancel(StopKind::EmergencyStop);
        let mut receiver = CollectingReceiver::new();
        let mut delivered = false;
        let err = consume_stream(
            boxed(vec![GenEvent::SayingDelta { text: "x".into() }]),
            &abort,
            &mut receiver,
            &mut delivered,
        )
        .await
        .unwrap_err();
        assert!(err.is_interrupted());
    }

    #[tokio::test]
    async fn stream_without_done_flushes_text() {
        let (collected, result) =
            collect(vec![GenEvent::SayingDelta { text: "partial".into() }]).await;
        assert_eq!(collected.saying_text().as_deref(), Some("partial"));
        assert!(result.usage.is_none());
    }
}
