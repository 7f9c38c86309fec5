//! LLM invocation wrapper — classified-failure retry with exponential
//! backoff, cancellation propagation, and the two call shapes the driver
//! consumes.
//!
//! One attempt = one provider stream, consumed to completion. A retriable
//! failure before any output reached the receiver is retried under the
//! configured budget; once partial output has been delivered the failure
//! propagates instead (replaying chunks would duplicate them).

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use dk_domain::config::RetryConfig;
use dk_domain::Result;

use crate::classify::{classify_failure, FailureClass};
use crate::gen_events::GenOutcome;
use crate::receiver::{consume_stream, CollectedGen, CollectingReceiver, GenReceiver};
use crate::{GenRequest, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPhase {
    Retrying,
    Exhausted,
}

/// Emitted on every retry decision, forwarded to the event bus by the
/// drive loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LlmRetryEvent {
    Retrying {
        /// 1-based retry number.
        attempt: u32,
        total_attempts: u32,
        backoff_ms: u64,
    },
    Exhausted {
        suggestion: String,
    },
}

/// Hooks threaded through one invocation.
pub struct CallOpts<'a> {
    /// Dialog key used to deduplicate persistent provider-problem records.
    pub dialog_key: &'a str,
    /// Receives retry events as they happen.
    pub on_retry: Option<&'a (dyn Fn(LlmRetryEvent) + Send + Sync)>,
    /// Extra gate consulted before each retry (e.g. "is the driver still
    /// interested in this dialog").
    pub can_retry: Option<&'a (dyn Fn() -> bool + Send + Sync)>,
}

impl<'a> CallOpts<'a> {
    pub fn for_dialog(dialog_key: &'a str) -> Self {
        Self {
            dialog_key,
            on_retry: None,
            can_retry: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmCall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The invocation wrapper. One instance per driver, shared across dialogs.
pub struct LlmCall {
    retry: RetryConfig,
    /// Dialogs with an outstanding provider-rejection problem. Cleared on
    /// the next successful generation for that dialog.
    problems: Mutex<HashSet<String>>,
}

impl LlmCall {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            problems: Mutex::new(HashSet::new()),
        }
    }

    /// Whether the dialog has an unresolved provider-rejection problem.
    pub fn has_problem(&self, dialog_key: &str) -> bool {
        self.problems.lock().contains(dialog_key)
    }

    /// Stream-to-receiver call shape.
    pub async fn gen_to_receiver(
        &self,
        provider: &dyn LlmProvider,
        req: GenRequest,
        receiver: &mut dyn GenReceiver,
        opts: &CallOpts<'_>,
    ) -> Result<GenOutcome> {
        let mut attempt: u32 = 0;
        loop {
            if req.abort.is_cancelled() {
                return Err(req.abort.interruption());
            }

            let mut delivered = false;
            let outcome = match provider.gen_stream(req.clone()).await {
                Ok(stream) => consume_stream(stream, &req.abort, receiver, &mut delivered).await,
                Err(e) => Err(e),
            };

            let err = match outcome {
                Ok(consumed) => {
                    self.problems.lock().remove(opts.dialog_key);
                    return Ok(GenOutcome {
                        usage: consumed.usage.unwrap_or_default(),
                        llm_gen_model: consumed.model.unwrap_or_else(|| req.model.clone()),
                    });
                }
                Err(err) => err,
            };

            // Abort takes precedence over any classification.
            if err.is_interrupted() || req.abort.is_cancelled() {
                return Err(err);
            }

            match classify_failure(&err) {
                FailureClass::Rejected => {
                    if self.problems.lock().insert(opts.dialog_key.to_owned()) {
                        tracing::warn!(
                            dialog = opts.dialog_key,
                            error = %err,
                            "provider rejected request; recording persistent problem"
                        );
                    }
                    return Err(err);
                }
                FailureClass::Fatal => return Err(err),
                FailureClass::Retriable => {
                    if delivered {
                        tracing::warn!(
                            dialog = opts.dialog_key,
                            error = %err,
                            "retriable failure after partial output; not retrying"
                        );
                        return Err(err);
                    }
                    let gate_open = opts.can_retry.map(|f| f()).unwrap_or(true);
                    if attempt >= self.retry.max_retries || !gate_open {
                        self.emit(
                            opts,
                            LlmRetryEvent::Exhausted {
                                suggestion: format!(
                                    "LLM call failed {} time(s); check provider status \
                                     or raise the retry budget",
                                    attempt + 1
                                ),
                            },
                        );
                        return Err(err);
                    }

                    let backoff = self.retry.delay_for_attempt(attempt);
                    self.emit(
                        opts,
                        LlmRetryEvent::Retrying {
                            attempt: attempt + 1,
                            total_attempts: self.retry.max_retries,
                            backoff_ms: backoff.as_millis() as u64,
                        },
                    );
                    tracing::debug!(
                        dialog = opts.dialog_key,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying LLM call"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = req.abort.cancelled() => return Err(req.abort.interruption()),
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Batch call shape: collect the whole generation and return it along
    /// with the outcome.
    pub async fn gen_messages(
        &self,
        provider: &dyn LlmProvider,
        req: GenRequest,
        opts: &CallOpts<'_>,
    ) -> Result<(CollectedGen, GenOutcome)> {
        let mut receiver = CollectingReceiver::new();
        let outcome = self
            .gen_to_receiver(provider, req, &mut receiver, opts)
            .await?;
        Ok((receiver.into_collected(), outcome))
    }

    fn emit(&self, opts: &CallOpts<'_>, event: LlmRetryEvent) {
        if let Some(hook) = opts.on_retry {
            hook(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, ScriptStep};
    use dk_domain::{CancelToken, Error, LlmUsage, StopKind};
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    fn req() -> GenRequest {
        GenRequest {
            agent_id: "alice".into(),
            model: "m-1".into(),
            system_prompt: "sys".into(),
            tools: vec![],
            messages: vec![],
            genseq: 1,
            abort: CancelToken::new(),
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_initial_delay_ms: 1,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_ms: 5,
        }
    }

    fn capture_events() -> (
        Arc<PlMutex<Vec<LlmRetryEvent>>>,
        impl Fn(LlmRetryEvent) + Send + Sync,
    ) {
        let events = Arc::new(PlMutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |e| sink.lock().push(e))
    }

    #[tokio::test]
    async fn success_first_attempt() {
        let provider = MockProvider::new(vec![ScriptStep::saying_with_usage(
            "hi",
            LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 5,
            },
        )]);
        let call = LlmCall::new(fast_retry(2));
        let (collected, outcome) = call
            .gen_messages(&provider, req(), &CallOpts::for_dialog("r1"))
            .await
            .unwrap();
        assert_eq!(collected.saying_text().as_deref(), Some("hi"));
        assert_eq!(outcome.usage.prompt_tokens, 100);
        assert_eq!(outcome.llm_gen_model, "mock-model");
    }

    #[tokio::test]
    async fn retries_until_success() {
        let provider = MockProvider::new(vec![
            ScriptStep::http_error(503, "overloaded"),
            ScriptStep::http_error(503, "overloaded"),
            ScriptStep::http_error(503, "overloaded"),
            ScriptStep::saying("ok"),
        ]);
        let call = LlmCall::new(fast_retry(3));
        let (events, hook) = capture_events();
        let opts = CallOpts {
            dialog_key: "r1",
            on_retry: Some(&hook),
            can_retry: None,
        };
        let (collected, _) = call.gen_messages(&provider, req(), &opts).await.unwrap();
        assert_eq!(collected.saying_text().as_deref(), Some("ok"));
        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e, LlmRetryEvent::Retrying { .. })));
    }

    #[tokio::test]
    async fn exhaustion_emits_two_retrying_and_one_exhausted() {
        let provider = MockProvider::new(vec![
            ScriptStep::http_error(503, "a"),
            ScriptStep::http_error(503, "b"),
            ScriptStep::http_error(503, "c"),
        ]);
        let call = LlmCall::new(fast_retry(2));
        let (events, hook) = capture_events();
        let opts = CallOpts {
            dialog_key: "r1",
            on_retry: Some(&hook),
            can_retry: None,
        };
        let err = call.gen_messages(&provider, req(), &opts).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 503, .. }));

        let events = events.lock();
        let retrying = events
            .iter()
            .filter(|e| matches!(e, LlmRetryEvent::Retrying { .. }))
            .count();
        let exhausted = events
            .iter()
            .filter(|e| matches!(e, LlmRetryEvent::Exhausted { .. }))
            .count();
        assert_eq!(retrying, 2);
        assert_eq!(exhausted, 1);
    }

    #[tokio::test]
    async fn rejected_is_not_retried_and_marks_problem() {
        let provider = MockProvider::new(vec![
            ScriptStep::http_error(400, "bad request"),
            ScriptStep::saying("never reached"),
        ]);
        let call = LlmCall::new(fast_retry(5));
        let opts = CallOpts::for_dialog("r1");
        let err = call.gen_messages(&provider, req(), &opts).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 400, .. }));
        assert!(call.has_problem("r1"));

        // Next success clears the problem record.
        call.gen_messages(&provider, req(), &opts).await.unwrap();
        assert!(!call.has_problem("r1"));
    }

    #[tokio::test]
    async fn abort_before_call_short_circuits() {
        let provider = MockProvider::new(vec![ScriptStep::saying("unused")]);
        let call = LlmCall::new(fast_retry(2));
        let mut request = req();
        request.abort.cancel(StopKind::EmergencyStop);
        let err = call
            .gen_messages(&provider, request, &CallOpts::for_dialog("r1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Interrupted(StopKind::EmergencyStop)
        ));
        // The script was never consumed.
        assert_eq!(provider.remaining_steps(), 1);
    }

    #[tokio::test]
    async fn can_retry_gate_blocks_retries() {
        let provider = MockProvider::new(vec![
            ScriptStep::http_error(503, "a"),
            ScriptStep::saying("unreached"),
        ]);
        let call = LlmCall::new(fast_retry(5));
        let gate = || false;
        let opts = CallOpts {
            dialog_key: "r1",
            on_retry: None,
            can_retry: Some(&gate),
        };
        let err = call.gen_messages(&provider, req(), &opts).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 503, .. }));
        assert_eq!(provider.remaining_steps(), 1);
    }

    #[tokio::test]
    async fn fatal_transport_error_not_retried() {
        let provider = MockProvider::new(vec![
            ScriptStep::transport_error("tls certificate unknown"),
            ScriptStep::saying("unreached"),
        ]);
        let call = LlmCall::new(fast_retry(5));
        let err = call
            .gen_messages(&provider, req(), &CallOpts::for_dialog("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(provider.remaining_steps(), 1);
    }
}
