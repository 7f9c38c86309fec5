//! Provider-context projection.
//!
//! Pure function from the dialog log to the flat message list a provider
//! consumes. Providers that require strict `tool_use`/`tool_result`
//! adjacency are satisfied here: every projected call is immediately
//! followed by exactly one result with the same id, synthesizing a pending
//! placeholder for teammate calls whose child has not answered yet.

use std::collections::HashSet;

use dk_domain::{ChatMessage, MessageBody};
use dk_providers::ProviderMessage;

/// Localised placeholder for a teammate call whose reply has not landed.
pub const PENDING_TEAMMATE_RESULT: &str = "PENDING: teammate response not yet available.";
/// Placeholder for an ordinary call whose result is missing (mid-round
/// projection only; the pairing invariant closes the gap by round end).
pub const PENDING_TOOL_RESULT: &str = "PENDING: tool result not yet available.";

/// Intercepted teammate-call tool names.
pub const TELLASK: &str = "tellask";
pub const TELLASK_SESSIONLESS: &str = "tellask_sessionless";
pub const TELLASK_BACK: &str = "tellask_back";

pub fn is_tellask_tool(name: &str) -> bool {
    matches!(name, TELLASK | TELLASK_SESSIONLESS | TELLASK_BACK)
}

/// Project dialog messages (already sliced to the current course) into
/// provider form.
pub fn project_for_provider(messages: &[ChatMessage]) -> Vec<ProviderMessage> {
    let mut projected = Vec::with_capacity(messages.len());
    // Results already emitted adjacent to their call; skip at own position.
    let mut consumed_results: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        match &message.body {
            MessageBody::UiOnlyMarkdown { .. } | MessageBody::TellaskResult { .. } => {}

            MessageBody::Prompting { content, .. }
            | MessageBody::Environment { content }
            | MessageBody::TransientGuide { content } => projected.push(ProviderMessage::User {
                content: content.clone(),
            }),

            MessageBody::Saying { content } | MessageBody::Thinking { content } => projected
                .push(ProviderMessage::Assistant {
                    content: content.clone(),
                }),

            MessageBody::FuncCall {
                call_id,
                name,
                arguments,
            } => {
                projected.push(ProviderMessage::ToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
                projected.push(result_for_call(
                    messages,
                    index,
                    call_id,
                    name,
                    &mut consumed_results,
                ));
            }

            MessageBody::FuncResult { call_id, name, .. } => {
                // Teammate results are always regenerated synthetically.
                if is_tellask_tool(name) || consumed_results.contains(call_id.as_str()) {
                    continue;
                }
                // An orphan result (its call fell out of the projection)
                // would break adjacency; drop it.
                tracing::warn!(call_id = %call_id, "dropping func_result with no projected call");
            }
        }
    }

    projected
}

/// Find the result to emit directly after a call.
fn result_for_call<'a>(
    messages: &'a [ChatMessage],
    call_index: usize,
    call_id: &str,
    name: &str,
    consumed_results: &mut HashSet<&'a str>,
) -> ProviderMessage {
    if is_tellask_tool(name) {
        // Prefer the child's terminal reply bubble when it has landed.
        let answer = messages[call_index + 1..].iter().find_map(|m| match &m.body {
            MessageBody::TellaskResult {
                call_id: result_id,
                content,
                ..
            } if result_id == call_id => Some(content.clone()),
            _ => None,
        });
        return ProviderMessage::ToolResult {
            call_id: call_id.to_owned(),
            name: name.to_owned(),
            content: answer.unwrap_or_else(|| PENDING_TEAMMATE_RESULT.to_owned()),
        };
    }

    for message in &messages[call_index + 1..] {
        if let MessageBody::FuncResult {
            call_id: result_id,
            name: result_name,
            content,
            ..
        } = &message.body
        {
            if result_id == call_id {
                consumed_results.insert(result_id.as_str());
                return ProviderMessage::ToolResult {
                    call_id: call_id.to_owned(),
                    name: result_name.clone(),
                    content: content.clone(),
                };
            }
        }
    }

    ProviderMessage::ToolResult {
        call_id: call_id.to_owned(),
        name: name.to_owned(),
        content: PENDING_TOOL_RESULT.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_domain::{ChatMessage, PromptOrigin};

    fn msg(genseq: u64, body: MessageBody) -> ChatMessage {
        ChatMessage::new(genseq, 0, body)
    }

    fn call(genseq: u64, call_id: &str, name: &str) -> ChatMessage {
        msg(
            genseq,
            MessageBody::FuncCall {
                call_id: call_id.into(),
                name: name.into(),
                arguments: "{}".into(),
            },
        )
    }

    fn result(genseq: u64, call_id: &str, name: &str, content: &str) -> ChatMessage {
        msg(
            genseq,
            MessageBody::FuncResult {
                call_id: call_id.into(),
                name: name.into(),
                content: content.into(),
                is_error: false,
            },
        )
    }

    /// Every projected ToolCall must be immediately followed by exactly one
    /// ToolResult with the same id.
    fn assert_adjacency(projected: &[ProviderMessage]) {
        for (i, message) in projected.iter().enumerate() {
            if let ProviderMessage::ToolCall { call_id, .. } = message {
                match projected.get(i + 1) {
                    Some(ProviderMessage::ToolResult {
                        call_id: result_id, ..
                    }) => assert_eq!(result_id, call_id, "result id mismatch at {i}"),
                    other => panic!("call {call_id} not followed by result: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn plain_conversation_projects_roles() {
        let messages = vec![
            msg(
                1,
                MessageBody::Prompting {
                    content: "hello".into(),
                    origin: PromptOrigin::User,
                },
            ),
            msg(2, MessageBody::Saying { content: "hi".into() }),
        ];
        let projected = project_for_provider(&messages);
        assert_eq!(
            projected,
            vec![
                ProviderMessage::User {
                    content: "hello".into()
                },
                ProviderMessage::Assistant {
                    content: "hi".into()
                },
            ]
        );
    }

    #[test]
    fn ui_only_and_tellask_bubbles_are_skipped() {
        let messages = vec![
            msg(
                1,
                MessageBody::UiOnlyMarkdown {
                    content: "*chrome*".into(),
                },
            ),
            msg(
                2,
                MessageBody::TellaskResult {
                    call_id: "c1".into(),
                    from_agent: "bob".into(),
                    content: "res".into(),
                },
            ),
        ];
        assert!(project_for_provider(&messages).is_empty());
    }

    #[test]
    fn paired_call_and_result_stay_adjacent() {
        let messages = vec![
            call(1, "c1", "env_get"),
            result(2, "c1", "env_get", "v"),
            msg(3, MessageBody::Saying { content: "ok".into() }),
        ];
        let projected = project_for_provider(&messages);
        assert_adjacency(&projected);
        assert_eq!(projected.len(), 3);
    }

    #[test]
    fn interleaved_results_are_pulled_adjacent() {
        // Two calls emitted before their results.
        let messages = vec![
            call(1, "c1", "a"),
            call(2, "c2", "b"),
            result(3, "c1", "a", "ra"),
            result(4, "c2", "b", "rb"),
        ];
        let projected = project_for_provider(&messages);
        assert_adjacency(&projected);
        assert_eq!(projected.len(), 4);
        match &projected[1] {
            ProviderMessage::ToolResult { content, .. } => assert_eq!(content, "ra"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tellask_call_gets_pending_placeholder() {
        let messages = vec![call(1, "c1", TELLASK_SESSIONLESS)];
        let projected = project_for_provider(&messages);
        assert_adjacency(&projected);
        match &projected[1] {
            ProviderMessage::ToolResult { content, .. } => {
                assert_eq!(content, PENDING_TEAMMATE_RESULT)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tellask_call_uses_delivered_answer() {
        let messages = vec![
            call(1, "c1", TELLASK_SESSIONLESS),
            msg(
                2,
                MessageBody::TellaskResult {
                    call_id: "c1".into(),
                    from_agent: "bob".into(),
                    content: "result".into(),
                },
            ),
            // The synthetic func_result persisted at delivery time is
            // skipped; the projection regenerates it.
            result(3, "c1", TELLASK_SESSIONLESS, "result"),
        ];
        let projected = project_for_provider(&messages);
        assert_adjacency(&projected);
        assert_eq!(projected.len(), 2);
        match &projected[1] {
            ProviderMessage::ToolResult { content, .. } => assert_eq!(content, "result"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unpaired_ordinary_call_gets_placeholder() {
        let messages = vec![call(1, "c9", "slow_tool")];
        let projected = project_for_provider(&messages);
        assert_adjacency(&projected);
        match &projected[1] {
            ProviderMessage::ToolResult { content, .. } => {
                assert_eq!(content, PENDING_TOOL_RESULT)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tellask_tool_names() {
        assert!(is_tellask_tool("tellask"));
        assert!(is_tellask_tool("tellask_sessionless"));
        assert!(is_tellask_tool("tellask_back"));
        assert!(!is_tellask_tool("env_get"));
    }
}
