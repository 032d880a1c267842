//! Streaming manager
//!
//! Three strict cases, keyed on (client wants stream, upstream
//! streamed):
//!
//! 1. passthrough — upstream events flow through the codec emitters
//! 2. synthetic — a JSON upstream response is replayed as the
//!    equivalent event sequence ([`synthesize_events`])
//! 3. buffered — upstream events are reassembled into a canonical JSON
//!    response ([`collect_response`])
//!
//! Plus the stream idle timeout that closes silent upstream connections.

use std::time::Duration;

use futures_util::StreamExt;

use crate::error::GatewayError;
use crate::provider::EventStream;
use crate::types::{AssistantOutput, CanonicalResponse, FinishReason, FunctionCall, StreamEvent, ToolCall, Usage};

/// Maximum characters per synthetic text delta
const TEXT_SEGMENT_CHARS: usize = 256;

/// Replay a JSON response as the equivalent canonical event sequence
///
/// Ordering: text deltas (whitespace-aligned, ≤256 chars each), then per
/// tool call its start before any argument delta, then `Finish`, then
/// `Usage`, then `Done`.
pub fn synthesize_events(resp: &CanonicalResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(content) = &resp.output.content {
        for segment in segment_text(content) {
            events.push(StreamEvent::TextDelta { text: segment });
        }
    }

    for (index, tc) in resp.output.tool_calls.as_deref().unwrap_or_default().iter().enumerate() {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        events.push(StreamEvent::ToolCallStart {
            index,
            id: tc.id.clone(),
            name: tc.function.name.clone(),
        });
        if !tc.function.arguments.is_empty() {
            events.push(StreamEvent::ToolCallArgsDelta {
                index,
                arguments: tc.function.arguments.clone(),
            });
        }
    }

    let reason = resp.finish_reason.unwrap_or(if resp.wants_tools() {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    });
    events.push(StreamEvent::Finish { reason });

    if let Some(usage) = resp.usage {
        events.push(StreamEvent::Usage(usage));
    }

    events.push(StreamEvent::Done);
    events
}

/// Split text into ≤256-char segments, breaking after whitespace when
/// the boundary would fall mid-word; concatenation reproduces the input
fn segment_text(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.chars().count() <= TEXT_SEGMENT_CHARS {
            segments.push(rest.to_owned());
            break;
        }

        let hard_end = rest
            .char_indices()
            .nth(TEXT_SEGMENT_CHARS)
            .map_or(rest.len(), |(i, _)| i);

        // Prefer to cut just after the last whitespace inside the window
        let cut = rest[..hard_end]
            .rfind(char::is_whitespace)
            .map_or(hard_end, |ws| ws + rest[ws..].chars().next().map_or(1, char::len_utf8));

        segments.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }

    segments
}

/// Reassemble upstream events into a canonical JSON response
///
/// Used when the client did not ask for a stream but the upstream only
/// streams. Stream errors propagate; partial buffers are discarded.
pub async fn collect_response(mut stream: EventStream, model: &str) -> Result<CanonicalResponse, GatewayError> {
    let mut text = String::new();
    let mut tools: Vec<(u32, String, String, String)> = Vec::new();
    let mut finish_reason = None;
    let mut usage: Option<Usage> = None;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { text: t } => text.push_str(&t),
            StreamEvent::ToolCallStart { index, id, name } => {
                if tools.iter().all(|(i, ..)| *i != index) {
                    tools.push((index, id, name, String::new()));
                }
            }
            StreamEvent::ToolCallArgsDelta { index, arguments } => {
                if let Some((_, _, _, args)) = tools.iter_mut().find(|(i, ..)| *i == index) {
                    args.push_str(&arguments);
                }
            }
            StreamEvent::Finish { reason } => finish_reason = Some(reason),
            StreamEvent::Usage(u) => usage = Some(u),
            StreamEvent::Done => break,
        }
    }

    let tool_calls: Vec<ToolCall> = tools
        .into_iter()
        .map(|(_, id, name, arguments)| ToolCall {
            id,
            function: FunctionCall { name, arguments },
        })
        .collect();

    Ok(CanonicalResponse {
        id: crate::convert::wire_id("resp_"),
        model: model.to_owned(),
        created: crate::convert::now_epoch_secs(),
        output: AssistantOutput {
            content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        },
        finish_reason,
        usage,
    })
}

/// Guarantee the canonical terminal event
///
/// Upstreams occasionally close the connection without their terminal
/// frame; every client stream must still end with the protocol's
/// terminal frames, so a missing `Done` is appended.
pub fn ensure_done(stream: EventStream) -> EventStream {
    Box::pin(futures_util::stream::unfold(
        (Some(stream), false),
        |(stream, done_seen)| async move {
            let mut stream = stream?;
            match stream.next().await {
                Some(item) => {
                    let is_done = matches!(item, Ok(StreamEvent::Done));
                    Some((item, (Some(stream), done_seen || is_done)))
                }
                None if !done_seen => Some((Ok(StreamEvent::Done), (None, true))),
                None => None,
            }
        },
    ))
}

/// Abort a stream after `idle` without a frame
///
/// The pool records the timeout as a server error upstream of here; this
/// wrapper only surfaces it into the stream.
pub fn with_idle_timeout(stream: EventStream, idle: Duration) -> EventStream {
    Box::pin(futures_util::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        match tokio::time::timeout(idle, stream.next()).await {
            Ok(Some(item)) => Some((item, Some(stream))),
            Ok(None) => None,
            Err(_) => Some((
                Err(GatewayError::ServerError("stream idle timeout".to_owned())),
                None,
            )),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(content: Option<&str>, tools: Option<Vec<ToolCall>>, reason: FinishReason) -> CanonicalResponse {
        CanonicalResponse {
            id: "r".to_owned(),
            model: "m".to_owned(),
            created: 0,
            output: AssistantOutput {
                content: content.map(str::to_owned),
                tool_calls: tools,
            },
            finish_reason: Some(reason),
            usage: None,
        }
    }

    #[test]
    fn segments_concatenate_to_original() {
        let text = "word ".repeat(200);
        let segments = segment_text(&text);
        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| s.chars().count() <= TEXT_SEGMENT_CHARS));
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn unbroken_text_falls_back_to_hard_cuts() {
        let text = "x".repeat(600);
        let segments = segment_text(&text);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn synthetic_order_tool_name_before_args_and_finish_before_done() {
        let resp = response_with(
            None,
            Some(vec![ToolCall {
                id: "call_1".to_owned(),
                function: FunctionCall {
                    name: "shell".to_owned(),
                    arguments: r#"{"command":["ls"]}"#.to_owned(),
                },
            }]),
            FinishReason::ToolCalls,
        );

        let events = synthesize_events(&resp);
        let start = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ToolCallStart { .. }))
            .unwrap();
        let args = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ToolCallArgsDelta { .. }))
            .unwrap();
        let finish = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Finish { .. }))
            .unwrap();
        let done = events.iter().position(|e| matches!(e, StreamEvent::Done)).unwrap();

        assert!(start < args);
        assert!(args < finish);
        assert!(finish < done);
        assert_eq!(done, events.len() - 1);
    }

    #[test]
    fn synthetic_text_reproduces_content() {
        let resp = response_with(Some("hello streaming world"), None, FinishReason::Stop);
        let events = synthesize_events(&resp);

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hello streaming world");
    }

    #[tokio::test]
    async fn collect_rebuilds_response_from_events() {
        let events = vec![
            Ok(StreamEvent::TextDelta { text: "par".to_owned() }),
            Ok(StreamEvent::TextDelta { text: "tial".to_owned() }),
            Ok(StreamEvent::ToolCallStart {
                index: 0,
                id: "call_1".to_owned(),
                name: "shell".to_owned(),
            }),
            Ok(StreamEvent::ToolCallArgsDelta {
                index: 0,
                arguments: "{\"command\":".to_owned(),
            }),
            Ok(StreamEvent::ToolCallArgsDelta {
                index: 0,
                arguments: "[\"ls\"]}".to_owned(),
            }),
            Ok(StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
            }),
            Ok(StreamEvent::Usage(Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            })),
            Ok(StreamEvent::Done),
        ];
        let stream: EventStream = Box::pin(futures_util::stream::iter(events));

        let resp = collect_response(stream, "m").await.unwrap();
        assert_eq!(resp.output.content.as_deref(), Some("partial"));
        let calls = resp.output.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"command\":[\"ls\"]}");
        assert_eq!(resp.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(resp.usage.unwrap().total_tokens, 3);
    }

    #[tokio::test]
    async fn collect_propagates_stream_errors() {
        let events: Vec<Result<StreamEvent, GatewayError>> =
            vec![Err(GatewayError::ServerError("mid-stream failure".to_owned()))];
        let stream: EventStream = Box::pin(futures_util::stream::iter(events));
        assert!(collect_response(stream, "m").await.is_err());
    }

    #[tokio::test]
    async fn ensure_done_appends_missing_terminal() {
        let truncated: EventStream = Box::pin(futures_util::stream::iter(vec![Ok(StreamEvent::TextDelta {
            text: "partial".to_owned(),
        })]));
        let events: Vec<_> = ensure_done(truncated).collect().await;
        assert!(matches!(events.last().unwrap(), Ok(StreamEvent::Done)));

        let complete: EventStream =
            Box::pin(futures_util::stream::iter(vec![Ok(StreamEvent::Done)]));
        let events: Vec<_> = ensure_done(complete).collect().await;
        assert_eq!(events.len(), 1, "no duplicate terminal event");
    }

    #[tokio::test]
    async fn idle_timeout_fires() {
        let stream: EventStream = Box::pin(futures_util::stream::pending());
        let mut wrapped = with_idle_timeout(stream, Duration::from_millis(20));

        let item = wrapped.next().await.unwrap();
        assert!(matches!(item, Err(GatewayError::ServerError(_))));
        assert!(wrapped.next().await.is_none());
    }
}
