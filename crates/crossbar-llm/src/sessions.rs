//! Tool-loop sessions for the responses endpoint
//!
//! A `required_action` reply parks the conversation here keyed by the
//! emitted response id; `submit_tool_outputs` picks it back up. Entries
//! live for a sliding TTL from last touch and a background sweeper
//! evicts the expired ones.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::GatewayError;
use crate::protocol::responses::SubmittedToolOutput;
use crate::router::RoutingDecision;
use crate::types::{CanonicalRequest, Message, ToolCall};

/// Minimum session lifetime from last touch
pub const SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// One parked tool loop
pub struct ToolLoopSession {
    /// Conversation so far, including the assistant tool-call turn
    pub request: CanonicalRequest,
    /// Decision that produced the pause; reused while the key stays
    /// eligible
    pub decision: RoutingDecision,
    /// Calls awaiting outputs
    pub pending_calls: Vec<ToolCall>,
    /// Completed round trips
    pub loops: u32,
    touched_at: Instant,
}

/// In-memory session table
pub struct SessionStore {
    sessions: DashMap<String, ToolLoopSession>,
    ttl: Duration,
    max_loops: u32,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_loops: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_loops,
        }
    }

    /// Park a conversation under a freshly issued response id
    ///
    /// `request` must already carry the assistant turn holding
    /// `pending_calls`.
    pub fn park(
        &self,
        response_id: impl Into<String>,
        request: CanonicalRequest,
        decision: RoutingDecision,
        pending_calls: Vec<ToolCall>,
        loops: u32,
    ) {
        self.sessions.insert(
            response_id.into(),
            ToolLoopSession {
                request,
                decision,
                pending_calls,
                loops,
                touched_at: Instant::now(),
            },
        );
    }

    /// Resume a parked conversation with submitted tool outputs
    ///
    /// Merges the outputs as tool-result turns (unmatched outputs are
    /// dropped with a warning; all-unmatched is a client error), bumps
    /// the loop counter, and returns the merged request plus the stored
    /// decision. The session entry is consumed; the caller parks a new
    /// one if the upstream pauses again.
    pub fn resume(
        &self,
        response_id: &str,
        outputs: &[SubmittedToolOutput],
    ) -> Result<(CanonicalRequest, RoutingDecision, u32), GatewayError> {
        let (_, session) = self
            .sessions
            .remove(response_id)
            .filter(|(_, s)| s.touched_at.elapsed() < self.ttl)
            .ok_or_else(|| GatewayError::UnknownResponseId(response_id.to_owned()))?;

        let next_loop = session.loops + 1;
        if next_loop > self.max_loops {
            return Err(GatewayError::ToolLoopExhausted);
        }

        let mut request = session.request;
        let mut merged = 0usize;
        for output in outputs {
            let known = session.pending_calls.iter().any(|c| c.id == output.tool_call_id);
            if known {
                request
                    .messages
                    .push(Message::tool_result(output.tool_call_id.clone(), output.output.clone()));
                merged += 1;
            } else {
                tracing::warn!(
                    response_id,
                    call_id = %output.tool_call_id,
                    "dropping submitted output for unknown tool call"
                );
            }
        }

        if merged == 0 {
            return Err(GatewayError::InvalidRequest(
                "no submitted output matches a pending tool call".to_owned(),
            ));
        }

        Ok((request, session.decision, next_loop))
    }

    /// Drop expired sessions
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.sessions.retain(|_, session| session.touched_at.elapsed() < ttl);
    }

    /// Number of parked sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Periodically evict expired sessions until the store is dropped
    pub fn spawn_sweeper(store: &Arc<Self>) {
        let weak = Arc::downgrade(store);
        let period = store.ttl / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else { break };
                store.sweep();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crossbar_config::RouteTarget;
    use crossbar_pool::KeyId;

    use super::*;
    use crate::types::FunctionCall;

    fn decision() -> RoutingDecision {
        RoutingDecision {
            route: "default".to_owned(),
            target: RouteTarget {
                provider: "providerA".to_owned(),
                model: "m".to_owned(),
                key_alias: None,
            },
            key: KeyId::new("providerA", "key1"),
            pool_snapshot: vec![],
            confidence: 1.0,
            reasons: vec![],
        }
    }

    fn pending_call() -> ToolCall {
        ToolCall {
            id: "call_1".to_owned(),
            function: FunctionCall {
                name: "list_local_files".to_owned(),
                arguments: "{}".to_owned(),
            },
        }
    }

    fn parked_request() -> CanonicalRequest {
        let mut req = CanonicalRequest::user_text("m", "list files");
        req.messages.push(Message::assistant_tool_calls(vec![pending_call()]));
        req
    }

    fn output(id: &str) -> SubmittedToolOutput {
        SubmittedToolOutput {
            tool_call_id: id.to_owned(),
            output: "[\"README.md\"]".to_owned(),
        }
    }

    #[test]
    fn resume_merges_outputs() {
        let store = SessionStore::new(SESSION_TTL, 4);
        store.park("resp_1", parked_request(), decision(), vec![pending_call()], 0);

        let (request, _, loops) = store.resume("resp_1", &[output("call_1")]).unwrap();
        assert_eq!(loops, 1);
        let last = request.messages.last().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
        assert!(store.is_empty(), "session is consumed");
    }

    #[test]
    fn unknown_response_id_errors() {
        let store = SessionStore::new(SESSION_TTL, 4);
        let err = store.resume("resp_missing", &[output("call_1")]).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownResponseId(_)));
    }

    #[test]
    fn unmatched_outputs_are_dropped_but_all_unmatched_errors() {
        let store = SessionStore::new(SESSION_TTL, 4);
        store.park("resp_1", parked_request(), decision(), vec![pending_call()], 0);

        let err = store.resume("resp_1", &[output("call_ghost")]).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));

        store.park("resp_2", parked_request(), decision(), vec![pending_call()], 0);
        let (request, ..) = store
            .resume("resp_2", &[output("call_ghost"), output("call_1")])
            .unwrap();
        let tool_turns = request.messages.iter().filter(|m| m.tool_call_id.is_some()).count();
        assert_eq!(tool_turns, 1);
    }

    #[test]
    fn loop_cap_exhausts() {
        let store = SessionStore::new(SESSION_TTL, 2);
        store.park("resp_1", parked_request(), decision(), vec![pending_call()], 2);

        let err = store.resume("resp_1", &[output("call_1")]).unwrap_err();
        assert!(matches!(err, GatewayError::ToolLoopExhausted));
    }

    #[test]
    fn expired_session_is_unknown() {
        let store = SessionStore::new(Duration::from_millis(0), 4);
        store.park("resp_1", parked_request(), decision(), vec![pending_call()], 0);
        std::thread::sleep(Duration::from_millis(5));

        let err = store.resume("resp_1", &[output("call_1")]).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownResponseId(_)));

        store.park("resp_2", parked_request(), decision(), vec![pending_call()], 0);
        std::thread::sleep(Duration::from_millis(5));
        store.sweep();
        assert!(store.is_empty());
    }
}
