//! The bounded tool-calling loop.
//!
//! One `run_turn` call: persist the user message, then repeatedly feed
//! the transcript to the LLM, persisting assistant text and tool
//! activity as it happens, until the model ends its turn, stops asking
//! for tools, or the round budget runs out. The transcript in the
//! store is the single source of truth; every round re-reads it.

use crate::error::AgentError;
use crate::llm::{ContentBlock, LlmClient, LlmMessage, LlmResponse, LlmRole, LlmToolDef, StopReason};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sift_core::ChatMessage;
use sift_store::DocStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest title synthesized from the first user message.
const TITLE_PREFIX_CHARS: usize = 48;

/// The tool side of the loop, implemented by the MCP client bridge.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    /// The tool catalog in the LLM's expected shape.
    async fn tools(&self) -> Vec<LlmToolDef>;

    /// Invoke one tool. An `Err` here is captured as a tool result;
    /// it never aborts the turn.
    async fn call_tool(&self, name: &str, input: &Value) -> Result<String, AgentError>;
}

/// One completed tool invocation, echoed to the HTTP caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub input: Value,
    pub result: String,
}

/// The outcome of one user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    #[serde(rename = "assistantText")]
    pub assistant_text: String,
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Drives the LLM loop over a durable session transcript.
pub struct AgentOrchestrator {
    llm: Arc<dyn LlmClient>,
    bridge: Arc<dyn ToolBridge>,
    store: DocStore,
    system_prompt: String,
    max_rounds: u32,
}

impl AgentOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        bridge: Arc<dyn ToolBridge>,
        store: DocStore,
        system_prompt: impl Into<String>,
        max_rounds: u32,
    ) -> Self {
        Self {
            llm,
            bridge,
            store,
            system_prompt: system_prompt.into(),
            max_rounds: max_rounds.max(1),
        }
    }

    /// Run one user turn to completion.
    pub async fn run_turn(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> Result<TurnOutcome, AgentError> {
        if self.store.get_session(session_id).await?.is_none() {
            return Err(AgentError::SessionNotFound(session_id.to_string()));
        }

        let first_message = self.store.count_messages(session_id).await? == 0;
        self.store
            .append_message(session_id, &ChatMessage::user(user_text))
            .await?;

        let tools = self.bridge.tools().await;
        let mut assistant_text = String::new();
        let mut tool_calls = Vec::new();

        for round in 0..self.max_rounds {
            let transcript = self.store.list_messages(session_id).await?;
            let messages = translate_transcript(
                &transcript.iter().map(|m| m.message.clone()).collect::<Vec<_>>(),
            );

            let response: LlmResponse = self
                .llm
                .complete(&self.system_prompt, &tools, &messages)
                .await?;

            let mut round_text = Vec::new();
            let mut tool_uses = Vec::new();
            for block in response.content {
                match block {
                    ContentBlock::Text { text } => round_text.push(text),
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_uses.push((id, name, input))
                    }
                    // The model never sends tool_result blocks; ignore
                    // them if a provider misbehaves.
                    ContentBlock::ToolResult { .. } => {}
                }
            }

            if !round_text.is_empty() {
                let text = round_text.join("\n");
                self.store
                    .append_message(session_id, &ChatMessage::assistant(&text))
                    .await?;
                assistant_text = text;
            }
            for (id, name, input) in &tool_uses {
                self.store
                    .append_message(
                        session_id,
                        &ChatMessage::tool_use(name.clone(), input.clone(), id.clone()),
                    )
                    .await?;
            }

            let end_of_turn = response.stop_reason == Some(StopReason::EndTurn);
            if end_of_turn || tool_uses.is_empty() {
                debug!(round, end_of_turn, "agent loop finished");
                break;
            }

            for (id, name, input) in tool_uses {
                let result = match self.bridge.call_tool(&name, &input).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "tool call failed");
                        format!("Error: {e}")
                    }
                };
                self.store
                    .append_message(session_id, &ChatMessage::tool_result(&id, &result))
                    .await?;
                tool_calls.push(ToolCallRecord {
                    name,
                    input,
                    result,
                });
            }

            if round + 1 == self.max_rounds {
                info!(
                    max_rounds = self.max_rounds,
                    "round budget exhausted; returning accumulated text"
                );
            }
        }

        if first_message {
            self.store
                .set_title(session_id, &synthesize_title(user_text))
                .await?;
        }

        Ok(TurnOutcome {
            assistant_text,
            tool_calls,
        })
    }
}

/// Derive a session title from the first user message.
fn synthesize_title(user_text: &str) -> String {
    let trimmed = user_text.trim();
    if trimmed.chars().count() <= TITLE_PREFIX_CHARS {
        trimmed.to_string()
    } else {
        let prefix: String = trimmed.chars().take(TITLE_PREFIX_CHARS).collect();
        format!("{}...", prefix.trim_end())
    }
}

/// Translate a stored transcript into the LLM wire shape.
///
/// - user text opens a user turn (or joins one holding tool results);
/// - assistant text opens an assistant turn;
/// - tool_use blocks ride on the current assistant turn, never a user
///   turn;
/// - tool_result blocks ride on the current user turn, never an
///   assistant turn.
///
/// A tool_use directly followed by its tool_result therefore becomes
/// `(assistant{text, tool_use})(user{tool_result})`.
pub fn translate_transcript(messages: &[ChatMessage]) -> Vec<LlmMessage> {
    let mut out: Vec<LlmMessage> = Vec::new();

    for message in messages {
        match message {
            ChatMessage::User { content } => {
                let joins_tool_results = out.last().is_some_and(|turn| {
                    turn.role == LlmRole::User
                        && turn
                            .content
                            .iter()
                            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
                });
                let block = ContentBlock::Text {
                    text: content.clone(),
                };
                if joins_tool_results {
                    out.last_mut().unwrap().content.push(block);
                } else {
                    out.push(LlmMessage {
                        role: LlmRole::User,
                        content: vec![block],
                    });
                }
            }
            ChatMessage::Assistant { content } => {
                out.push(LlmMessage {
                    role: LlmRole::Assistant,
                    content: vec![ContentBlock::Text {
                        text: content.clone(),
                    }],
                });
            }
            ChatMessage::ToolUse {
                tool_name,
                tool_input,
                tool_use_id,
            } => {
                let block = ContentBlock::ToolUse {
                    id: tool_use_id.clone(),
                    name: tool_name.clone(),
                    input: tool_input.clone(),
                };
                match out.last_mut() {
                    Some(turn) if turn.role == LlmRole::Assistant => turn.content.push(block),
                    _ => out.push(LlmMessage {
                        role: LlmRole::Assistant,
                        content: vec![block],
                    }),
                }
            }
            ChatMessage::ToolResult {
                tool_use_id,
                content,
            } => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.clone(),
                };
                let joins = out.last().is_some_and(|turn| {
                    turn.role == LlmRole::User
                        && turn
                            .content
                            .iter()
                            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
                });
                if joins {
                    out.last_mut().unwrap().content.push(block);
                } else {
                    out.push(LlmMessage {
                        role: LlmRole::User,
                        content: vec![block],
                    });
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays a scripted sequence of completions.
    struct FakeLlm {
        rounds: Mutex<VecDeque<LlmResponse>>,
        fallback: Option<LlmResponse>,
    }

    impl FakeLlm {
        fn scripted(rounds: Vec<LlmResponse>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                fallback: None,
            })
        }

        /// Always returns the same response once the script runs out.
        fn repeating(response: LlmResponse) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(VecDeque::new()),
                fallback: Some(response),
            })
        }
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn complete(
            &self,
            _system: &str,
            _tools: &[LlmToolDef],
            _messages: &[LlmMessage],
        ) -> Result<LlmResponse, AgentError> {
            if let Some(next) = self.rounds.lock().await.pop_front() {
                return Ok(next);
            }
            self.fallback
                .clone()
                .ok_or_else(|| AgentError::Llm("script exhausted".into()))
        }
    }

    /// Bridge returning canned results, or failing on demand.
    struct FakeBridge {
        fail_tools: Vec<String>,
    }

    impl FakeBridge {
        fn ok() -> Arc<Self> {
            Arc::new(Self { fail_tools: vec![] })
        }

        fn failing(tool: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_tools: vec![tool.to_string()],
            })
        }
    }

    #[async_trait]
    impl ToolBridge for FakeBridge {
        async fn tools(&self) -> Vec<LlmToolDef> {
            vec![LlmToolDef {
                name: "query".into(),
                description: "run sql".into(),
                input_schema: json!({"type": "object"}),
            }]
        }

        async fn call_tool(&self, name: &str, input: &Value) -> Result<String, AgentError> {
            if self.fail_tools.iter().any(|t| t == name) {
                return Err(AgentError::Bridge("boom".into()));
            }
            match input.get("sql").and_then(Value::as_str) {
                Some("SELECT 1") => Ok("1".to_string()),
                _ => Ok("ok".to_string()),
            }
        }
    }

    fn text(t: &str) -> ContentBlock {
        ContentBlock::Text { text: t.into() }
    }

    fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    fn response(content: Vec<ContentBlock>, stop: StopReason) -> LlmResponse {
        LlmResponse {
            content,
            stop_reason: Some(stop),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
            }),
        }
    }

    async fn setup(
        llm: Arc<dyn LlmClient>,
        bridge: Arc<dyn ToolBridge>,
    ) -> (AgentOrchestrator, DocStore, String) {
        let store = DocStore::connect_in_memory().await.unwrap();
        let session = store.create_session("u1", None).await.unwrap();
        let orchestrator = AgentOrchestrator::new(llm, bridge, store.clone(), "system", 20);
        (orchestrator, store, session.session_id)
    }

    fn roles(messages: &[sift_store::StoredMessage]) -> Vec<&'static str> {
        messages.iter().map(|m| m.message.role()).collect()
    }

    #[tokio::test]
    async fn plain_text_round_ends_the_turn() {
        let llm = FakeLlm::scripted(vec![response(vec![text("hello")], StopReason::EndTurn)]);
        let (orchestrator, store, session) = setup(llm, FakeBridge::ok()).await;

        let outcome = orchestrator.run_turn(&session, "hi").await.unwrap();
        assert_eq!(outcome.assistant_text, "hello");
        assert!(outcome.tool_calls.is_empty());

        let messages = store.list_messages(&session).await.unwrap();
        assert_eq!(roles(&messages), vec!["user", "assistant"]);

        let title = store.get_session(&session).await.unwrap().unwrap().title;
        assert_eq!(title, "hi");
    }

    #[tokio::test]
    async fn tool_use_round_trip() {
        let llm = FakeLlm::scripted(vec![
            response(
                vec![
                    text("checking"),
                    tool_use("u1", "query", json!({"sql": "SELECT 1"})),
                ],
                StopReason::ToolUse,
            ),
            response(vec![text("one")], StopReason::EndTurn),
        ]);
        let (orchestrator, store, session) = setup(llm, FakeBridge::ok()).await;

        let outcome = orchestrator.run_turn(&session, "count").await.unwrap();
        assert_eq!(outcome.assistant_text, "one");
        assert_eq!(
            outcome.tool_calls,
            vec![ToolCallRecord {
                name: "query".into(),
                input: json!({"sql": "SELECT 1"}),
                result: "1".into(),
            }]
        );

        let messages = store.list_messages(&session).await.unwrap();
        assert_eq!(
            roles(&messages),
            vec!["user", "assistant", "tool_use", "tool_result", "assistant"]
        );
        // tool_use u1 is directly followed by tool_result u1.
        assert_eq!(messages[2].message.tool_use_id(), Some("u1"));
        assert_eq!(messages[3].message.tool_use_id(), Some("u1"));
    }

    #[tokio::test]
    async fn tool_failure_becomes_an_error_result_and_the_loop_continues() {
        let llm = FakeLlm::scripted(vec![
            response(
                vec![tool_use("u1", "query", json!({"sql": "SELECT 1"}))],
                StopReason::ToolUse,
            ),
            response(vec![text("recovered")], StopReason::EndTurn),
        ]);
        let (orchestrator, store, session) = setup(llm, FakeBridge::failing("query")).await;

        let outcome = orchestrator.run_turn(&session, "go").await.unwrap();
        assert_eq!(outcome.assistant_text, "recovered");
        assert!(outcome.tool_calls[0].result.starts_with("Error:"));

        let messages = store.list_messages(&session).await.unwrap();
        let tool_result = messages
            .iter()
            .find_map(|m| match &m.message {
                ChatMessage::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert!(tool_result.starts_with("Error:"));
    }

    #[tokio::test]
    async fn loop_terminates_at_the_round_budget() {
        // The model asks for a tool every round, forever.
        let llm = FakeLlm::repeating(response(
            vec![tool_use("u", "query", json!({"sql": "SELECT 1"}))],
            StopReason::ToolUse,
        ));
        let store = DocStore::connect_in_memory().await.unwrap();
        let session = store.create_session("u1", None).await.unwrap();
        let orchestrator =
            AgentOrchestrator::new(llm, FakeBridge::ok(), store.clone(), "system", 5);

        let outcome = orchestrator
            .run_turn(&session.session_id, "loop forever")
            .await
            .unwrap();
        assert_eq!(outcome.tool_calls.len(), 5);
        assert_eq!(outcome.assistant_text, "");
    }

    #[tokio::test]
    async fn llm_failure_is_fatal_for_the_turn() {
        let llm = FakeLlm::scripted(vec![]);
        let (orchestrator, _store, session) = setup(llm, FakeBridge::ok()).await;
        let err = orchestrator.run_turn(&session, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let llm = FakeLlm::scripted(vec![]);
        let (orchestrator, _store, _session) = setup(llm, FakeBridge::ok()).await;
        let err = orchestrator.run_turn("missing", "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn title_is_set_only_on_the_first_message() {
        let llm = FakeLlm::repeating(response(vec![text("ok")], StopReason::EndTurn));
        let (orchestrator, store, session) = setup(llm, FakeBridge::ok()).await;

        orchestrator.run_turn(&session, "first question").await.unwrap();
        orchestrator.run_turn(&session, "second question").await.unwrap();

        let title = store.get_session(&session).await.unwrap().unwrap().title;
        assert_eq!(title, "first question");
    }

    #[test]
    fn long_titles_are_bounded() {
        let title = synthesize_title(&"word ".repeat(30));
        assert!(title.chars().count() <= TITLE_PREFIX_CHARS + 3);
        assert!(title.ends_with("..."));
        assert_eq!(synthesize_title("  hi  "), "hi");
    }

    #[test]
    fn translation_shapes_tool_turns() {
        let transcript = vec![
            ChatMessage::user("count"),
            ChatMessage::assistant("checking"),
            ChatMessage::tool_use("query", json!({"sql": "SELECT 1"}), "u1"),
            ChatMessage::tool_result("u1", "1"),
            ChatMessage::assistant("one"),
        ];
        let wire = translate_transcript(&transcript);

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0].role, LlmRole::User);
        // assistant text and tool_use coalesce into one turn
        assert_eq!(wire[1].role, LlmRole::Assistant);
        assert_eq!(wire[1].content.len(), 2);
        assert!(matches!(wire[1].content[1], ContentBlock::ToolUse { .. }));
        // tool_result rides a user turn
        assert_eq!(wire[2].role, LlmRole::User);
        assert!(matches!(wire[2].content[0], ContentBlock::ToolResult { .. }));
        assert_eq!(wire[3].role, LlmRole::Assistant);
    }

    #[test]
    fn user_text_joins_a_tool_result_turn() {
        let transcript = vec![
            ChatMessage::tool_use("query", json!({}), "u1"),
            ChatMessage::tool_result("u1", "1"),
            ChatMessage::user("thanks, continue"),
        ];
        let wire = translate_transcript(&transcript);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[1].role, LlmRole::User);
        assert_eq!(wire[1].content.len(), 2);
    }

    /// Projecting the wire shape back to (role, correlation) tuples
    /// reproduces the stored sequence exactly.
    #[test]
    fn translation_round_trips_roles_and_correlations() {
        let transcript = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::tool_use("query", json!({}), "u1"),
            ChatMessage::tool_result("u1", "r1"),
            ChatMessage::tool_use("query", json!({}), "u2"),
            ChatMessage::tool_result("u2", "r2"),
            ChatMessage::assistant("a2"),
            ChatMessage::user("q2"),
        ];

        let expected: Vec<(&str, Option<String>)> = transcript
            .iter()
            .map(|m| (m.role(), m.tool_use_id().map(String::from)))
            .collect();

        let projected: Vec<(&str, Option<String>)> = translate_transcript(&transcript)
            .iter()
            .flat_map(|turn| {
                turn.content.iter().map(move |block| match block {
                    ContentBlock::Text { .. } => match turn.role {
                        LlmRole::User => ("user", None),
                        LlmRole::Assistant => ("assistant", None),
                    },
                    ContentBlock::ToolUse { id, .. } => ("tool_use", Some(id.clone())),
                    ContentBlock::ToolResult { tool_use_id, .. } => {
                        ("tool_result", Some(tool_use_id.clone()))
                    }
                })
            })
            .collect();

        assert_eq!(projected, expected);
    }

    #[test]
    fn tool_use_never_lands_on_a_user_turn() {
        let transcript = vec![
            ChatMessage::user("go"),
            ChatMessage::tool_use("query", json!({}), "u1"),
        ];
        let wire = translate_transcript(&transcript);
        assert_eq!(wire[1].role, LlmRole::Assistant);
    }
}
