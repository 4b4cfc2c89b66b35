//! Per-session conversation loop.
//!
//! `submit` turns one user message into a lazy stream of turns:
//!
//! ```text
//! AwaitingUser -> ModelThinking -> (ToolInvocation -> ModelThinking)* -> AwaitingUser
//! ```
//!
//! The stream ends at the first assistant message without tool calls.
//! Dropping it early abandons the rest of the turn; a tool request is only
//! recorded in the history together with its result, so an abandoned turn
//! never leaves an unanswered call behind.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, Stream};
use futures::StreamExt;

use crate::error::{AssistantError, Result};
use crate::gateway::ToolGateway;
use crate::llm::LanguageModel;
use crate::memory::ConversationMemory;
use crate::message::{ConversationTurn, Role, ToolCall};
use crate::tool::ToolDescription;

pub struct ChatSession<M: LanguageModel + ?Sized> {
    system_prompt: String,
    model: Arc<M>,
    gateway: Arc<ToolGateway>,
    tools: Vec<ToolDescription>,
    history: ConversationMemory,
    max_steps: usize,
}

impl<M: LanguageModel + ?Sized> ChatSession<M> {
    pub fn new(model: Arc<M>, gateway: Arc<ToolGateway>) -> Self {
        let tools = gateway.describe();
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            model,
            gateway,
            tools,
            history: ConversationMemory::default(),
            max_steps: 8,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn set_model(&mut self, model: Arc<M>) {
        self.model = model;
    }

    pub fn history(&self) -> &ConversationMemory {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
        tracing::debug!("conversation history cleared");
    }

    /// Start a turn. The returned stream yields the user turn first, then
    /// each tool request and tool result, and finally the assistant reply.
    /// A model failure is yielded as an error and ends the stream.
    pub fn submit(
        &mut self,
        user_text: impl Into<String>,
    ) -> impl Stream<Item = Result<ConversationTurn>> + '_ {
        let driver = TurnDriver {
            session: self,
            pending_user: Some(user_text.into()),
            queued: VecDeque::new(),
            in_flight: None,
            steps: 0,
            finished: false,
        };
        stream::unfold(driver, |mut driver| async move {
            let item = driver.advance().await?;
            Some((item, driver))
        })
    }

    /// Run a whole turn and return the assistant's final text.
    pub async fn respond(&mut self, user_text: impl Into<String>) -> Result<String> {
        let turns = self.submit(user_text);
        futures::pin_mut!(turns);
        let mut reply = None;
        while let Some(turn) = turns.next().await {
            let turn = turn?;
            if turn.role == Role::Assistant && !turn.is_tool_request() {
                reply = Some(turn.content);
            }
        }
        reply.ok_or_else(|| AssistantError::Protocol("turn ended without a reply".into()))
    }

    fn prompt(&self) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ConversationTurn::system(self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages
    }
}

struct TurnDriver<'a, M: LanguageModel + ?Sized> {
    session: &'a mut ChatSession<M>,
    pending_user: Option<String>,
    queued: VecDeque<ToolCall>,
    in_flight: Option<ConversationTurn>,
    steps: usize,
    finished: bool,
}

impl<'a, M: LanguageModel + ?Sized> TurnDriver<'a, M> {
    async fn advance(&mut self) -> Option<Result<ConversationTurn>> {
        if self.finished {
            return None;
        }

        if let Some(text) = self.pending_user.take() {
            let turn = ConversationTurn::user(text);
            self.session.history.push(turn.clone());
            tracing::info!("user turn submitted");
            return Some(Ok(turn));
        }

        if let Some(request) = self.in_flight.take() {
            let call = request.tool_call.clone()?;
            let result = self.session.gateway.invoke(&call).await;
            if let Some(message) = result.error_message() {
                tracing::warn!(tool = %call.name, error = %message, "tool call failed; returning error to model");
            }
            let response = ConversationTurn::tool(&call, result);
            self.session.history.push(request);
            self.session.history.push(response.clone());
            return Some(Ok(response));
        }

        if let Some(call) = self.queued.pop_front() {
            return Some(Ok(self.dispatch(ConversationTurn::tool_request(call))));
        }

        if self.steps >= self.session.max_steps {
            self.finished = true;
            tracing::warn!(steps = self.steps, "turn reached the step limit");
            return Some(Err(AssistantError::Protocol(format!(
                "turn reached the step limit of {} model calls without a reply",
                self.session.max_steps
            ))));
        }
        self.steps += 1;

        let prompt = self.session.prompt();
        let completion = match self
            .session
            .model
            .complete_chat(&prompt, &self.session.tools)
            .await
        {
            Ok(completion) => completion,
            Err(err) => {
                self.finished = true;
                tracing::error!(error = %err, "language model call failed");
                return Some(Err(err));
            }
        };

        if completion.tool_calls.is_empty() {
            self.finished = true;
            let turn = ConversationTurn::assistant(completion.content.unwrap_or_default());
            self.session.history.push(turn.clone());
            tracing::info!(steps = self.steps, "assistant replied");
            return Some(Ok(turn));
        }

        tracing::debug!(count = completion.tool_calls.len(), "model requested tool calls");
        self.queued.extend(completion.tool_calls);
        let mut request = ConversationTurn::tool_request(self.queued.pop_front()?);
        if let Some(content) = completion.content.filter(|c| !c.trim().is_empty()) {
            request.content = content;
        }
        Some(Ok(self.dispatch(request)))
    }

    /// Hold a tool request until the next poll executes it.
    fn dispatch(&mut self, request: ConversationTurn) -> ConversationTurn {
        self.in_flight = Some(request.clone());
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RemoteApiClient, RemoteApiConfig};
    use crate::llm::StubModel;
    use crate::message::ToolResult;
    use crate::tool::{ParamType, ParameterSpec, ToolRegistry, ToolSpec};
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> Arc<ToolGateway> {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("get_gene", "/gene", "Look up a gene").param(
                    ParameterSpec::required("gene_id", ParamType::String, "Gene id"),
                ),
            )
            .unwrap();
        let client =
            RemoteApiClient::new(RemoteApiConfig::default().with_base_url(server.uri())).unwrap();
        Arc::new(ToolGateway::new(registry, client))
    }

    async fn collect<M: LanguageModel + ?Sized>(
        session: &mut ChatSession<M>,
        text: &str,
    ) -> Vec<Result<ConversationTurn>> {
        session.submit(text.to_string()).collect().await
    }

    #[tokio::test]
    async fn returns_reply_without_tools() {
        let server = MockServer::start().await;
        let model = StubModel::new(vec![r#"{"action":"respond","content":"Hello!"}"#.into()]);
        let mut session = ChatSession::new(model, gateway(&server));

        let reply = session.respond("hi").await.unwrap();

        assert_eq!(reply, "Hello!");
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let server = MockServer::start().await;
        let payload = json!({"id": "BRCA1", "name": "BRCA1 DNA repair associated"});
        Mock::given(method("GET"))
            .and(path("/gene"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"get_gene","arguments":{"gene_id":"BRCA1"}}"#.into(),
            r#"{"action":"respond","content":"BRCA1 repairs DNA."}"#.into(),
        ]);
        let mut session = ChatSession::new(model, gateway(&server));

        let turns: Vec<ConversationTurn> = collect(&mut session, "Tell me about BRCA1")
            .await
            .into_iter()
            .map(|t| t.unwrap())
            .collect();

        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert!(turns[1].is_tool_request());
        assert_eq!(turns[3].content, "BRCA1 repairs DNA.");

        let tool_turns: Vec<&ConversationTurn> = session
            .history()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .collect();
        assert_eq!(tool_turns.len(), 1);
        let content: Value = serde_json::from_str(&tool_turns[0].content).unwrap();
        assert_eq!(content, payload);
        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn tool_errors_are_returned_to_the_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"get_gene","arguments":{"gene_id":"XYZ"}}"#.into(),
            r#"{"action":"respond","content":"I could not find that gene. Which ID did you mean?"}"#
                .into(),
        ]);
        let mut session = ChatSession::new(model.clone(), gateway(&server));

        let reply = session.respond("Tell me about XYZ").await.unwrap();
        assert!(reply.contains("Which ID"));

        let second_prompt = &model.requests()[1];
        let tool_turn = second_prompt.last().unwrap();
        assert_eq!(tool_turn.role, Role::Tool);
        let result = &tool_turn.tool_response.as_ref().unwrap().result;
        assert!(matches!(result, ToolResult::Error { message } if message.contains("500")));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_skipped() {
        let server = MockServer::start().await;
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"delete_graph","arguments":{}}"#.into(),
            r#"{"action":"respond","content":"That operation is not available."}"#.into(),
        ]);
        let mut session = ChatSession::new(model, gateway(&server));

        let turns = collect(&mut session, "wipe it").await;
        let tool_turn = turns[2].as_ref().unwrap();
        let message = tool_turn
            .tool_response
            .as_ref()
            .unwrap()
            .result
            .error_message()
            .unwrap();
        assert!(message.contains("not found"));
    }

    #[tokio::test]
    async fn abandoned_turn_leaves_no_dangling_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"get_gene","arguments":{"gene_id":"TP53"}}"#.into(),
        ]);
        let mut session = ChatSession::new(model, gateway(&server));

        {
            let turns = session.submit("Tell me about TP53");
            futures::pin_mut!(turns);
            let user = turns.next().await.unwrap().unwrap();
            assert_eq!(user.role, Role::User);
            let request = turns.next().await.unwrap().unwrap();
            assert!(request.is_tool_request());
        }

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().iter().next().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn runs_multiple_calls_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gene"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;
        let model = StubModel::new(vec![
            r#"{"action":"call_tools","calls":[
                {"name":"get_gene","arguments":{"gene_id":"TP53"}},
                {"name":"get_gene","arguments":{"gene_id":"MDM2"}}
            ]}"#
            .into(),
            r#"{"action":"respond","content":"Both genes found."}"#.into(),
        ]);
        let mut session = ChatSession::new(model.clone(), gateway(&server));

        session.respond("Compare TP53 and MDM2").await.unwrap();

        let ids: Vec<Value> = session
            .history()
            .iter()
            .filter_map(|t| t.tool_call.as_ref())
            .map(|c| c.arguments["gene_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("TP53"), json!("MDM2")]);
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn stops_at_step_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"get_gene","arguments":{"gene_id":"A"}}"#.into(),
            r#"{"action":"call_tool","name":"get_gene","arguments":{"gene_id":"B"}}"#.into(),
        ]);
        let mut session = ChatSession::new(model, gateway(&server)).with_max_steps(1);

        let turns = collect(&mut session, "loop").await;

        assert_eq!(turns.len(), 4);
        assert!(matches!(
            turns.last().unwrap(),
            Err(AssistantError::Protocol(message)) if message.contains("step limit")
        ));
    }

    #[tokio::test]
    async fn model_failure_is_not_fatal_to_the_session() {
        let server = MockServer::start().await;
        let model = StubModel::new(vec![]);
        let mut session = ChatSession::new(model, gateway(&server));

        assert!(session.respond("hello?").await.is_err());
        assert_eq!(session.history().len(), 1);

        let model = StubModel::new(vec![r#"{"action":"respond","content":"back"}"#.into()]);
        session.set_model(model);
        assert_eq!(session.respond("hello again").await.unwrap(), "back");
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn history_is_shared_across_turns_and_clearable() {
        let server = MockServer::start().await;
        let model = StubModel::new(vec![
            r#"{"action":"respond","content":"one"}"#.into(),
            r#"{"action":"respond","content":"two"}"#.into(),
        ]);
        let mut session =
            ChatSession::new(model.clone(), gateway(&server)).with_system_prompt("Evo-KG");

        session.respond("first").await.unwrap();
        session.respond("second").await.unwrap();
        assert_eq!(session.history().len(), 4);

        let last_prompt = model.requests().pop().unwrap();
        assert_eq!(last_prompt[0].role, Role::System);
        assert_eq!(last_prompt[0].content, "Evo-KG");
        assert_eq!(last_prompt.len(), 4);

        session.clear();
        session.clear();
        assert!(session.history().is_empty());
    }
}
