//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{Credentials, ModelConfig};
use crate::error::{AssistantError, Result};
use crate::message::{ConversationTurn, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[ConversationTurn],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion>;
}

/// Builds the model a session talks to from that session's credentials.
pub type ModelFactory =
    Arc<dyn Fn(&Credentials) -> Result<Arc<dyn LanguageModel>> + Send + Sync>;

/// Factory for the configured provider. Every model it builds shares one
/// HTTP connection pool.
pub fn model_factory(cfg: ModelConfig) -> Result<ModelFactory> {
    match cfg.provider.to_ascii_lowercase().as_str() {
        "openai" => {
            let http = OpenAIClient::http_client(&cfg)?;
            Ok(Arc::new(move |creds: &Credentials| -> Result<Arc<dyn LanguageModel>> {
                let client = OpenAIClient::with_http(http.clone(), &cfg, creds)?;
                Ok(Arc::new(client) as Arc<dyn LanguageModel>)
            }))
        }
        other => Err(AssistantError::Config(format!(
            "unsupported model provider `{other}`"
        ))),
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> AssistantError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AssistantError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    AssistantError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAIClient {
    pub fn from_config(cfg: &ModelConfig, credentials: &Credentials) -> Result<Self> {
        Self::with_http(Self::http_client(cfg)?, cfg, credentials)
    }

    fn http_client(cfg: &ModelConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|err| AssistantError::LanguageModel(format!("http client error: {err}")))
    }

    /// Build a client for `credentials` on an existing connection pool.
    pub fn with_http(
        http: reqwest::Client,
        cfg: &ModelConfig,
        credentials: &Credentials,
    ) -> Result<Self> {
        let api_key = credentials
            .current()
            .map(str::to_string)
            .ok_or_else(|| AssistantError::Config("missing OpenAI API key".into()))?;
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            http,
            model: cfg.model.clone(),
            api_key,
            base_url,
            organization: cfg.organization.clone(),
        })
    }

    fn to_openai_messages(&self, messages: &[ConversationTurn]) -> Vec<OpenAiMessage> {
        let mut built = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            if let Some(call) = &message.tool_call {
                built.push(OpenAiMessage {
                    role,
                    content: (!message.content.is_empty()).then(|| message.content.clone()),
                    tool_call_id: None,
                    tool_calls: Some(vec![OpenAiToolCall {
                        id: Some(call_id(call.id.as_deref(), index)),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: call.name.clone(),
                            arguments: serialize_tool_arguments(&call.arguments),
                        },
                    }]),
                });
                continue;
            }

            // A tool result answers the request turn directly before it.
            let tool_call_id = message.tool_response.as_ref().map(|response| {
                call_id(response.call_id.as_deref(), index.saturating_sub(1))
            });

            built.push(OpenAiMessage {
                role,
                content: Some(message.content.clone()),
                tool_call_id,
                tool_calls: None,
            });
        }
        built
    }

    fn to_openai_tools(&self, tools: &[ToolDescription]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }

        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }
}

fn call_id(id: Option<&str>, index: usize) -> String {
    id.map(str::to_string)
        .unwrap_or_else(|| format!("call_{index}"))
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[ConversationTurn],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let mut payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(messages),
        });
        if let Some(tools) = self.to_openai_tools(tools) {
            payload["tools"] = serde_json::to_value(tools)?;
            payload["tool_choice"] = Value::String("auto".to_string());
        }

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| AssistantError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            AssistantError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AssistantError::LanguageModel("OpenAI returned no choices".into()))?;

        let mut tool_calls = Vec::new();
        if let Some(calls) = first.message.tool_calls {
            for call in calls {
                let args = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                tool_calls.push(ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: args,
                });
            }
        }

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
        })
    }
}

/// Scripted model for tests and offline runs.
///
/// Each response is a JSON directive: `{"action":"respond","content":...}`,
/// `{"action":"call_tool","name":...,"arguments":{...}}` or
/// `{"action":"call_tools","calls":[{"name":...,"arguments":{...}}]}`.
/// Anything else is returned verbatim as assistant text.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Conversations the model has been asked to complete, in order.
    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        self.requests
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    /// Scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
    CallTools { calls: Vec<ToolCall> },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[ConversationTurn],
        _tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let poisoned = || AssistantError::LanguageModel("stub model poisoned".into());
        self.requests
            .lock()
            .map_err(|_| poisoned())?
            .push(messages.to_vec());
        let raw = self
            .responses
            .lock()
            .map_err(|_| poisoned())?
            .pop_front()
            .ok_or_else(|| {
                AssistantError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion::text(content)),
            Ok(StubDirective::CallTool { name, arguments }) => {
                Ok(ModelCompletion::calls(vec![ToolCall::new(name, arguments)]))
            }
            Ok(StubDirective::CallTools { calls }) => Ok(ModelCompletion::calls(calls)),
            Err(_) => Ok(ModelCompletion::text(raw)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}
