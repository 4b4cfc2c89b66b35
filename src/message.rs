use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured request from the model to run one registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Normalized outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Ok { payload: Value },
    Error { message: String },
}

impl ToolResult {
    pub fn ok(payload: Value) -> Self {
        ToolResult::Ok { payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolResult::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            ToolResult::Ok { payload } => Some(payload),
            ToolResult::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolResult::Ok { .. } => None,
            ToolResult::Error { message } => Some(message),
        }
    }

    /// JSON text handed back to the model as the tool message content.
    pub fn to_content(&self) -> String {
        match self {
            ToolResult::Ok { payload } => payload.to_string(),
            ToolResult::Error { message } => json!({ "error": message }).to_string(),
        }
    }
}

impl From<crate::error::AssistantError> for ToolResult {
    fn from(err: crate::error::AssistantError) -> Self {
        ToolResult::error(err.to_string())
    }
}

/// The tool result attached to a tool-role turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub name: String,
    pub result: ToolResult,
}

/// One entry of a session's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<ToolResponse>,
}

impl ConversationTurn {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_response: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn requesting a tool call.
    pub fn tool_request(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call: Some(call),
            tool_response: None,
        }
    }

    pub fn tool(call: &ToolCall, result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.to_content(),
            tool_call: None,
            tool_response: Some(ToolResponse {
                call_id: call.id.clone(),
                name: call.name.clone(),
                result,
            }),
        }
    }

    pub fn is_tool_request(&self) -> bool {
        self.tool_call.is_some()
    }

    /// Short status line a front-end can show while the turn is in flight.
    pub fn activity_label(&self) -> String {
        if let Some(call) = &self.tool_call {
            return format!("Checking source ({})...", call.name);
        }
        if let Some(response) = &self.tool_response {
            return format!("Evaluating result ({})...", response.name);
        }
        "Thinking...".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_turn_content_is_payload_json() {
        let call = ToolCall::new("get_gene", json!({"gene_id": "BRCA1"})).with_id("call_1");
        let payload = json!({"id": "BRCA1", "name": "BRCA1 DNA repair associated"});
        let turn = ConversationTurn::tool(&call, ToolResult::ok(payload.clone()));

        assert_eq!(turn.role, Role::Tool);
        let parsed: Value = serde_json::from_str(&turn.content).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(
            turn.tool_response.as_ref().unwrap().call_id.as_deref(),
            Some("call_1")
        );
    }

    #[test]
    fn error_result_serializes_with_status_tag() {
        let result = ToolResult::error("remote service returned 500");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "remote service returned 500");
        assert!(result.payload().is_none());
    }

    #[test]
    fn activity_labels_follow_turn_kind() {
        let call = ToolCall::new("predict_tail", json!({}));
        assert_eq!(ConversationTurn::user("hi").activity_label(), "Thinking...");
        assert_eq!(
            ConversationTurn::tool_request(call.clone()).activity_label(),
            "Checking source (predict_tail)..."
        );
        assert_eq!(
            ConversationTurn::tool(&call, ToolResult::ok(json!([]))).activity_label(),
            "Evaluating result (predict_tail)..."
        );
    }
}
