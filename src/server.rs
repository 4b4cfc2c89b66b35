use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::Instrument;
use uuid::Uuid;

use crate::catalog::AgentProfile;
use crate::config::Credentials;
use crate::error::{AssistantError, Result};
use crate::gateway::ToolGateway;
use crate::llm::{LanguageModel, ModelFactory};
use crate::message::ConversationTurn;
use crate::session::ChatSession;

struct SessionEntry {
    chat: ChatSession<dyn LanguageModel>,
    credentials: Credentials,
}

/// Owns every user's session. Sessions share the gateway and profile but
/// nothing mutable.
pub struct SessionManager {
    profile: Arc<AgentProfile>,
    gateway: Arc<ToolGateway>,
    models: ModelFactory,
    default_credentials: Credentials,
    max_steps: usize,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionEntry>>>>,
}

impl SessionManager {
    pub fn new(
        profile: AgentProfile,
        gateway: ToolGateway,
        models: ModelFactory,
        default_credentials: Credentials,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            gateway: Arc::new(gateway),
            models,
            default_credentials,
            max_steps: 8,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub async fn create(&self, api_key: Option<String>) -> Result<Uuid> {
        let mut credentials = self.default_credentials.clone();
        if let Some(key) = api_key {
            credentials.set_override(key)?;
        }
        let model = (self.models)(&credentials)?;
        let chat = ChatSession::new(model, Arc::clone(&self.gateway))
            .with_system_prompt(self.profile.system_prompt.clone())
            .with_max_steps(self.max_steps);

        let id = Uuid::new_v4();
        self.sessions.write().await.insert(
            id,
            Arc::new(Mutex::new(SessionEntry { chat, credentials })),
        );
        tracing::info!(session = %id, "session created");
        Ok(id)
    }

    async fn entry(&self, id: Uuid) -> Option<Arc<Mutex<SessionEntry>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(session = %id, "session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/agent", get(describe_agent))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", axum::routing::delete(delete_session))
        .route(
            "/sessions/:id/messages",
            post(send_message).get(list_messages).delete(clear_messages),
        )
        .route("/sessions/:id/api_key", put(update_api_key))
        .with_state(manager)
}

pub async fn serve(manager: Arc<SessionManager>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(manager).into_make_service())
        .await
        .map_err(|err| AssistantError::Protocol(format!("server error: {err}")))?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn session_not_found(id: Uuid) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("session {id} not found"))
}

#[derive(Serialize)]
struct TurnView {
    #[serde(flatten)]
    turn: ConversationTurn,
    activity: String,
}

impl From<ConversationTurn> for TurnView {
    fn from(turn: ConversationTurn) -> Self {
        let activity = turn.activity_label();
        Self { turn, activity }
    }
}

async fn describe_agent(State(state): State<Arc<SessionManager>>) -> impl IntoResponse {
    let profile = state.profile();
    Json(json!({
        "name": profile.name,
        "model": profile.model,
        "greeting": profile.greeting,
        "tools": state.gateway.describe(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    api_key: Option<String>,
}

async fn create_session(
    State(state): State<Arc<SessionManager>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Response {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    match state.create(request.api_key).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({ "session_id": id, "greeting": state.profile().greeting })),
        )
            .into_response(),
        Err(AssistantError::Config(message)) => error_response(
            StatusCode::BAD_REQUEST,
            format!("Enter an API key to begin chatting ({message})"),
        ),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn delete_session(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<Uuid>,
) -> Response {
    if state.remove(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        session_not_found(id)
    }
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    content: String,
}

async fn send_message(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Response {
    if req.content.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message content must not be empty");
    }
    let Some(entry) = state.entry(id).await else {
        return session_not_found(id);
    };
    let span = tracing::info_span!("session", session = %id, agent = %state.profile().name);

    async move {
        let mut entry = entry.lock().await;
        let mut produced: Vec<TurnView> = Vec::new();
        let turns = entry.chat.submit(req.content);
        futures::pin_mut!(turns);
        while let Some(turn) = turns.next().await {
            match turn {
                Ok(turn) => {
                    record_turn(&turn);
                    produced.push(turn.into());
                }
                Err(err) => {
                    tracing::error!(error = %err, "turn failed");
                    return (
                        StatusCode::BAD_GATEWAY,
                        Json(json!({ "error": err.to_string(), "turns": produced })),
                    )
                        .into_response();
                }
            }
        }
        Json(json!({ "turns": produced })).into_response()
    }
    .instrument(span)
    .await
}

/// Audit line for every turn a session produces.
fn record_turn(turn: &ConversationTurn) {
    let tool = turn
        .tool_call
        .as_ref()
        .map(|call| call.name.as_str())
        .or_else(|| turn.tool_response.as_ref().map(|response| response.name.as_str()))
        .unwrap_or("-");
    let status = match &turn.tool_response {
        Some(response) if response.result.is_ok() => "ok",
        Some(_) => "error",
        None => "-",
    };
    tracing::info!(role = ?turn.role, tool, status, content = %turn.content, "turn produced");
}

async fn list_messages(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<Uuid>,
) -> Response {
    let Some(entry) = state.entry(id).await else {
        return session_not_found(id);
    };
    let entry = entry.lock().await;
    let turns: Vec<TurnView> = entry
        .chat
        .history()
        .iter()
        .cloned()
        .map(TurnView::from)
        .collect();
    Json(json!({ "turns": turns })).into_response()
}

async fn clear_messages(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<Uuid>,
) -> Response {
    let Some(entry) = state.entry(id).await else {
        return session_not_found(id);
    };
    entry.lock().await.chat.clear();
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct ApiKeyRequest {
    api_key: String,
}

async fn update_api_key(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApiKeyRequest>,
) -> Response {
    let Some(entry) = state.entry(id).await else {
        return session_not_found(id);
    };
    let mut entry = entry.lock().await;

    let mut credentials = entry.credentials.clone();
    if let Err(err) = credentials.set_override(req.api_key) {
        return error_response(StatusCode::BAD_REQUEST, err.to_string());
    }
    match (state.models)(&credentials) {
        Ok(model) => {
            entry.chat.set_model(model);
            let masked = credentials.masked();
            entry.credentials = credentials;
            Json(json!({ "using_key": masked })).into_response()
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}
