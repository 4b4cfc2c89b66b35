//! Chat back-end for questions about the Evo-KG biomedical knowledge graph.
//!
//! The crate provides:
//! - A declarative tool registry (`ToolSpec`, `ToolRegistry`) describing the
//!   knowledge-graph operations a language model may call.
//! - A remote API client and a `ToolGateway` that turn a model `ToolCall`
//!   into one HTTP GET and a normalized `ToolResult`.
//! - A per-session conversation loop (`ChatSession`) that streams turns
//!   lazily while alternating between the model and the gateway.
//! - An HTTP service that hosts independent sessions per user.

mod catalog;
mod client;
mod config;
mod error;
mod gateway;
mod llm;
mod memory;
mod message;
mod server;
mod session;
mod telemetry;
mod tool;

pub use catalog::{evokg_toolkit, openapi_toolkit, AgentProfile, ENTITY_TYPES, EXAMPLE_RELATIONS};
pub use client::{RemoteApiClient, RemoteApiConfig};
pub use config::{
    AgentConfig, AppConfig, Credentials, KnowledgeGraphConfig, LoggingConfig, ModelConfig,
    ServerConfig,
};
pub use error::{AssistantError, Result};
pub use gateway::ToolGateway;
pub use llm::{model_factory, LanguageModel, ModelCompletion, ModelFactory, OpenAIClient, StubModel};
pub use memory::ConversationMemory;
pub use message::{ConversationTurn, Role, ToolCall, ToolResponse, ToolResult};
pub use server::{router, serve, SessionManager};
pub use session::ChatSession;
pub use telemetry::init_tracing;
pub use tool::{ParamType, ParameterSpec, ToolDescription, ToolRegistry, ToolSpec};
