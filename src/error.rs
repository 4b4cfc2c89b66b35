use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("invalid tool schema: {0}")]
    Schema(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote service returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("could not decode remote response: {0}")]
    Decode(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
