use thiserror::Error;

#[derive(Debug, Error)]
pub enum CuiError {
    #[error("workingDirectory is required")]
    MissingWorkingDirectory,

    #[error("initialPrompt is required")]
    MissingInitialPrompt,

    #[error("sessionId is required")]
    MissingSessionId,

    #[error("message is required")]
    MissingMessage,

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("streaming id not found: {0}")]
    StreamingIdNotFound(String),

    #[error("failed to spawn claude process: {0}")]
    SpawnFailed(String),

    #[error("timed out after {0}s waiting for the init message")]
    InitTimeout(u64),

    #[error("failed to read system status: {0}")]
    SystemStatus(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CuiError {
    /// Stable machine-readable code carried in 4xx/5xx response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CuiError::MissingWorkingDirectory => "MISSING_WORKING_DIRECTORY",
            CuiError::MissingInitialPrompt => "MISSING_INITIAL_PROMPT",
            CuiError::MissingSessionId => "MISSING_SESSION_ID",
            CuiError::MissingMessage => "MISSING_MESSAGE",
            CuiError::InvalidAction(_) => "INVALID_ACTION",
            CuiError::InvalidRequest(_) => "INVALID_REQUEST",
            CuiError::InvalidSessionId(_) => "INVALID_SESSION_ID",
            CuiError::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            CuiError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            CuiError::StreamingIdNotFound(_) => "STREAMING_ID_NOT_FOUND",
            CuiError::SpawnFailed(_) => "SPAWN_FAILED",
            CuiError::InitTimeout(_) => "INIT_TIMEOUT",
            CuiError::SystemStatus(_) => "SYSTEM_STATUS_ERROR",
            CuiError::HomeNotFound
            | CuiError::Io(_)
            | CuiError::Yaml(_)
            | CuiError::Json(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, CuiError>;
