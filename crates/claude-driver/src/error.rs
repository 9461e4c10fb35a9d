use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse stream-json line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to spawn claude process: {0}")]
    Spawn(String),

    #[error("timed out after {0}s waiting for the init message")]
    InitTimeout(u64),

    #[error("no live stream for streaming id: {0}")]
    StreamNotFound(String),

    #[error("permission request not found: {0}")]
    PermissionNotFound(String),

    #[error("permission request {0} was already decided")]
    AlreadyDecided(String),

    #[error("process error: {0}")]
    Process(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
