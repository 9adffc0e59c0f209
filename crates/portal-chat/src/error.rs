use thiserror::Error;

/// Errors produced by calls to the REST backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The resource does not exist (e.g. no history for a new conversation).
    #[error("Not found")]
    NotFound,

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Errors produced by the chat client.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("Not connected")]
    Offline,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
