use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Raw message text reported by the hosted backend.
    #[error("{0}")]
    Backend(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("not signed in")]
    NotSignedIn,
    #[error("chat id is missing")]
    MissingChatId,
    #[error("no user named {0}")]
    UserNotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("malformed document {id}: {reason}")]
    Decode { id: String, reason: String },
    #[error("cache error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn decode(id: &str, reason: impl Into<String>) -> Self {
        ChatError::Decode {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
