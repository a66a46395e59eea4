use thiserror::Error;

/// Everything that can go wrong while relaying one account.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("cannot decompose message: {0}")]
    Decomposition(String),
    #[error("cannot render forward mask: {0}")]
    Render(String),
    #[error("submission failed: {0}")]
    Submission(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<async_imap::error::Error> for RelayError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error;
        match err {
            Error::Io(e) => RelayError::Connection(e.to_string()),
            Error::ConnectionLost => RelayError::Connection("connection lost".to_string()),
            other => RelayError::Protocol(other.to_string()),
        }
    }
}

impl From<tera::Error> for RelayError {
    fn from(err: tera::Error) -> Self {
        RelayError::Render(err.to_string())
    }
}
