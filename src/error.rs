use crate::schema::RejectionReason;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] RejectionReason),

    #[error("JSON serialization error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("URL parse error: {0}")]
    UrlParse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Remote error - status: {status}, message: {message}")]
    Remote { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid account identifier: {0}")]
    InvalidAccount(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("Mutation of {0} attempted from inside a change handler")]
    ReentrantMutation(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::UrlParse(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Error::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_connect() || err.is_request() {
            Error::Connection(err.to_string())
        } else {
            Error::Json(err.to_string())
        }
    }
}
