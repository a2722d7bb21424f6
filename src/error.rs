use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

use crate::dispatch::ReplyStatus;
use crate::protocol::ErrorMessage;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = self.to_string();
        let response = json!({
            "cmd": "error",
            "wrt": "server",
            "error": message,
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Failure reported by a backend. The text reaches the client verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Everything that can go wrong while answering one command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid session.")]
    Session,

    #[error("Can't log in!")]
    LoginFailed,

    #[error("Unsupported list type: {0}")]
    Unsupported(String),

    #[error("Invalid range.")]
    InvalidRange,

    #[error("{source}")]
    Backend {
        wrt: String,
        status: ReplyStatus,
        source: BackendError,
    },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl CommandError {
    /// Wraps a backend failure for `wrt`, classified by the command that failed.
    pub fn backend(wrt: &str, source: BackendError) -> Self {
        // register failures count as bad requests too, not as a 200 reply.
        let status = match wrt {
            "get" | "list" => ReplyStatus::NotFound,
            _ => ReplyStatus::BadRequest,
        };
        CommandError::Backend {
            wrt: wrt.to_string(),
            status,
            source,
        }
    }

    pub fn status(&self) -> ReplyStatus {
        match self {
            CommandError::Session | CommandError::LoginFailed => ReplyStatus::Unauthorized,
            CommandError::Unsupported(_) | CommandError::InvalidRange => ReplyStatus::BadRequest,
            CommandError::Backend { status, .. } => *status,
            CommandError::UnknownCommand(_) => ReplyStatus::ServerError,
        }
    }

    /// The wire shape of this error, replying to `wrt`.
    pub fn to_message(&self, wrt: &str) -> ErrorMessage {
        match self {
            CommandError::Session => ErrorMessage::session(),
            CommandError::LoginFailed => ErrorMessage::new("login", self.to_string()),
            CommandError::Backend { wrt, source, .. } => {
                ErrorMessage::new(wrt.as_str(), source.message())
            }
            CommandError::UnknownCommand(cmd) => ErrorMessage::new(cmd.as_str(), self.to_string()),
            _ => ErrorMessage::new(wrt, self.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for WebSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        WebSocketError::ConnectionError(err.to_string())
    }
}
