use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("send failed: {0}")]
    Send(#[from] ChannelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connection pool is shut down")]
    PoolClosed,

    #[error("internal server error: {0}")]
    Internal(String),
}

/// Failures of a single server-side channel
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,

    #[error("channel closed by peer")]
    Closed,
}

impl AppError {
    /// Stable machine-readable code for error payloads
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            AppError::Send(_) => "SEND_FAILED",
            AppError::Serialization(_) => "SERIALIZATION",
            AppError::PoolClosed => "POOL_CLOSED",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Send(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "code": self.code(),
            "error": self.to_string(),
        }))
    }
}
