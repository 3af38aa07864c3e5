use crate::transport::TransportKind;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single transport (open, send or mid-session)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected http status {status}")]
    Http { status: u16 },

    #[error("channel closed: {0}")]
    Closed(String),

    #[error("send failed: {0}")]
    Send(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransportError::Http {
                status: status.as_u16(),
            },
            None if err.is_timeout() || err.is_connect() => TransportError::Connect(err.to_string()),
            None => TransportError::Protocol(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("all transports failed (attempted: {attempted:?})")]
    AllTransportsFailed { attempted: Vec<TransportKind> },

    #[error("connection attempt aborted")]
    Aborted,

    #[error("no transport configured")]
    NoTransportConfigured,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
