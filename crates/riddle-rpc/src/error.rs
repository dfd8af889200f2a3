//! Adapter errors and their mapping onto the core port errors.

use riddle_core::errors::{LedgerError, SubscriptionTransportError};
use std::time::Duration;
use thiserror::Error;

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Failures of the HTTP and WebSocket transports.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC response missing result")]
    MissingResult,

    #[error("could not parse RPC response: {0}")]
    Decode(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

impl From<JsonRpcError> for RpcError {
    fn from(error: JsonRpcError) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RpcError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(error.to_string())
    }
}

impl From<RpcError> for LedgerError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Timeout(after) => LedgerError::Timeout(after),
            RpcError::Rpc { code, message } => LedgerError::Rpc { code, message },
            RpcError::MissingResult | RpcError::Decode(_) => {
                LedgerError::Malformed(error.to_string())
            }
            RpcError::Http(_) | RpcError::WebSocket(_) | RpcError::Closed(_) => {
                LedgerError::Transport(error.to_string())
            }
        }
    }
}

impl From<RpcError> for SubscriptionTransportError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Rpc { code, message } => SubscriptionTransportError::Rejected { code, message },
            RpcError::Closed(reason) => SubscriptionTransportError::Disconnected(reason),
            RpcError::MissingResult | RpcError::Decode(_) => {
                SubscriptionTransportError::Protocol(error.to_string())
            }
            RpcError::Http(_) | RpcError::WebSocket(_) | RpcError::Timeout(_) => {
                SubscriptionTransportError::Connect(error.to_string())
            }
        }
    }
}
