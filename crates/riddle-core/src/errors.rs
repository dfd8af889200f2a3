//! # Error Types
//!
//! All error types for reading, submitting, decoding and subscribing.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// VALUE ERRORS
// =============================================================================

/// Errors parsing hex-encoded primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

// =============================================================================
// LEDGER (PORT) ERRORS
// =============================================================================

/// Failures reported by a ledger port implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something that is not the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    /// Returns true if repeating the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

// =============================================================================
// ABI ERRORS
// =============================================================================

/// Errors encoding or decoding contract ABI data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid ABI descriptor: {0}")]
    Descriptor(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("wrong argument count: expected {expected}, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    #[error("argument {index} is not a {expected}")]
    ArgumentType { index: usize, expected: String },

    #[error("data too short: need {needed} bytes, have {available}")]
    DataTooShort { needed: usize, available: usize },

    #[error("invalid offset or length word")]
    InvalidOffset,

    #[error("invalid bool word")]
    InvalidBool,

    #[error("invalid address word")]
    InvalidAddress,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

// =============================================================================
// DECODE ERRORS
// =============================================================================

/// Why a raw log did not decode against a schema. Never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log emitted by {found}, expected {expected}")]
    ForeignEmitter { expected: String, found: String },

    #[error("log has no signature topic")]
    MissingSignature,

    #[error("signature topic does not match {event}")]
    SignatureMismatch { event: String },

    #[error("{event}: expected {expected} topics, found {found}")]
    TopicCount {
        event: String,
        expected: usize,
        found: usize,
    },

    #[error("{event}: missing or mistyped field `{field}`")]
    Field { event: String, field: String },

    #[error("log was removed by a reorg")]
    Removed,

    #[error(transparent)]
    Abi(#[from] AbiError),
}

// =============================================================================
// READ ERRORS
// =============================================================================

/// Failure of a read-only state query. Safe to retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteReadError {
    #[error("call to {function}() failed: {source}")]
    Ledger {
        function: String,
        #[source]
        source: LedgerError,
    },

    #[error("could not decode {function}() output: {source}")]
    Output {
        function: String,
        #[source]
        source: AbiError,
    },

    #[error("{function}() returned an unexpected value")]
    UnexpectedOutput { function: String },
}

// =============================================================================
// SUBMISSION ERRORS
// =============================================================================

/// Failure of the send or finalization step of a submission.
///
/// Never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("invalid submission: {0}")]
    InvalidRequest(String),

    #[error("could not encode submission: {0}")]
    Encoding(#[from] AbiError),

    /// The node or signer refused the transaction (rejected, underfunded,
    /// gas estimation reverted).
    #[error("transaction rejected: {0}")]
    Rejected(#[source] LedgerError),

    #[error("waiting for {tx_hash} failed: {source}")]
    Finalization {
        tx_hash: String,
        #[source]
        source: LedgerError,
    },

    #[error("{tx_hash} not finalized after {waited:?}")]
    FinalizationTimeout { tx_hash: String, waited: Duration },

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
}

impl SubmissionError {
    /// Short message suitable for the user; details go to the log.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "Enter an answer and connect an account first.",
            Self::Rejected(_) => "The transaction was rejected.",
            Self::Reverted { .. } => "The transaction reverted. The riddle may already be solved.",
            Self::FinalizationTimeout { .. } => "The transaction is taking too long to confirm.",
            Self::Encoding(_) | Self::Finalization { .. } => {
                "Something went wrong. Check the logs for more details."
            }
        }
    }
}

// =============================================================================
// SUBSCRIPTION ERRORS
// =============================================================================

/// Errors delivered by the notification transport. Surfaced as feed
/// diagnostics; they do not end a subscription.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionTransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("subscription rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
}

// =============================================================================
// CONFIG ERRORS
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("could not read ABI file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Abi(#[from] AbiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_transience() {
        assert!(LedgerError::Transport("reset".into()).is_transient());
        assert!(LedgerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!LedgerError::Rpc {
            code: -32000,
            message: "insufficient funds".into()
        }
        .is_transient());
    }

    #[test]
    fn test_submission_error_keeps_cause() {
        let err = SubmissionError::Rejected(LedgerError::Rpc {
            code: 4001,
            message: "User rejected the request".into(),
        });
        assert_eq!(
            err.to_string(),
            "transaction rejected: RPC error 4001: User rejected the request"
        );
        assert_eq!(err.user_message(), "The transaction was rejected.");
    }
}
