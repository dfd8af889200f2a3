//! # Domain Entities
//!
//! Request, record and log shapes exchanged with the ledger.

use super::value_objects::{hex_u64, Address, Bytes, Hash, TxHash};
use crate::errors::SubmissionError;
use serde::{Deserialize, Serialize};

/// The submitting principal.
pub type Identity = Address;

// =============================================================================
// PUZZLE STATE
// =============================================================================

/// Snapshot of the published puzzle.
///
/// May be stale between refreshes; the reader never caches it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleState {
    /// Current riddle text.
    pub text: String,
    /// Whether the riddle still accepts answers.
    pub is_open: bool,
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// One answer submission, built fresh per submit action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Candidate answer, sent verbatim.
    pub answer: String,
    /// Principal sending the transaction.
    pub identity: Identity,
}

impl SubmissionRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(answer: impl Into<String>, identity: Identity) -> Self {
        Self {
            answer: answer.into(),
            identity,
        }
    }

    /// Builds a request from the binding's optional identity, rejecting the
    /// cases the binding is expected to prevent.
    pub fn checked(answer: &str, identity: Option<Identity>) -> Result<Self, SubmissionError> {
        let identity = identity
            .ok_or_else(|| SubmissionError::InvalidRequest("no active identity".into()))?;
        let request = Self::new(answer, identity);
        request.validate()?;
        Ok(request)
    }

    /// Checks the submission preconditions.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.answer.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("answer is empty".into()));
        }
        if self.identity.is_zero() {
            return Err(SubmissionError::InvalidRequest(
                "identity is the zero address".into(),
            ));
        }
        Ok(())
    }
}

/// A new riddle to publish, as the riddle robot does.
///
/// Only the keccak256 hash of `answer` goes on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub riddle: String,
    pub answer: String,
    /// Must be the contract's bot account.
    pub publisher: Identity,
}

impl PublishRequest {
    #[must_use]
    pub fn new(riddle: impl Into<String>, answer: impl Into<String>, publisher: Identity) -> Self {
        Self {
            riddle: riddle.into(),
            answer: answer.into(),
            publisher,
        }
    }

    pub fn checked(
        riddle: &str,
        answer: &str,
        publisher: Option<Identity>,
    ) -> Result<Self, SubmissionError> {
        let publisher = publisher
            .ok_or_else(|| SubmissionError::InvalidRequest("no publishing account".into()))?;
        let request = Self::new(riddle, answer, publisher);
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.riddle.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("riddle is empty".into()));
        }
        if self.answer.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("answer is empty".into()));
        }
        if self.publisher.is_zero() {
            return Err(SubmissionError::InvalidRequest(
                "publisher is the zero address".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// LOGS & RECORDS
// =============================================================================

/// A log entry as returned by `eth_getTransactionReceipt` or `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Contract address that emitted the log.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<Hash>,
    /// ABI-encoded non-indexed fields.
    #[serde(default)]
    pub data: Bytes,
    #[serde(default, with = "hex_u64::option", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
    #[serde(default, with = "hex_u64::option", skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,
    /// Set when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Creates a log without block metadata.
    #[must_use]
    pub fn new(address: Address, topics: Vec<Hash>, data: Bytes) -> Self {
        Self {
            address,
            topics,
            data,
            block_number: None,
            transaction_hash: None,
            log_index: None,
            removed: false,
        }
    }

    /// The event signature topic, if any.
    #[must_use]
    pub fn topic0(&self) -> Option<&Hash> {
        self.topics.first()
    }
}

/// The ledger's confirmation of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedRecord {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// `false` when the receipt status is 0 (reverted).
    pub succeeded: bool,
    /// Logs in emission order.
    pub logs: Vec<RawLog>,
}

/// Log subscription filter: one emitter, one event signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Hash>,
}

impl LogFilter {
    /// Filter for a single event signature emitted by `address`.
    #[must_use]
    pub fn event(address: Address, topic0: Hash) -> Self {
        Self {
            address,
            topics: vec![topic0],
        }
    }

    /// Whether a log passes this filter.
    #[must_use]
    pub fn matches(&self, log: &RawLog) -> bool {
        log.address == self.address
            && self
                .topics
                .iter()
                .zip(log.topics.iter())
                .all(|(want, got)| want == got)
            && log.topics.len() >= self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::from_low_u64_be(0xABC)
    }

    #[test]
    fn test_checked_requires_identity() {
        let err = SubmissionRequest::checked("paris", None).unwrap_err();
        assert!(matches!(err, SubmissionError::InvalidRequest(_)));
    }

    #[test]
    fn test_checked_rejects_blank_answer() {
        let err = SubmissionRequest::checked("   ", Some(alice())).unwrap_err();
        assert!(matches!(err, SubmissionError::InvalidRequest(_)));
    }

    #[test]
    fn test_checked_keeps_answer_verbatim() {
        let request = SubmissionRequest::checked(" Paris ", Some(alice())).unwrap();
        assert_eq!(request.answer, " Paris ");
        assert_eq!(request.identity, alice());
    }

    #[test]
    fn test_publish_request_needs_riddle_answer_and_account() {
        assert!(PublishRequest::checked("q?", "a", None).is_err());
        assert!(PublishRequest::checked(" ", "a", Some(alice())).is_err());
        assert!(PublishRequest::checked("q?", "", Some(alice())).is_err());
        assert!(PublishRequest::checked("q?", "a", Some(Address::zero())).is_err());

        let request = PublishRequest::checked("q?", "a", Some(alice())).unwrap();
        assert_eq!(request, PublishRequest::new("q?", "a", alice()));
    }

    #[test]
    fn test_raw_log_deserializes_rpc_shape() {
        let json = r#"{
            "address": "0x0000000000000000000000000000000000001234",
            "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
            "data": "0x",
            "blockNumber": "0x10",
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000ff",
            "logIndex": "0x0",
            "removed": false
        }"#;
        let log: RawLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.address, Address::from_low_u64_be(0x1234));
        assert_eq!(log.block_number, Some(16));
        assert_eq!(log.log_index, Some(0));
        assert!(log.data.is_empty());
    }

    #[test]
    fn test_filter_matches_address_and_topic() {
        let topic = Hash::from_low_u64_be(7);
        let filter = LogFilter::event(alice(), topic);
        let log = RawLog::new(alice(), vec![topic, Hash::zero()], Bytes::new());
        assert!(filter.matches(&log));

        let other = RawLog::new(Address::zero(), vec![topic], Bytes::new());
        assert!(!filter.matches(&other));

        let no_topics = RawLog::new(alice(), vec![], Bytes::new());
        assert!(!filter.matches(&no_topics));
    }
}
